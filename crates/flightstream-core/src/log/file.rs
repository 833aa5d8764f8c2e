use super::{
    EntryId, GroupCursor, InMemoryLog, LogEntry, LogError, LogStore, Record, StartPosition,
    journal::JournalRecord,
};
use async_trait::async_trait;
use bytes::BytesMut;
use core::time::Duration;
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// File name of the journal inside the log directory.
pub const JOURNAL_FILE: &str = "flightstream.journal";

/// A [`LogStore`] that survives restarts.
///
/// Every state change (append, group creation, delivery, acknowledgement) is
/// written to an append-only journal before or right after it is applied to
/// an in-process [`InMemoryLog`], which serves all reads. [`FileLog::open`]
/// replays the journal, so entries, group cursors and pending lists come back
/// after a restart and unacknowledged requests are redelivered to the
/// consumer that held them.
///
/// A delivery or ack lost in a crash only makes an entry be delivered again,
/// keeping delivery at-least-once. The journal is written but not fsynced on
/// every change, so it survives a process crash and not necessarily a power
/// loss.
pub struct FileLog {
    memory: InMemoryLog,
    journal: Mutex<Journal>,
}

struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    fn write(&mut self, record: &JournalRecord) -> Result<(), LogError> {
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        self.file
            .write_all(&buf)
            .map_err(|e| io_error(&self.path, &e))
    }
}

impl FileLog {
    /// Opens (or creates) the log stored in `dir` and replays its journal.
    ///
    /// A frame cut short by a crash at the end of the journal is dropped and
    /// the file truncated to the last complete frame.
    ///
    /// # Errors
    ///
    /// [`LogError::Storage`] if the directory or journal cannot be read or
    /// written, or a complete frame is malformed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, &e))?;
        let path = dir.join(JOURNAL_FILE);

        let memory = InMemoryLog::new();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(&path, &e)),
        };

        let mut offset = 0;
        let mut replayed = 0_usize;
        while let Some((record, used)) = JournalRecord::decode(&data[offset..])? {
            replay(&memory, record)?;
            offset += used;
            replayed += 1;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, &e))?;
        if offset < data.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = data.len() - offset,
                "Truncating torn frame at end of journal"
            );
            file.set_len(offset as u64)
                .map_err(|e| io_error(&path, &e))?;
        }

        tracing::info!(path = %path.display(), records = replayed, "Opened log journal");
        Ok(Self {
            memory,
            journal: Mutex::new(Journal { file, path }),
        })
    }

    /// Closes the log. Every later call, including reads currently blocked,
    /// fails with [`LogError::Closed`]. The journal is left as is.
    pub fn close(&self) {
        self.memory.close();
    }
}

fn replay(memory: &InMemoryLog, record: JournalRecord) -> Result<(), LogError> {
    match record {
        JournalRecord::Append { stream, key, value } => {
            memory.append_now(&stream, Record { key, value })?;
        }
        JournalRecord::CreateGroup {
            stream,
            group,
            last_delivered,
        } => memory.restore_group(&stream, &group, last_delivered),
        JournalRecord::Deliver {
            stream,
            group,
            consumer,
            id,
        } => memory.restore_delivery(&stream, &group, &consumer, EntryId(id))?,
        JournalRecord::Ack { stream, group, id } => {
            memory.ack_now(&stream, &group, EntryId(id))?;
        }
    }
    Ok(())
}

fn io_error(path: &Path, e: &std::io::Error) -> LogError {
    LogError::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl LogStore for FileLog {
    async fn append(&self, stream: &str, record: Record) -> Result<EntryId, LogError> {
        // Journal order must match id order.
        let mut journal = self.journal.lock();
        if self.memory.is_closed() {
            return Err(LogError::Closed);
        }
        journal.write(&JournalRecord::Append {
            stream: stream.to_owned(),
            key: record.key.clone(),
            value: record.value.clone(),
        })?;
        self.memory.append_now(stream, record)
    }

    async fn read(
        &self,
        stream: &str,
        key: Option<&[u8]>,
        after: Option<EntryId>,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.memory.read(stream, key, after, count, block).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), LogError> {
        let mut journal = self.journal.lock();
        let last_delivered = self.memory.create_group_now(stream, group, start)?;
        journal.write(&JournalRecord::CreateGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
            last_delivered,
        })
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        let batch = self
            .memory
            .read_group(stream, group, consumer, cursor, count, block)
            .await?;

        if cursor == GroupCursor::New && !batch.is_empty() {
            let mut journal = self.journal.lock();
            for entry in &batch {
                journal.write(&JournalRecord::Deliver {
                    stream: stream.to_owned(),
                    group: group.to_owned(),
                    consumer: consumer.to_owned(),
                    id: entry.id.get(),
                })?;
            }
        }
        Ok(batch)
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, LogError> {
        let mut journal = self.journal.lock();
        let acked = self.memory.ack_now(stream, group, id)?;
        if acked {
            journal.write(&JournalRecord::Ack {
                stream: stream.to_owned(),
                group: group.to_owned(),
                id: id.get(),
            })?;
        }
        Ok(acked)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<usize, LogError> {
        self.memory.pending(stream, group).await
    }

    async fn entry_count(&self, stream: &str) -> Result<usize, LogError> {
        self.memory.entry_count(stream).await
    }
}
