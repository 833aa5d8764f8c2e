use super::{EntryId, GroupCursor, LogEntry, LogError, LogStore, Record, StartPosition};
use async_trait::async_trait;
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};

/// An in-process [`LogStore`].
///
/// All streams live behind a single mutex. Blocked readers subscribe to a
/// version counter that is bumped on every append (and on close), then
/// re-check their stream; subscribing before the first check means an append
/// racing with the check still wakes the reader.
///
/// Cloning an `Arc<InMemoryLog>` shares the same streams, which is how the
/// publisher, the workers and every tailer see a single log.
pub struct InMemoryLog {
    inner: Mutex<Inner>,
    version: watch::Sender<u64>,
}

#[derive(Default)]
struct Inner {
    closed: bool,
    streams: HashMap<String, StreamState>,
}

#[derive(Default)]
struct StreamState {
    /// `entries[i].id == EntryId(i + 1)`.
    entries: Vec<LogEntry>,
    /// Positions into `entries` per record key, ascending.
    by_key: HashMap<Bytes, Vec<usize>>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: u64,
    /// Entry id -> consumer that holds it.
    pending: BTreeMap<u64, String>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            version,
        }
    }

    /// Closes the log. Every later call, including reads currently blocked,
    /// fails with [`LogError::Closed`].
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.version.send_modify(|v| *v += 1);
    }

    pub(super) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub(super) fn append_now(&self, stream: &str, record: Record) -> Result<EntryId, LogError> {
        let id = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(LogError::Closed);
            }
            let state = inner.streams.entry(stream.to_owned()).or_default();
            let position = state.entries.len();
            let id = EntryId(position as u64 + 1);

            state
                .by_key
                .entry(record.key.clone())
                .or_default()
                .push(position);
            state.entries.push(LogEntry {
                id,
                key: record.key,
                value: record.value,
            });
            id
        };

        self.version.send_modify(|v| *v += 1);
        Ok(id)
    }

    /// Creates a group and returns the id it will deliver after.
    pub(super) fn create_group_now(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<u64, LogError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        let state = inner.streams.entry(stream.to_owned()).or_default();
        if state.groups.contains_key(group) {
            return Err(LogError::GroupExists);
        }

        let last_delivered = match start {
            StartPosition::Earliest => 0,
            StartPosition::Latest => state.entries.len() as u64,
        };
        state.groups.insert(
            group.to_owned(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(last_delivered)
    }

    pub(super) fn ack_now(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, LogError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        let group_state = inner
            .streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .ok_or_else(|| no_such_group(stream, group))?;

        Ok(group_state.pending.remove(&id.get()).is_some())
    }

    /// Recreates a group at a known cursor. An existing group is kept.
    pub(super) fn restore_group(&self, stream: &str, group: &str, last_delivered: u64) {
        self.inner
            .lock()
            .streams
            .entry(stream.to_owned())
            .or_default()
            .groups
            .entry(group.to_owned())
            .or_insert_with(|| GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            });
    }

    /// Marks `id` as delivered to `consumer`, as a `New` read would have.
    pub(super) fn restore_delivery(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: EntryId,
    ) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        let group_state = inner
            .streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .ok_or_else(|| no_such_group(stream, group))?;
        group_state.pending.insert(id.get(), consumer.to_owned());
        group_state.last_delivered = group_state.last_delivered.max(id.get());
        Ok(())
    }

    /// Polls `f` under the lock until it yields a value, waiting for appends
    /// in between. Returns `None` once `block` has elapsed.
    async fn wait_for<T>(
        &self,
        block: Duration,
        mut f: impl FnMut(&mut Inner) -> Result<Option<T>, LogError>,
    ) -> Result<Option<T>, LogError> {
        let deadline = Instant::now() + block;
        let mut changes = self.version.subscribe();

        loop {
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(LogError::Closed);
                }
                if let Some(found) = f(&mut inner)? {
                    return Ok(Some(found));
                }
            }

            match timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(LogError::Closed),
                Err(_) => return Ok(None),
            }
        }
    }
}

impl StreamState {
    fn after(&self, key: Option<&[u8]>, after: u64, count: usize) -> Vec<LogEntry> {
        match key {
            None => self
                .entries
                .get(after as usize..)
                .unwrap_or(&[])
                .iter()
                .take(count)
                .cloned()
                .collect(),
            Some(key) => {
                let Some(positions) = self.by_key.get(key) else {
                    return Vec::new();
                };
                // Entry at position `p` has id `p + 1`, so ids greater than
                // `after` start at position `after`.
                let start = positions.partition_point(|&p| (p as u64) < after);
                positions[start..]
                    .iter()
                    .take(count)
                    .map(|&p| self.entries[p].clone())
                    .collect()
            }
        }
    }
}

fn no_such_group(stream: &str, group: &str) -> LogError {
    LogError::NoSuchGroup {
        stream: stream.to_owned(),
        group: group.to_owned(),
    }
}

#[async_trait]
impl LogStore for InMemoryLog {
    async fn append(&self, stream: &str, record: Record) -> Result<EntryId, LogError> {
        self.append_now(stream, record)
    }

    async fn read(
        &self,
        stream: &str,
        key: Option<&[u8]>,
        after: Option<EntryId>,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        let after = after.map_or(0, EntryId::get);
        let count = count.max(1);

        let batch = self
            .wait_for(block, |inner| {
                let batch = inner
                    .streams
                    .get(stream)
                    .map(|state| state.after(key, after, count))
                    .unwrap_or_default();
                Ok((!batch.is_empty()).then_some(batch))
            })
            .await?;

        Ok(batch.unwrap_or_default())
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), LogError> {
        self.create_group_now(stream, group, start).map(drop)
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
        let count = count.max(1);
        let block = match cursor {
            GroupCursor::New => block,
            GroupCursor::Pending { .. } => Duration::ZERO,
        };

        let batch = self
            .wait_for(block, |inner| {
                let state = inner
                    .streams
                    .get_mut(stream)
                    .ok_or_else(|| no_such_group(stream, group))?;
                let StreamState {
                    entries, groups, ..
                } = state;
                let group_state = groups
                    .get_mut(group)
                    .ok_or_else(|| no_such_group(stream, group))?;

                let batch: Vec<LogEntry> = match cursor {
                    GroupCursor::New => {
                        let batch: Vec<LogEntry> = entries
                            .get(group_state.last_delivered as usize..)
                            .unwrap_or(&[])
                            .iter()
                            .take(count)
                            .cloned()
                            .collect();
                        for entry in &batch {
                            group_state
                                .pending
                                .insert(entry.id.get(), consumer.to_owned());
                            group_state.last_delivered = entry.id.get();
                        }
                        batch
                    }
                    GroupCursor::Pending { after } => group_state
                        .pending
                        .range(after.map_or(0, EntryId::get) + 1..)
                        .filter(|(_, owner)| owner.as_str() == consumer)
                        .take(count)
                        .map(|(&id, _)| entries[id as usize - 1].clone())
                        .collect(),
                };

                Ok((!batch.is_empty()).then_some(batch))
            })
            .await?;

        Ok(batch.unwrap_or_default())
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, LogError> {
        self.ack_now(stream, group, id)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<usize, LogError> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        inner
            .streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group_state| group_state.pending.len())
            .ok_or_else(|| no_such_group(stream, group))
    }

    async fn entry_count(&self, stream: &str) -> Result<usize, LogError> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner
            .streams
            .get(stream)
            .map_or(0, |state| state.entries.len()))
    }
}
