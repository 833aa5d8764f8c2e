use super::{TailEvent, TailExit};
use core::time::Duration;
use flightstream_core::{
    codec::decode_result,
    log::{EntryId, LogError, LogStore},
    types::SearchId,
};
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

/// Entries fetched per keyed read.
const TAIL_BATCH: usize = 16;

/// Follows the results log for one search id at a time.
///
/// Reads go through the log's per-key index, starting at the first entry
/// ever written for the id, so a tailer opened after the result was published
/// still sees it, and entries of other searches are never scanned.
#[derive(Clone)]
pub struct ResultTailer {
    log: Arc<dyn LogStore>,
    stream: String,
    read_block: Duration,
}

impl ResultTailer {
    pub fn new(log: Arc<dyn LogStore>, stream: impl Into<String>, read_block: Duration) -> Self {
        Self {
            log,
            stream: stream.into(),
            read_block,
        }
    }

    /// Forwards every result for `search_id` to `tx` until the first terminal
    /// one, which is followed by its [`TailEvent::Finished`] summary.
    ///
    /// Each blocking read and each send races `cancel`; once it fires nothing
    /// else is sent. Undecodable entries are logged and skipped. `tx` is
    /// dropped on return, which ends the sink's stream.
    #[tracing::instrument(skip_all, fields(%search_id))]
    pub async fn tail(
        &self,
        search_id: SearchId,
        tx: mpsc::Sender<TailEvent>,
        cancel: CancellationToken,
    ) -> TailExit {
        let mut cursor: Option<EntryId> = None;

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return TailExit::Cancelled,
                read = self.log.read(
                    &self.stream,
                    Some(search_id.as_bytes()),
                    cursor,
                    TAIL_BATCH,
                    self.read_block,
                ) => read,
            };

            let entries = match read {
                Ok(entries) => entries,
                Err(LogError::Closed) => {
                    tracing::warn!("Results log closed while tailing");
                    return TailExit::LogClosed;
                }
                Err(e) => {
                    tracing::error!("Error reading results: {e}");
                    tokio::select! {
                        () = cancel.cancelled() => return TailExit::Cancelled,
                        () = sleep(self.read_block) => continue,
                    }
                }
            };

            for entry in entries {
                cursor = Some(entry.id);

                let result = match decode_result(&entry) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!("Skipping malformed result: {e}");
                        continue;
                    }
                };
                if result.search_id != search_id {
                    continue;
                }

                let terminal = result.is_terminal();
                let summary = result.summary();
                tracing::debug!(
                    status = %summary.status,
                    total_results = summary.total_results,
                    "Forwarding result"
                );

                if let Some(exit) = send(&tx, &cancel, TailEvent::Update(result)).await {
                    return exit;
                }
                if terminal {
                    let status = summary.status;
                    if let Some(exit) = send(&tx, &cancel, TailEvent::Finished(summary)).await {
                        return exit;
                    }
                    return TailExit::Terminal(status);
                }
            }
        }
    }
}

/// Sends `event`, or reports why the tailer must stop instead.
async fn send(
    tx: &mpsc::Sender<TailEvent>,
    cancel: &CancellationToken,
    event: TailEvent,
) -> Option<TailExit> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Some(TailExit::Cancelled),
        sent = tx.send(event) => sent.err().map(|_| TailExit::ReceiverClosed),
    }
}
