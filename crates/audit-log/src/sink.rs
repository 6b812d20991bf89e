use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

/// Default channel capacity between producers and the writer task.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Flush after this long without new entries.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// Cloneable handle feeding the background audit writer.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Open the log at `path` and spawn the writer task.
    ///
    /// The task exits after a final flush once every `AuditSink` clone has
    /// been dropped; await the returned handle to make sure everything
    /// reached disk. Write errors are logged and the entry skipped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<u64>), AuditWriteError> {
        Self::with_capacity(path, DEFAULT_CAPACITY).await
    }

    pub async fn with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<(Self, JoinHandle<u64>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(capacity.max(1));
        let mut writer = AuditWriter::new(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
            writer.written()
        });

        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    /// Queue an entry, waiting for channel space.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink closed; entry dropped"
            );
        }
    }

    /// Queue an entry without waiting. Returns `false` (and counts the entry
    /// as dropped) when the channel is full or closed.
    ///
    /// Safe to call from synchronous code and from rayon workers.
    pub fn try_log(&self, entry: AuditEntry) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_type = ?entry.event_type, "audit channel full; entry dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_type = ?entry.event_type, "audit sink closed; entry dropped");
                false
            }
        }
    }

    /// Entries this sink (and its clones) could not deliver.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("capacity", &self.tx.max_capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

async fn run_writer_loop(writer: &mut AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => match writer.write(&entry).await {
                Ok(()) => dirty = true,
                Err(err) => tracing::error!(%err, "failed to write audit entry"),
            },
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!(
                    path = %writer.path().display(),
                    written = writer.written(),
                    "audit writer shutting down"
                );
                return;
            }
            Err(_) if dirty => match writer.flush().await {
                Ok(()) => dirty = false,
                Err(err) => tracing::error!(%err, "periodic audit log flush failed"),
            },
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditEventType, AuditSource};

    fn entry(n: u32) -> AuditEntry {
        AuditEntry::new(
            AuditEventType::DecisionRecorded,
            AuditSource::new("test"),
            serde_json::json!({ "n": n }),
        )
    }

    #[tokio::test]
    async fn entries_reach_disk_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let (sink, handle) = AuditSink::start(&path).await.unwrap();
        sink.log(entry(1)).await;
        assert!(sink.try_log(entry(2)));
        drop(sink);

        assert_eq!(handle.await.unwrap(), 2);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn try_log_drops_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, handle) = AuditSink::with_capacity(dir.path().join("a.jsonl"), 2)
            .await
            .unwrap();

        // The writer task cannot run until we yield, so the channel fills.
        let accepted = (0..5).filter(|&n| sink.try_log(entry(n))).count();
        assert_eq!(accepted, 2);
        assert_eq!(sink.dropped(), 3);

        drop(sink);
        assert_eq!(handle.await.unwrap(), 2);
    }
}
