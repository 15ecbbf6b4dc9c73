//! Background worker mirroring the latest state snapshot to storage.
//!
//! Mutations only bump a revision and wake the worker; the worker serialises
//! whatever snapshot is current when it runs, so bursts of mutations (one per
//! streamed chunk) coalesce into a single write. Writes are last-writer-wins.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::storage::STATE_KEY;
use crate::chat::storage::kv::KeyValueStore;

/// A snapshot the mirror can persist.
pub trait MirrorSnapshot: Send + Sync + 'static {
    /// Monotonic revision of this snapshot.
    fn revision(&self) -> u64;

    /// Serialised form written under [`STATE_KEY`].
    ///
    /// # Errors
    /// Returns an error if serialisation fails.
    fn to_payload(&self) -> ChatResult<String>;
}

/// Handle to the mirror worker.
pub struct PersistenceMirror {
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    written: watch::Receiver<u64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct MirrorWorker<S> {
    source: Arc<ArcSwap<S>>,
    store: Arc<dyn KeyValueStore>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    written: watch::Sender<u64>,
}

impl PersistenceMirror {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// `initial_revision` is treated as already persisted.
    #[must_use]
    pub fn spawn<S: MirrorSnapshot>(
        source: Arc<ArcSwap<S>>,
        store: Arc<dyn KeyValueStore>,
        initial_revision: u64,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(initial_revision);

        let worker = MirrorWorker {
            source,
            store,
            wake: Arc::clone(&wake),
            shutdown: Arc::clone(&shutdown),
            written: tx,
        };
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        Self {
            wake,
            shutdown,
            written: rx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Schedule a write of the current snapshot.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Last revision acknowledged by the worker.
    #[must_use]
    pub fn written_revision(&self) -> u64 {
        *self.written.borrow()
    }

    /// Wait until `revision` (or a later one) has been written.
    ///
    /// # Errors
    /// Returns an error if the worker stopped before reaching `revision`.
    pub async fn flush(&self, revision: u64) -> ChatResult<()> {
        let mut rx = self.written.clone();
        if *rx.borrow() >= revision {
            return Ok(());
        }
        self.wake.notify_one();
        rx.wait_for(|written| *written >= revision)
            .await
            .map(|_| ())
            .map_err(|_| {
                ChatError::Io(std::io::Error::other("persistence mirror stopped"))
            })
    }

    /// Write the final snapshot and stop the worker.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(?err, "persistence mirror task failed");
            }
        }
    }
}

impl Drop for PersistenceMirror {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

impl<S: MirrorSnapshot> MirrorWorker<S> {
    async fn run(self) {
        info!("Starting persistence mirror");
        loop {
            tokio::select! {
                () = self.wake.notified() => {
                    self.write_latest().await;
                }
                () = self.shutdown.notified() => {
                    self.write_latest().await;
                    info!("Persistence mirror shutting down");
                    break;
                }
            }
        }
    }

    async fn write_latest(&self) {
        let snapshot = self.source.load_full();
        let revision = snapshot.revision();
        if revision <= *self.written.borrow() {
            return;
        }

        match snapshot.to_payload() {
            Ok(payload) => match self.store.set(STATE_KEY, payload).await {
                Ok(()) => debug!(revision, "state mirrored"),
                Err(err) => warn!(revision, error = %err, "failed to mirror state"),
            },
            Err(err) => warn!(revision, error = %err, "failed to serialise state"),
        }

        // Failed writes are acknowledged too so flush never hangs.
        self.written.send_replace(revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::storage::kv::{InMemoryKeyValueStore, StoreFuture};

    struct Counter(u64);

    impl MirrorSnapshot for Counter {
        fn revision(&self) -> u64 {
            self.0
        }

        fn to_payload(&self) -> ChatResult<String> {
            Ok(format!("rev-{}", self.0))
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> StoreFuture<'_, ChatResult<Option<String>>> {
            Box::pin(async { Ok(None) })
        }

        fn set(&self, _key: &str, _value: String) -> StoreFuture<'_, ChatResult<()>> {
            Box::pin(async { Err(ChatError::Io(std::io::Error::other("disk full"))) })
        }

        fn remove(&self, _key: &str) -> StoreFuture<'_, ChatResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_flush_writes_latest_snapshot() {
        let source = Arc::new(ArcSwap::from_pointee(Counter(0)));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let mirror = PersistenceMirror::spawn(Arc::clone(&source), store.clone(), 0);

        source.store(Arc::new(Counter(1)));
        mirror.notify();
        source.store(Arc::new(Counter(2)));
        mirror.flush(2).await.unwrap();

        assert_eq!(store.get(STATE_KEY).await.unwrap().as_deref(), Some("rev-2"));
        assert!(mirror.written_revision() >= 2);
        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_of_written_revision_returns_immediately() {
        let source = Arc::new(ArcSwap::from_pointee(Counter(5)));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let mirror = PersistenceMirror::spawn(source, store.clone(), 5);
        mirror.flush(3).await.unwrap();
        assert!(store.get(STATE_KEY).await.unwrap().is_none());
        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_write_is_acknowledged() {
        let source = Arc::new(ArcSwap::from_pointee(Counter(1)));
        let mirror = PersistenceMirror::spawn(source, Arc::new(FailingStore), 0);
        mirror.flush(1).await.unwrap();
        assert_eq!(mirror.written_revision(), 1);
        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_writes_pending_snapshot() {
        let source = Arc::new(ArcSwap::from_pointee(Counter(0)));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let mirror = PersistenceMirror::spawn(Arc::clone(&source), store.clone(), 0);
        source.store(Arc::new(Counter(7)));
        mirror.shutdown().await;
        assert_eq!(store.get(STATE_KEY).await.unwrap().as_deref(), Some("rev-7"));
        assert!(mirror.flush(8).await.is_err());
    }
}
