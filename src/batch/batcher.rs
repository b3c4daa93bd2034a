//! Per-Connection Write Batcher
//!
//! Each connection owns a [`WriteBatcher`] that coalesces its SET/DEL
//! commands before applying them to the store. The client is acknowledged
//! as soon as a write lands in the batch; the batch drains to the store
//! either when it reaches [`BATCH_SIZE_THRESHOLD`] commands or when the
//! 10 ms background flush fires, whichever comes first.
//!
//! This trades durability for write throughput: a client that receives `OK`
//! holds no guarantee that the write has reached the store, let alone the
//! journal. Acceptable for cache data; wrong for anything that must survive
//! a crash the moment it is acknowledged.
//!
//! Commands in a batch are applied to the store in arrival order, so a
//! connection always observes its own writes in the order it issued them
//! once the batch has drained.

use crate::metrics::Metrics;
use crate::protocol::ParsedCommand;
use crate::storage::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// How often the background task drains the batch.
pub const FLUSH_INTERVAL_MS: u64 = 10;

/// Batch size that triggers an immediate synchronous drain.
pub const BATCH_SIZE_THRESHOLD: usize = 50;

/// Buffers a connection's writes and applies them to the store in order.
#[derive(Debug)]
pub struct WriteBatcher {
    inner: Arc<BatcherInner>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct BatcherInner {
    store: Arc<Store>,
    pending: Mutex<Vec<ParsedCommand>>,
}

impl WriteBatcher {
    /// Creates a batcher and spawns its background flush task.
    pub fn start(store: Arc<Store>) -> Self {
        let inner = Arc::new(BatcherInner {
            store,
            pending: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(flush_loop(Arc::clone(&inner), shutdown_rx));

        Self {
            inner,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Adds a write to the batch.
    ///
    /// SET and DEL are buffered; anything else is applied to the store
    /// immediately (the dispatcher routes reads elsewhere, so this is a
    /// fallback, not the read path). If the batch reaches the size
    /// threshold the drain happens synchronously inside this call.
    pub fn add(&self, command: ParsedCommand) {
        if !command.is_write() {
            self.inner.apply(command);
            return;
        }

        let should_drain = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.push(command);
            pending.len() >= BATCH_SIZE_THRESHOLD
        };
        if should_drain {
            self.inner.drain();
        }
    }

    /// Number of commands currently buffered.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    /// Applies everything buffered so far to the store.
    pub fn drain(&self) {
        self.inner.drain();
    }

    /// Stops the flush task, waits for it, and drains one final time.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.drain();
    }
}

impl Drop for WriteBatcher {
    fn drop(&mut self) {
        // Backstop: the task also drains once before exiting on the signal.
        let _ = self.shutdown_tx.send(true);
    }
}

impl BatcherInner {
    /// Steals the current batch under the lock, releases it, then applies
    /// the commands in order.
    fn drain(&self) {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };

        Metrics::global().record_batch(batch.len());
        for command in batch {
            self.apply(command);
        }
    }

    fn apply(&self, command: ParsedCommand) {
        match command {
            ParsedCommand::Set {
                key,
                value,
                ttl_seconds,
            } => self.store.set(key, value, ttl_seconds),
            ParsedCommand::Del { key } => {
                self.store.del(&key);
            }
            ParsedCommand::Compact => self.store.compact(),
            other => {
                debug!(command = %other, "non-write command reached the batcher, ignoring");
            }
        }
    }
}

/// Drains the batch on an interval until shut down.
async fn flush_loop(inner: Arc<BatcherInner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(FLUSH_INTERVAL_MS)) => {
                inner.drain();
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    inner.drain();
                    return;
                }
            }
        }
    }
}
