//! Background Journal Flusher
//!
//! A single task started alongside the store. Every 100 ms it pushes the
//! journal's write buffer to the OS, and roughly once a minute it checks the
//! journal file size, kicking off a compaction when the file grows past the
//! threshold. While a compaction is in flight the periodic flush is skipped;
//! the compactor owns the journal handle during the swap.
//!
//! The task cooperates on shutdown: it samples the store's running flag and
//! a watch channel at the top of every iteration, and the owning handle
//! signals the channel when dropped.

use crate::storage::store::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for the journal flusher.
#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// How often the journal buffer is flushed to the OS (default: 100 ms)
    pub flush_interval: Duration,

    /// How often the journal file size is checked (default: 60 s)
    pub compaction_check_interval: Duration,

    /// Journal size that triggers a compaction (default: 100 MiB)
    pub compaction_threshold: u64,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            compaction_check_interval: Duration::from_secs(60),
            compaction_threshold: 100 * 1024 * 1024,
        }
    }
}

/// A handle to the running journal flusher.
///
/// Dropping the handle signals the task to stop; [`JournalFlusher::shutdown`]
/// additionally waits for it to exit.
#[derive(Debug)]
pub struct JournalFlusher {
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JournalFlusher {
    /// Starts the flusher as a background task.
    pub fn start(store: Arc<Store>, config: FlusherConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(flusher_loop(store, config, shutdown_rx));
        info!("journal flusher started");

        Self {
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("journal flusher stopped");
    }
}

impl Drop for JournalFlusher {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The flush/compaction-check loop.
async fn flusher_loop(
    store: Arc<Store>,
    config: FlusherConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_compaction_check = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.flush_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("journal flusher received shutdown signal");
                    return;
                }
            }
        }

        if !store.is_running() {
            return;
        }

        // The compactor owns the journal handle while it swaps files.
        if store.is_compacting() {
            continue;
        }

        store.flush_journal();

        if last_compaction_check.elapsed() >= config.compaction_check_interval {
            last_compaction_check = tokio::time::Instant::now();

            let size = store.journal_size();
            if size > config.compaction_threshold {
                info!(
                    size,
                    threshold = config.compaction_threshold,
                    "journal over threshold, compacting"
                );
                store.compact();
            }
        }
    }
}

/// Starts the flusher with default configuration.
pub fn start_journal_flusher(store: Arc<Store>) -> JournalFlusher {
    JournalFlusher::start(store, FlusherConfig::default())
}
