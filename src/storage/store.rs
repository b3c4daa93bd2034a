//! Sharded Key-Value Store
//!
//! The store is the core of EmberKV: a fixed array of 16 independently
//! locked shards in front of a write-ahead journal.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐      ┌─────────┐        │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ ...  │ Shard 15│        │
//! │  │ Mutex   │ │ Mutex   │ │ Mutex   │      │ Mutex   │        │
//! │  │ HashMap │ │ HashMap │ │ HashMap │      │ HashMap │        │
//! │  └─────────┘ └─────────┘ └─────────┘      └─────────┘        │
//! │                          │                                   │
//! │                          ▼ (after the shard lock is released)│
//! │                  ┌───────────────┐                           │
//! │                  │    Journal    │  append-only text log     │
//! │                  └───────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Contract
//!
//! - Each shard mutex is held only across in-memory map access; journal
//!   appends happen after the shard lock is released.
//! - The journal mutex is orthogonal to the shard mutexes. No path ever
//!   waits on the journal while holding a shard lock, which lets compaction
//!   take a shard lock briefly inside its journal hold without a deadlock
//!   cycle being possible.
//! - No operation ever holds two shard mutexes at once. MGET and compaction
//!   visit shards one at a time in ascending index order.
//!
//! ## TTL Model
//!
//! Entries expire lazily: an expired entry is erased when a read finds it,
//! and compaction drops expired entries while rewriting the journal. There
//! is no background sweep of the shard maps.

use std::collections::HashMap;
use std::fs::File;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::protocol::{parse_text_line, ParsedCommand};
use crate::storage::journal::{Journal, Record};

/// Number of shards. Keys map to shards by hash; more shards mean less lock
/// contention at a little more memory.
pub const NUM_SHARDS: usize = 16;

/// A stored value plus its absolute expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored bytes.
    pub value: Bytes,
    /// Unix timestamp in milliseconds at which the entry expires.
    /// 0 means the entry never expires.
    pub expiry_at_ms: u64,
}

impl Entry {
    /// Creates an entry expiring `ttl_seconds` from now (0 = permanent).
    pub fn new(value: Bytes, ttl_seconds: u64) -> Self {
        Self::with_clock(value, ttl_seconds, now_ms())
    }

    fn with_clock(value: Bytes, ttl_seconds: u64, now_ms: u64) -> Self {
        let expiry_at_ms = if ttl_seconds > 0 {
            now_ms + ttl_seconds * 1000
        } else {
            0
        };
        Self {
            value,
            expiry_at_ms,
        }
    }

    /// True once the wall clock has passed the expiry time.
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expiry_at_ms != 0 && now_ms > self.expiry_at_ms
    }
}

/// Unix time in milliseconds. The TTL arithmetic is wall-clock because the
/// journal persists TTLs across process restarts.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One partition of the key space behind its own exclusive mutex.
///
/// A plain `Mutex` rather than a reader-writer lock: reads mutate too,
/// because a read that finds an expired entry erases it in place.
#[derive(Debug, Default)]
struct Shard {
    entries: Mutex<HashMap<Bytes, Entry>>,
}

impl Shard {
    fn new() -> Self {
        Self::default()
    }

    /// Clones the live entries under the shard mutex. Used by compaction,
    /// which then writes the clones out without holding any shard lock.
    fn snapshot_live(&self, now_ms: u64) -> Vec<(Bytes, Entry)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now_ms))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

/// The sharded store plus its journal.
///
/// Designed to be wrapped in an `Arc` and shared across all connection
/// tasks and the background flusher.
#[derive(Debug)]
pub struct Store {
    shards: Vec<Shard>,
    journal: Mutex<Journal>,
    running: AtomicBool,
    is_compacting: AtomicBool,
}

impl Store {
    /// Opens a store over the journal at `path`.
    ///
    /// Creates parent directories if needed, replays the journal if the file
    /// exists, then opens the append handle. Nothing here is fatal: if the
    /// directory or file cannot be created the store serves from memory only
    /// and logs a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "could not create journal directory");
                }
            }
        }

        let mut shards: Vec<Shard> = (0..NUM_SHARDS).map(|_| Shard::new()).collect();
        let replayed = replay_into(&mut shards, &path);
        if replayed > 0 {
            let keys: usize = shards
                .iter_mut()
                .map(|s| s.entries.get_mut().unwrap().len())
                .sum();
            info!(path = %path.display(), records = replayed, keys, "replayed journal");
        }

        let mut journal = Journal::new(path);
        journal.open_append();

        Self {
            shards,
            journal: Mutex::new(journal),
            running: AtomicBool::new(true),
            is_compacting: AtomicBool::new(false),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[shard_index(key)]
    }

    /// Stores `value` under `key`, expiring after `ttl_seconds` (0 = never).
    ///
    /// The in-memory write always succeeds; the journal append may fail
    /// non-fatally (logged), which is the documented durability gap.
    pub fn set(&self, key: Bytes, value: Bytes, ttl_seconds: u64) {
        let entry = Entry::new(value.clone(), ttl_seconds);
        {
            let mut entries = self.shard(&key).entries.lock().unwrap();
            entries.insert(key.clone(), entry);
        }

        let mut journal = self.journal.lock().unwrap();
        journal.append(&Record::Set {
            key: &key,
            value: &value,
            ttl_seconds,
        });
    }

    /// Looks up `key`, erasing it in place if it has expired.
    ///
    /// Records a hit or miss and the call latency.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let start = Instant::now();
        let now = now_ms();
        let metrics = Metrics::global();

        let result = {
            let mut entries = self.shard(key).entries.lock().unwrap();
            match entries.get(key) {
                None => {
                    metrics.record_miss();
                    None
                }
                Some(entry) if entry.is_expired(now) => {
                    entries.remove(key); // lazy eviction
                    metrics.record_miss();
                    None
                }
                Some(entry) => {
                    metrics.record_hit();
                    Some(entry.value.clone())
                }
            }
        };

        metrics.record_latency(start.elapsed().as_micros() as u64);
        result
    }

    /// Looks up many keys, preserving input order in the result.
    ///
    /// Keys are grouped by shard and the shards are visited in ascending
    /// index order, one lock at a time, so concurrent MGETs can never
    /// deadlock. The result is not an atomic snapshot across shards: each
    /// position holds the value its key had at the moment its shard was
    /// visited.
    pub fn mget(&self, keys: &[Bytes]) -> Vec<Option<Bytes>> {
        let start = Instant::now();
        let now = now_ms();
        let metrics = Metrics::global();

        let mut results: Vec<Option<Bytes>> = vec![None; keys.len()];

        // Group input positions by shard, then walk shards in index order.
        let mut by_shard: Vec<Vec<usize>> = vec![Vec::new(); NUM_SHARDS];
        for (pos, key) in keys.iter().enumerate() {
            by_shard[shard_index(key)].push(pos);
        }

        for (shard_idx, positions) in by_shard.iter().enumerate() {
            if positions.is_empty() {
                continue;
            }
            let mut entries = self.shards[shard_idx].entries.lock().unwrap();
            for &pos in positions {
                let key = &keys[pos];
                match entries.get(key) {
                    None => metrics.record_miss(),
                    Some(entry) if entry.is_expired(now) => {
                        entries.remove(key);
                        metrics.record_miss();
                    }
                    Some(entry) => {
                        results[pos] = Some(entry.value.clone());
                        metrics.record_hit();
                    }
                }
            }
        }

        metrics.record_latency(start.elapsed().as_micros() as u64);
        results
    }

    /// Removes `key`. Returns true if an entry was actually removed, in
    /// which case a DEL record is journaled; a delete of an absent key
    /// leaves the journal untouched.
    pub fn del(&self, key: &Bytes) -> bool {
        let removed = {
            let mut entries = self.shard(key).entries.lock().unwrap();
            entries.remove(key).is_some()
        };

        if removed {
            let mut journal = self.journal.lock().unwrap();
            journal.append(&Record::Del { key });
        }
        removed
    }

    /// Rewrites the journal down to one SET record per live entry.
    ///
    /// Shards are snapshotted one at a time; in-memory writes keep going
    /// throughout. Records appended to the live journal while the rewrite
    /// is in progress are teed into the rewrite target, so nothing that
    /// lands mid-compaction is lost when the temp file is renamed over the
    /// journal. Each shard's snapshot is taken and written to the rewrite
    /// target under the journal lock: replay is last-write-wins, so a
    /// concurrent overwrite of a snapshotted key must not be able to tee
    /// its record into the temp file ahead of the older snapshot value.
    /// Remaining TTLs are re-encoded as `EX <seconds>` (rounded up);
    /// entries within a second of expiry are dropped rather than
    /// resurrected as permanent.
    ///
    /// A no-op if a compaction is already running or the journal is closed.
    pub fn compact(&self) {
        if self
            .is_compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let started = Instant::now();

        {
            let mut journal = self.journal.lock().unwrap();
            if !journal.is_open() || !journal.begin_rewrite() {
                self.is_compacting.store(false, Ordering::SeqCst);
                return;
            }
        }

        let mut live_entries = 0usize;
        for shard in &self.shards {
            // Journal first, then the shard briefly inside it. Safe: no
            // writer waits on the journal while holding a shard lock. Any
            // tee racing this shard's snapshot must wait out the hold, so
            // it lands behind the snapshot records and wins on last-write
            // replay.
            let mut journal = self.journal.lock().unwrap();
            let snapshot = shard.snapshot_live(now_ms());
            let now = now_ms();
            for (key, entry) in &snapshot {
                let ttl_seconds = if entry.expiry_at_ms == 0 {
                    0
                } else {
                    let remaining = entry.expiry_at_ms.saturating_sub(now).div_ceil(1000);
                    if remaining == 0 {
                        continue;
                    }
                    remaining
                };
                journal.write_rewrite(&Record::Set {
                    key,
                    value: &entry.value,
                    ttl_seconds,
                });
                live_entries += 1;
            }
        }

        {
            let mut journal = self.journal.lock().unwrap();
            journal.commit_rewrite();
        }

        self.is_compacting.store(false, Ordering::SeqCst);
        info!(
            entries = live_entries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "journal compacted"
        );
    }

    /// Pushes the journal's write buffer to the OS. Called by the
    /// background flusher.
    pub fn flush_journal(&self) {
        self.journal.lock().unwrap().flush();
    }

    /// Current size of the journal file in bytes.
    pub fn journal_size(&self) -> u64 {
        self.journal.lock().unwrap().size()
    }

    /// True while a compaction snapshot/swap is in flight.
    pub fn is_compacting(&self) -> bool {
        self.is_compacting.load(Ordering::SeqCst)
    }

    /// True until [`Store::shutdown`] is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.entries.lock().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops background cooperation, flushes, and closes the journal.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut journal = self.journal.lock().unwrap();
        journal.close();
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Backstop for callers that never reach shutdown(); the journal's
        // own Drop flushes and closes the handle.
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Stable within a process run; nothing on disk depends on shard placement.
#[inline]
fn shard_index(key: &[u8]) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % NUM_SHARDS
}

/// Replays the journal at `path` into the shard array.
///
/// Each valid SET/DEL line is applied directly to memory, with no journal
/// appends. A `SET ... EX n` record re-arms its TTL relative to load time,
/// so a key written with an hour to live gets a fresh hour after restart.
/// Returns the number of records applied.
fn replay_into(shards: &mut [Shard], path: &Path) -> u64 {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read journal, starting empty");
            return 0;
        }
    };

    let now = now_ms();
    let mut applied = 0u64;

    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "journal read error, stopping replay");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        match parse_text_line(&line) {
            ParsedCommand::Set {
                key,
                value,
                ttl_seconds,
            } => {
                let entry = Entry::with_clock(value, ttl_seconds, now);
                shards[shard_index(&key)]
                    .entries
                    .get_mut()
                    .unwrap()
                    .insert(key, entry);
                applied += 1;
            }
            ParsedCommand::Del { key } => {
                shards[shard_index(&key)]
                    .entries
                    .get_mut()
                    .unwrap()
                    .remove(&key);
                applied += 1;
            }
            _ => {} // skip anything that is not a write record
        }
    }

    applied
}
