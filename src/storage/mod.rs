//! Storage Engine
//!
//! The durable core of EmberKV: a 16-way sharded in-memory map backed by an
//! append-only text journal.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐      ┌─────────┐       │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ ...  │ Shard 15│       │
//! │  └─────────┘ └─────────┘ └─────────┘      └─────────┘       │
//! │        │                                                    │
//! │        ▼                                                    │
//! │  ┌───────────┐      ┌────────────────────────────┐          │
//! │  │  Journal  │◀─────│       JournalFlusher       │          │
//! │  │ (text WAL)│      │ flush 100ms / compact 60s  │          │
//! │  └───────────┘      └────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! The journal is the only durable state; the shards are rebuilt from it on
//! startup. Appends are buffered and flushed on an interval, so the tail of
//! the journal can be lost on a crash. Compaction rewrites the file down to
//! one SET per live key and tees concurrent appends into the replacement
//! file so nothing written mid-compaction is dropped.

pub mod flusher;
mod journal;
pub mod store;

// Re-export commonly used types
pub use flusher::{start_journal_flusher, FlusherConfig, JournalFlusher};
pub use store::{now_ms, Entry, Store, NUM_SHARDS};
