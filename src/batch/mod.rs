//! Write Batching
//!
//! Connections acknowledge SET/DEL eagerly and hand them to a per-connection
//! [`WriteBatcher`], which applies them to the store in grouped batches.
//! See the `batcher` module docs for the durability trade-off this makes.

pub mod batcher;

// Re-export the batcher and its tuning constants
pub use batcher::{WriteBatcher, BATCH_SIZE_THRESHOLD, FLUSH_INTERVAL_MS};
