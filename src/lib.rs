//! # EmberKV
//!
//! An in-memory key-value cache server with a durable write-ahead journal.
//!
//! ## Features
//!
//! - **Sharded storage**: 16 independently locked shards for concurrent access
//! - **Write-ahead journal**: an append-only text log replayed on restart
//! - **Online compaction**: the journal is rewritten to one SET per live key
//!   without stopping writers
//! - **Per-entry TTL**: expired keys are evicted lazily on read and dropped
//!   during compaction
//! - **Write batching**: each connection coalesces SET/DEL into grouped
//!   store applications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │              │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │              │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘              │
//! │                                               │                     │
//! │                           writes              │        reads        │
//! │                      ┌────────────────────────┴──────────┐          │
//! │                      ▼                                   ▼          │
//! │              ┌──────────────┐                   ┌──────────────┐    │
//! │              │ WriteBatcher │──────(drain)─────>│    Store     │    │
//! │              └──────────────┘                   │  16 shards   │    │
//! │                                                 └──────┬───────┘    │
//! │                                                        ▼            │
//! │  ┌────────────────┐  flush / compact          ┌──────────────┐      │
//! │  │ JournalFlusher │──────────────────────────>│   Journal    │      │
//! │  │ (background)   │                           │ (text WAL)   │      │
//! │  └────────────────┘                           └──────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! Writes are acknowledged `OK` as soon as they enter the connection's
//! batch, before the store or the journal has seen them, and journal
//! appends are flushed to the OS on a 100 ms interval. This is the right
//! trade for cache workloads and the wrong one for source-of-truth data:
//! a crash can lose acknowledged writes. Clients that need synchronous
//! durability should not use this server as their system of record.
//!
//! ## Wire Formats
//!
//! Text, one command per LF-terminated line:
//!
//! ```text
//! SET key value            SET key value EX 60
//! GET key                  DEL key
//! MGET k1 k2 k3            COMPACT        STATS
//! ```
//!
//! Length-prefixed (binary-safe, no TTL form): `*<n>\r\n` followed by n
//! bulk strings `$<len>\r\n<bytes>\r\n`. Prefer it when values can contain
//! arbitrary bytes; a text value ending in ` EX <n>` is otherwise taken as
//! a TTL suffix.
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::CommandHandler;
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::storage::{start_journal_flusher, Store};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(Store::open("data/wal.log"));
//!     let _flusher = start_journal_flusher(Arc::clone(&store));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     let listener = TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&store));
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr,
//!             handler,
//!             Arc::clone(&stats),
//!             shutdown_rx.clone(),
//!         ));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire parsing and the command/reply types
//! - [`storage`]: the sharded store, journal, and background flusher
//! - [`batch`]: per-connection write batching
//! - [`commands`]: command dispatch
//! - [`connection`]: client connection management
//! - [`metrics`]: process-wide counters behind the STATS command

pub mod batch;
pub mod commands;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use batch::WriteBatcher;
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use metrics::Metrics;
pub use protocol::{parse, ParseError, ParsedCommand};
pub use storage::{start_journal_flusher, FlusherConfig, JournalFlusher, Store};

/// The default port EmberKV listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default journal path when none is given on the command line
pub const DEFAULT_JOURNAL_PATH: &str = "data/wal.log";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
