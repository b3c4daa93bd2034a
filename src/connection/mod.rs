//! Connection Handling
//!
//! One async task per accepted client. The handler accumulates bytes in a
//! `BytesMut` buffer, parses commands from either wire format (pipelining
//! falls out naturally), executes them through the per-connection
//! [`CommandHandler`](crate::commands::CommandHandler), and writes the
//! line-oriented replies back.
//!
//! ## Example
//!
//! ```ignore
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::commands::CommandHandler;
//! use emberkv::storage::Store;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! let store = Arc::new(Store::open("data/wal.log"));
//! let stats = Arc::new(ConnectionStats::new());
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let handler = CommandHandler::new(Arc::clone(&store));
//! tokio::spawn(handle_connection(
//!     stream,
//!     addr,
//!     handler,
//!     Arc::clone(&stats),
//!     shutdown_rx.clone(),
//! ));
//! // Later: shutdown_tx.send(true) tells every connection to drain and close.
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
