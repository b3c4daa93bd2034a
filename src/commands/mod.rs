//! Command Processing
//!
//! The dispatcher that turns parsed commands into store operations and
//! reply bytes.
//!
//! ```text
//! Client line / frame
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Wire Parser    │  (protocol module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │ SET/DEL via the batcher, reads straight through
//!          ▼
//! ┌─────────────────┐
//! │     Store       │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
