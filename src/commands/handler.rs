//! Command Dispatcher
//!
//! Maps a [`ParsedCommand`] onto a store operation and renders the reply.
//! One handler exists per connection, because the write batcher it owns is
//! per-connection state.
//!
//! ```text
//!                  ┌──────────────────┐
//!  ParsedCommand──>│  CommandHandler  │
//!                  └──────┬───────────┘
//!            writes       │       reads
//!         ┌───────────────┴───────────────┐
//!         ▼                               ▼
//! ┌───────────────┐               ┌──────────────┐
//! │ WriteBatcher  │──(batched)───>│    Store     │
//! └───────────────┘               └──────────────┘
//! ```
//!
//! SET and DEL are acknowledged with `OK` the moment they enter the batch,
//! before the store or the journal has seen them. GET, MGET, COMPACT, and
//! STATS execute synchronously.

use crate::batch::WriteBatcher;
use crate::metrics::Metrics;
use crate::protocol::{reply, ParsedCommand};
use crate::storage::Store;
use std::sync::Arc;

/// Executes commands for one connection.
#[derive(Debug)]
pub struct CommandHandler {
    store: Arc<Store>,
    batcher: WriteBatcher,
}

impl CommandHandler {
    /// Creates a handler (and its write batcher) over the shared store.
    pub fn new(store: Arc<Store>) -> Self {
        let batcher = WriteBatcher::start(Arc::clone(&store));
        Self { store, batcher }
    }

    /// Executes one command and returns the reply bytes to send.
    pub fn execute(&self, command: ParsedCommand) -> Vec<u8> {
        match command {
            cmd @ (ParsedCommand::Set { .. } | ParsedCommand::Del { .. }) => {
                self.batcher.add(cmd);
                reply::OK.to_vec()
            }
            ParsedCommand::Get { key } => match self.store.get(&key) {
                Some(value) => reply::value(&value),
                None => reply::NIL.to_vec(),
            },
            ParsedCommand::MGet { keys } => reply::values(&self.store.mget(&keys)),
            ParsedCommand::Compact => {
                self.store.compact();
                reply::OK.to_vec()
            }
            ParsedCommand::Stats => reply::line(Metrics::global().to_json().as_bytes()),
            ParsedCommand::Unknown => reply::UNKNOWN.to_vec(),
        }
    }

    /// Drains the write batch and stops its flush task. Called when the
    /// connection closes.
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;

    fn command(input: &[u8]) -> ParsedCommand {
        parse(input).unwrap().unwrap().0
    }

    async fn settle() {
        // Give the 10 ms batch flush a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_set_get_del_scenario() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(Arc::clone(&store));

        assert_eq!(handler.execute(command(b"SET foo bar\n")), b"OK\n");
        settle().await;
        assert_eq!(handler.execute(command(b"GET foo\n")), b"bar\n");

        assert_eq!(handler.execute(command(b"DEL foo\n")), b"OK\n");
        settle().await;
        assert_eq!(handler.execute(command(b"GET foo\n")), b"(nil)\n");

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_value_with_spaces_scenario() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(store);

        assert_eq!(
            handler.execute(command(b"SET greeting hello world\n")),
            b"OK\n"
        );
        settle().await;
        assert_eq!(handler.execute(command(b"GET greeting\n")), b"hello world\n");

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_mget_partial_scenario() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(store);

        handler.execute(command(b"SET a 1\n"));
        handler.execute(command(b"SET b 2\n"));
        settle().await;

        assert_eq!(handler.execute(command(b"MGET a b c\n")), b"1 2 (nil)\n");

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_compact_scenario() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let store = Arc::new(Store::open(&path));
        let handler = CommandHandler::new(Arc::clone(&store));

        for _ in 0..1_000 {
            handler.execute(command(b"SET churn x\n"));
            handler.execute(command(b"DEL churn\n"));
        }
        handler.execute(command(b"SET churn final\n"));
        handler.shutdown().await;
        store.flush_journal();

        let before = store.journal_size();
        let compact_handler = CommandHandler::new(Arc::clone(&store));
        assert_eq!(compact_handler.execute(command(b"COMPACT\n")), b"OK\n");
        assert!(store.journal_size() < before);
        assert_eq!(
            compact_handler.execute(command(b"GET churn\n")),
            b"final\n"
        );

        compact_handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_returns_json_line() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(store);

        let reply = handler.execute(command(b"STATS\n"));
        assert_eq!(*reply.last().unwrap(), b'\n');
        let parsed: serde_json::Value =
            serde_json::from_slice(&reply[..reply.len() - 1]).unwrap();
        assert!(parsed.get("cache_hits").is_some());
        assert!(parsed.get("histogram").is_some());

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(store);

        assert_eq!(
            handler.execute(command(b"FLUSH everything\n")),
            b"ERROR: Unknown command\n"
        );

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_length_prefixed_set_get() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(store);

        assert_eq!(
            handler.execute(command(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\nv 1\r\n")),
            b"OK\n"
        );
        settle().await;
        assert_eq!(
            handler.execute(command(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")),
            b"v 1\n"
        );

        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_eager_ack_then_visible_after_flush() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let handler = CommandHandler::new(Arc::clone(&store));

        // The OK lands before the store sees the write.
        assert_eq!(handler.execute(command(b"SET k v\n")), b"OK\n");
        settle().await;
        assert_eq!(store.get(&Bytes::from("k")), Some(Bytes::from("v")));

        handler.shutdown().await;
    }
}
