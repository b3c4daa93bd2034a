//! Command and Reply Types
//!
//! This module defines the parsed command variant that flows from the wire
//! parser to the dispatcher, and the helpers that render the line-oriented
//! replies sent back to clients.
//!
//! ## Reply Format
//!
//! Every reply is LF-terminated:
//!
//! - `OK\n` for acknowledged writes, COMPACT, and similar
//! - `(nil)\n` for a missing or expired key
//! - the raw value followed by `\n` for GET
//! - space-separated values (with `(nil)` holes) for MGET
//! - a JSON object for STATS
//! - `ERROR: <msg>\n` for anything invalid

use bytes::Bytes;
use std::fmt;

/// A command parsed from either wire format.
///
/// SET and DEL are the write commands; only they enter the per-connection
/// write batch. Everything else executes synchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// `SET <key> <value>` with an optional TTL in seconds (0 = no expiry).
    Set {
        key: Bytes,
        value: Bytes,
        ttl_seconds: u64,
    },

    /// `GET <key>`
    Get { key: Bytes },

    /// `DEL <key>`
    Del { key: Bytes },

    /// `MGET <key1> <key2> ...` (at least one key)
    MGet { keys: Vec<Bytes> },

    /// `COMPACT` - rewrite the journal down to one SET per live key.
    Compact,

    /// `STATS` - dump the metrics JSON.
    Stats,

    /// Anything that failed to parse as one of the above.
    Unknown,
}

impl ParsedCommand {
    /// Returns true for the commands that go through the write batcher.
    pub fn is_write(&self) -> bool {
        matches!(self, ParsedCommand::Set { .. } | ParsedCommand::Del { .. })
    }

    /// The command keyword, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ParsedCommand::Set { .. } => "SET",
            ParsedCommand::Get { .. } => "GET",
            ParsedCommand::Del { .. } => "DEL",
            ParsedCommand::MGet { .. } => "MGET",
            ParsedCommand::Compact => "COMPACT",
            ParsedCommand::Stats => "STATS",
            ParsedCommand::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reply rendering helpers used by the dispatcher.
pub mod reply {
    use bytes::Bytes;

    /// Acknowledgment for writes and COMPACT.
    pub const OK: &[u8] = b"OK\n";

    /// Sentinel for a missing or expired key.
    pub const NIL: &[u8] = b"(nil)\n";

    /// Reply for unparseable or unsupported input.
    pub const UNKNOWN: &[u8] = b"ERROR: Unknown command\n";

    /// A raw value followed by LF.
    pub fn value(v: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(v.len() + 1);
        out.extend_from_slice(v);
        out.push(b'\n');
        out
    }

    /// MGET reply: values space-separated in input order, missing keys
    /// rendered as `(nil)`, terminated by LF.
    pub fn values(items: &[Option<Bytes>]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            match item {
                Some(v) => out.extend_from_slice(v),
                None => out.extend_from_slice(b"(nil)"),
            }
        }
        out.push(b'\n');
        out
    }

    /// A line of arbitrary bytes (used for the STATS JSON) plus LF.
    pub fn line(bytes: &[u8]) -> Vec<u8> {
        value(bytes)
    }
}
