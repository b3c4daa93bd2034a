//! Wire Format Parser
//!
//! This module parses the two supported wire formats into [`ParsedCommand`]:
//!
//! 1. **Text**: one command per LF-terminated line, e.g. `SET greeting hello
//!    world\n`. The SET value is everything after the key; a trailing
//!    ` EX <seconds>` or ` TTL <seconds>` pair is stripped off as the TTL.
//! 2. **Length-prefixed**: an array of bulk strings, e.g.
//!    `*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`. Binary-safe; this is
//!    the form to use when values may contain spaces that look like a TTL
//!    suffix, or arbitrary bytes.
//!
//! The first byte selects the format: `*` means length-prefixed, anything
//! else is treated as a text line.
//!
//! ## How Parsing Works
//!
//! The parser is incremental. It reads from a buffer and returns either:
//! - `Ok(Some((command, consumed)))` - a complete command, `consumed` bytes used
//! - `Ok(None)` - the buffer holds only part of a command, read more first
//! - `Err(ParseError)` - the buffer is malformed
//!
//! The caller appends incoming network data to a buffer, calls [`parse`],
//! and advances the buffer by `consumed` on success. The same text-line
//! entry point is reused to decode journal records during replay, since a
//! journal record is just the text form of SET or DEL.

use crate::protocol::command::ParsedCommand;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while parsing the length-prefixed format.
///
/// Text lines never produce an error: a line that fails to match a known
/// command shape parses as [`ParsedCommand::Unknown`] instead, so the
/// dispatcher can reply `ERROR: Unknown command` and keep the connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer in an array header or bulk length
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array element count is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, wrong prefix byte, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A bulk string exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// First byte of a length-prefixed command.
const ARRAY_PREFIX: u8 = b'*';

/// Attempts to parse one command from the buffer.
///
/// See the module docs for the incremental contract.
pub fn parse(buf: &[u8]) -> ParseResult<Option<(ParsedCommand, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == ARRAY_PREFIX {
        parse_length_prefixed(buf)
    } else {
        parse_text(buf)
    }
}

// ── Text format ──────────────────────────────────────────────────────────────

/// Parses one LF-terminated text line from the buffer.
fn parse_text(buf: &[u8]) -> ParseResult<Option<(ParsedCommand, usize)>> {
    let newline = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => return Ok(None), // incomplete line
    };

    let mut line = &buf[..newline];
    // Tolerate CRLF from line-mode clients.
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }

    let command = match std::str::from_utf8(line) {
        Ok(s) => parse_text_line(s),
        Err(_) => ParsedCommand::Unknown,
    };

    Ok(Some((command, newline + 1)))
}

/// Parses a single text command line (no trailing newline).
///
/// This is also the journal record decoder: replay feeds each journal line
/// through here and applies the resulting SET/DEL.
pub fn parse_text_line(line: &str) -> ParsedCommand {
    let line = line.trim_start();
    let (name, rest) = match line.split_once(' ') {
        Some((name, rest)) => (name, rest),
        None => (line, ""),
    };

    match name {
        "SET" => {
            let (key, value) = match rest.trim_start().split_once(' ') {
                Some((key, value)) => (key, value.trim_start()),
                None => return ParsedCommand::Unknown,
            };
            if key.is_empty() {
                return ParsedCommand::Unknown;
            }
            let (value, ttl_seconds) = split_ttl_suffix(value);
            ParsedCommand::Set {
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::copy_from_slice(value.as_bytes()),
                ttl_seconds,
            }
        }
        "GET" => match first_token(rest) {
            Some(key) => ParsedCommand::Get { key },
            None => ParsedCommand::Unknown,
        },
        "DEL" => match first_token(rest) {
            Some(key) => ParsedCommand::Del { key },
            None => ParsedCommand::Unknown,
        },
        "MGET" => {
            let keys: Vec<Bytes> = rest
                .split_whitespace()
                .map(|t| Bytes::copy_from_slice(t.as_bytes()))
                .collect();
            if keys.is_empty() {
                ParsedCommand::Unknown
            } else {
                ParsedCommand::MGet { keys }
            }
        }
        "COMPACT" if rest.trim().is_empty() => ParsedCommand::Compact,
        "STATS" if rest.trim().is_empty() => ParsedCommand::Stats,
        _ => ParsedCommand::Unknown,
    }
}

/// Splits a trailing ` EX <seconds>` or ` TTL <seconds>` pair off a SET value.
///
/// Returns the value with the suffix removed and the TTL (0 when absent).
/// A value that is nothing but `EX <n>` is taken as a TTL with an empty
/// value; the length-prefixed format avoids this ambiguity entirely.
fn split_ttl_suffix(value: &str) -> (&str, u64) {
    let mut parts = value.rsplitn(3, ' ');
    if let (Some(num), Some(keyword)) = (parts.next(), parts.next()) {
        if keyword == "EX" || keyword == "TTL" {
            if let Ok(ttl) = num.parse::<u64>() {
                return (parts.next().unwrap_or(""), ttl);
            }
        }
    }
    (value, 0)
}

/// Extracts the first whitespace-delimited token as a key.
fn first_token(rest: &str) -> Option<Bytes> {
    rest.split_whitespace()
        .next()
        .map(|t| Bytes::copy_from_slice(t.as_bytes()))
}

// ── Length-prefixed format ───────────────────────────────────────────────────

/// Parses `*<n>\r\n` followed by n bulk strings `$<len>\r\n<bytes>\r\n`.
fn parse_length_prefixed(buf: &[u8]) -> ParseResult<Option<(ParsedCommand, usize)>> {
    debug_assert!(buf[0] == ARRAY_PREFIX);

    let count_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let count = parse_int(&buf[1..1 + count_end])?;
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let mut args: Vec<Bytes> = Vec::with_capacity(count as usize);
    let mut consumed = 1 + count_end + 2;

    for _ in 0..count {
        match parse_bulk_string(&buf[consumed..])? {
            Some((arg, used)) => {
                args.push(arg);
                consumed += used;
            }
            None => return Ok(None), // incomplete
        }
    }

    Ok(Some((command_from_args(&args), consumed)))
}

/// Parses one bulk string: `$<len>\r\n<bytes>\r\n`.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'$' {
        return Err(ParseError::ProtocolError(format!(
            "expected bulk string, got prefix {:#04x}",
            buf[0]
        )));
    }

    let len_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len = parse_int(&buf[1..1 + len_end])?;
    if len < 0 {
        return Err(ParseError::InvalidBulkLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let data_start = 1 + len_end + 2;
    let total = data_start + len + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[data_start + len..data_start + len + 2] != b"\r\n" {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    Ok(Some((
        Bytes::copy_from_slice(&buf[data_start..data_start + len]),
        total,
    )))
}

/// Maps a decoded argument array onto a command.
///
/// The length-prefixed SET takes exactly key and value; there is no TTL
/// suffix in this form.
fn command_from_args(args: &[Bytes]) -> ParsedCommand {
    let name = match args.first() {
        Some(name) => name,
        None => return ParsedCommand::Unknown,
    };

    if name.eq_ignore_ascii_case(b"SET") && args.len() == 3 {
        ParsedCommand::Set {
            key: args[1].clone(),
            value: args[2].clone(),
            ttl_seconds: 0,
        }
    } else if name.eq_ignore_ascii_case(b"GET") && args.len() == 2 {
        ParsedCommand::Get {
            key: args[1].clone(),
        }
    } else if name.eq_ignore_ascii_case(b"DEL") && args.len() == 2 {
        ParsedCommand::Del {
            key: args[1].clone(),
        }
    } else if name.eq_ignore_ascii_case(b"MGET") && args.len() >= 2 {
        ParsedCommand::MGet {
            keys: args[1..].to_vec(),
        }
    } else if name.eq_ignore_ascii_case(b"COMPACT") && args.len() == 1 {
        ParsedCommand::Compact
    } else {
        ParsedCommand::Unknown
    }
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_int(buf: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(buf)
        .map_err(|e| ParseError::InvalidInteger(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}
