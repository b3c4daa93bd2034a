//! Write-Ahead Journal
//!
//! The journal is the only durable state: an append-only UTF-8 text file of
//! LF-terminated records, each the text form of a write command:
//!
//! ```text
//! SET <key> <value>
//! SET <key> <value> EX <seconds>
//! DEL <key>
//! ```
//!
//! Appends go through a buffered writer; the background flusher pushes the
//! buffer to the OS every ~100 ms. Journal I/O failures are logged and
//! swallowed: the in-memory store keeps serving, at the cost of durability
//! for the affected records.
//!
//! ## Compaction Rewrite
//!
//! Compaction shrinks the file to one SET per live key. The store drives it
//! through the rewrite API here:
//!
//! 1. [`Journal::begin_rewrite`] opens `<path>.tmp` truncating. From this
//!    point until the swap, [`Journal::append`] writes every record to both
//!    the live file and the temp file, so writes that land while the
//!    snapshot is being taken survive the swap.
//! 2. The store writes one snapshot record per live entry via
//!    [`Journal::write_rewrite`].
//! 3. [`Journal::commit_rewrite`] closes the live handle, renames the temp
//!    file over the live path (atomic on the same filesystem), and reopens
//!    the append handle.
//!
//! If any step fails, the journal guarantees that either the old file is
//! intact or the new file is fully in place, never neither.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::warn;

/// One journal record, borrowed from the write being applied.
#[derive(Debug)]
pub(crate) enum Record<'a> {
    Set {
        key: &'a [u8],
        value: &'a [u8],
        ttl_seconds: u64,
    },
    Del {
        key: &'a [u8],
    },
}

impl Record<'_> {
    /// Encodes the record in journal text form, LF-terminated.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Record::Set {
                key,
                value,
                ttl_seconds,
            } => {
                out.extend_from_slice(b"SET ");
                out.extend_from_slice(key);
                out.push(b' ');
                out.extend_from_slice(value);
                if *ttl_seconds > 0 {
                    out.extend_from_slice(b" EX ");
                    out.extend_from_slice(ttl_seconds.to_string().as_bytes());
                }
                out.push(b'\n');
            }
            Record::Del { key } => {
                out.extend_from_slice(b"DEL ");
                out.extend_from_slice(key);
                out.push(b'\n');
            }
        }
    }
}

/// The append side of the journal file. All access is serialized by the
/// store's journal mutex; nothing here locks.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rewrite: Option<BufWriter<File>>,
}

impl Journal {
    /// Creates a journal over `path` without opening anything yet. The store
    /// replays the existing file first and then calls [`Journal::open_append`].
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            rewrite: None,
        }
    }

    /// Opens the append handle. Failure leaves the journal closed (the store
    /// runs memory-only) and logs a warning.
    pub(crate) fn open_append(&mut self) {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => self.writer = Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not open journal file");
                self.writer = None;
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Appends one record to the live file, and to the rewrite target while
    /// a compaction is in flight.
    pub(crate) fn append(&mut self, record: &Record<'_>) {
        if self.writer.is_none() {
            return;
        }
        let mut encoded = Vec::new();
        record.encode(&mut encoded);

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write_all(&encoded) {
                warn!(path = %self.path.display(), error = %e, "journal append failed");
            }
        }
        if let Some(rewrite) = self.rewrite.as_mut() {
            if let Err(e) = rewrite.write_all(&encoded) {
                warn!(path = %self.path.display(), error = %e, "journal rewrite append failed");
            }
        }
    }

    /// Flushes the write buffer to the OS.
    pub(crate) fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "journal flush failed");
            }
        }
    }

    /// Current size of the journal file on disk, 0 if it cannot be stat'd.
    pub(crate) fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    }

    /// Opens the temp file and starts teeing appends into it. Returns false
    /// (with a warning) if the temp file cannot be created.
    pub(crate) fn begin_rewrite(&mut self) -> bool {
        let tmp = self.tmp_path();
        match File::create(&tmp) {
            Ok(file) => {
                self.rewrite = Some(BufWriter::new(file));
                true
            }
            Err(e) => {
                warn!(path = %tmp.display(), error = %e, "could not open temp file for compaction");
                false
            }
        }
    }

    /// Writes one snapshot record to the rewrite target only.
    pub(crate) fn write_rewrite(&mut self, record: &Record<'_>) {
        if let Some(rewrite) = self.rewrite.as_mut() {
            let mut encoded = Vec::new();
            record.encode(&mut encoded);
            if let Err(e) = rewrite.write_all(&encoded) {
                warn!(error = %e, "compaction snapshot write failed");
            }
        }
    }

    /// Swaps the rewrite target over the live file and reopens for append.
    ///
    /// On rename failure the old file stays in place and appends resume
    /// against it.
    pub(crate) fn commit_rewrite(&mut self) {
        let rewrite = match self.rewrite.take() {
            Some(rewrite) => rewrite,
            None => return,
        };

        match rewrite.into_inner() {
            Ok(file) => {
                if let Err(e) = file.sync_all() {
                    warn!(error = %e, "could not sync temp journal before swap");
                }
            }
            Err(e) => {
                warn!(error = %e, "could not flush temp journal, keeping old file");
                let _ = std::fs::remove_file(self.tmp_path());
                return;
            }
        }

        // Close the live handle before renaming over its path.
        self.close();

        let tmp = self.tmp_path();
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to rename temp journal during compaction");
            let _ = std::fs::remove_file(&tmp);
        }

        self.open_append();
        if !self.is_open() {
            warn!(path = %self.path.display(), "could not reopen journal after compaction");
        }
    }

    /// Drops the rewrite target and deletes the temp file.
    pub(crate) fn abort_rewrite(&mut self) {
        if self.rewrite.take().is_some() {
            let _ = std::fs::remove_file(self.tmp_path());
        }
    }

    /// Flushes and closes the append handle.
    pub(crate) fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "journal flush on close failed");
            }
        }
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.abort_rewrite();
        self.close();
    }
}
