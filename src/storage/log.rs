use bytes::Bytes;
use std::io;

/// ReadMode controls which entries a log reader may observe.
///
/// Passive members only ever receive committed entries, so their readers are
/// opened in `CommittedOnly` mode. Promotable and active members need the full
/// log (including uncommitted entries) to catch up and eventually vote.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadMode {
    All,
    CommittedOnly,
}

/// LogStorage is the read-side interface to the consensus log. The log
/// component owns durability and ordering of entries; this crate only reads
/// via cursors.
///
/// Implementations must support multiple independent concurrent readers over
/// the same append-only structure (single-writer/multi-reader). Each reader is
/// an independent cursor; reads from one must not disturb another.
pub trait LogStorage: Send {
    /// Opens an independent cursor positioned at `start_index`.
    fn open_reader(&self, start_index: u64, mode: ReadMode) -> Box<dyn LogReader>;

    /// Index of the last appended entry, or 0 if the log is empty.
    fn last_index(&self) -> u64;
}

/// LogReader is an independent cursor over the log. Entries are indexed
/// starting from 1; index 0 means "nothing".
pub trait LogReader: Send {
    /// Returns the entry at the cursor position and advances the cursor, or
    /// `None` if no entry is visible there (yet) under this reader's mode.
    fn next_entry(&mut self) -> Result<Option<LogEntry>, io::Error>;

    /// The index the next `next_entry()` call will attempt to read.
    fn position(&self) -> u64;

    fn mode(&self) -> ReadMode;
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub data: Bytes,
}
