use crate::storage::log::{LogEntry, LogReader, LogStorage, ReadMode};
use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex};

/// In-memory log backed by a shared append-only vec. Readers hold a clone of
/// the shared handle and their own cursor, so any number of them can iterate
/// concurrently without disturbing each other.
#[derive(Clone)]
pub struct InMemoryLog {
    shared: Arc<Mutex<Shared>>,
}

struct Shared {
    entries: Vec<LogEntry>,
    commit_index: u64,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog {
            shared: Arc::new(Mutex::new(Shared {
                entries: Vec::new(),
                commit_index: 0,
            })),
        }
    }

    /// Appends an entry and returns its index. First entry lands at index 1.
    pub fn append(&self, term: u64, data: Bytes) -> u64 {
        let mut shared = self.lock();
        let index = shared.entries.len() as u64 + 1;
        shared.entries.push(LogEntry { index, term, data });
        index
    }

    /// Ratchets the commit index forward. A lower value is a no-op.
    pub fn set_commit_index(&self, commit_index: u64) {
        let mut shared = self.lock();
        if commit_index > shared.commit_index {
            shared.commit_index = commit_index;
        }
    }

    pub fn commit_index(&self) -> u64 {
        self.lock().commit_index
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("InMemoryLog mutex guard poison")
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStorage for InMemoryLog {
    fn open_reader(&self, start_index: u64, mode: ReadMode) -> Box<dyn LogReader> {
        Box::new(InMemoryReader {
            shared: self.shared.clone(),
            next_index: start_index.max(1),
            mode,
        })
    }

    fn last_index(&self) -> u64 {
        self.lock().entries.len() as u64
    }
}

struct InMemoryReader {
    shared: Arc<Mutex<Shared>>,
    next_index: u64,
    mode: ReadMode,
}

impl LogReader for InMemoryReader {
    fn next_entry(&mut self) -> Result<Option<LogEntry>, io::Error> {
        let shared = self.shared.lock().expect("InMemoryLog mutex guard poison");

        if self.mode == ReadMode::CommittedOnly && self.next_index > shared.commit_index {
            return Ok(None);
        }

        let entry = shared.entries.get((self.next_index - 1) as usize).cloned();
        if entry.is_some() {
            self.next_index += 1;
        }

        Ok(entry)
    }

    fn position(&self) -> u64 {
        self.next_index
    }

    fn mode(&self) -> ReadMode {
        self.mode
    }
}
