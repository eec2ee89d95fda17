mod in_memory;
mod log;
mod meta;

pub use in_memory::InMemoryLog;
pub use log::LogEntry;
pub use log::LogReader;
pub use log::LogStorage;
pub use log::ReadMode;
pub use meta::FileMetaStore;
pub use meta::InMemoryMetaStore;
pub use meta::MetaStore;
pub use meta::MetaStoreError;
