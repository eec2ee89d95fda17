use crate::cluster::{Configuration, MemberId, MemberSnapshot, MemberType};
use chrono::TimeZone;
use prost::Message;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("Meta store IO failure: {0}")]
    Io(#[from] io::Error),

    #[error("Persisted configuration is corrupt: {0}")]
    Corrupt(String),
}

/// MetaStore holds the durably-agreed cluster configuration. Only committed
/// configurations are ever handed to `store_configuration`; an uncommitted one
/// could still be overwritten by a higher-term leader.
///
/// Both methods are synchronous from this crate's perspective; callers run
/// them on the cluster's sequential execution context.
pub trait MetaStore: Send {
    fn load_configuration(&self) -> Result<Option<Configuration>, MetaStoreError>;

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), MetaStoreError>;
}

/// In-memory meta store. Cloning shares the underlying slot, which lets tests
/// keep a handle and observe what the cluster persisted.
#[derive(Clone)]
pub struct InMemoryMetaStore {
    stored: Arc<Mutex<Option<Configuration>>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        InMemoryMetaStore {
            stored: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for InMemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStore for InMemoryMetaStore {
    fn load_configuration(&self) -> Result<Option<Configuration>, MetaStoreError> {
        Ok(self.stored.lock().expect("InMemoryMetaStore mutex guard poison").clone())
    }

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), MetaStoreError> {
        self.stored
            .lock()
            .expect("InMemoryMetaStore mutex guard poison")
            .replace(configuration.clone());
        Ok(())
    }
}

/// File-backed meta store. The configuration is written as a single
/// prost-encoded record; a temp-file-then-rename keeps a crash mid-write from
/// truncating the previous record.
pub struct FileMetaStore {
    path: PathBuf,
}

impl FileMetaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileMetaStore { path: path.into() }
    }
}

impl MetaStore for FileMetaStore {
    fn load_configuration(&self) -> Result<Option<Configuration>, MetaStoreError> {
        let encoded = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MetaStoreError::Io(e)),
        };

        let record = PersistedConfiguration::decode(encoded.as_slice())
            .map_err(|e| MetaStoreError::Corrupt(format!("{}", e)))?;

        decode_configuration(record).map(Some)
    }

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), MetaStoreError> {
        let record = encode_configuration(configuration);
        let mut encoded = Vec::with_capacity(record.encoded_len());
        record
            .encode(&mut encoded)
            .map_err(|e| MetaStoreError::Corrupt(format!("{}", e)))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &encoded)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

#[derive(Clone, PartialEq, Message)]
struct PersistedConfiguration {
    #[prost(uint64, tag = "1")]
    index: u64,
    #[prost(uint64, tag = "2")]
    term: u64,
    #[prost(int64, tag = "3")]
    timestamp_millis: i64,
    #[prost(message, repeated, tag = "4")]
    members: Vec<PersistedMember>,
}

#[derive(Clone, PartialEq, Message)]
struct PersistedMember {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, tag = "2")]
    member_type: String,
    #[prost(int64, tag = "3")]
    updated_millis: i64,
}

fn encode_configuration(configuration: &Configuration) -> PersistedConfiguration {
    PersistedConfiguration {
        index: configuration.index(),
        term: configuration.term(),
        timestamp_millis: configuration.timestamp().timestamp_millis(),
        members: configuration
            .members()
            .iter()
            .map(|m| PersistedMember {
                id: m.id.as_str().to_string(),
                member_type: m.member_type.persisted_name().to_string(),
                updated_millis: m.updated.timestamp_millis(),
            })
            .collect(),
    }
}

fn decode_configuration(record: PersistedConfiguration) -> Result<Configuration, MetaStoreError> {
    let mut members = Vec::with_capacity(record.members.len());
    for member in record.members {
        let member_type = MemberType::from_persisted(&member.member_type)
            .ok_or_else(|| MetaStoreError::Corrupt(format!("Unknown member type: {}", member.member_type)))?;
        members.push(MemberSnapshot {
            id: MemberId::new(member.id),
            member_type,
            updated: decode_millis(member.updated_millis)?,
        });
    }

    Ok(Configuration::new(
        record.index,
        record.term,
        decode_millis(record.timestamp_millis)?,
        members,
    ))
}

fn decode_millis(millis: i64) -> Result<chrono::DateTime<chrono::Utc>, MetaStoreError> {
    chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| MetaStoreError::Corrupt(format!("Timestamp out of range: {}", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("raft-cluster-meta-{}-{}", name, std::process::id()))
    }

    fn snapshot(id: &str, member_type: MemberType) -> MemberSnapshot {
        MemberSnapshot {
            id: MemberId::new(id),
            member_type,
            updated: Utc.timestamp_millis_opt(1_600_000_000_000).unwrap(),
        }
    }

    #[test]
    fn file_store_round_trip() {
        let path = test_file_path("round-trip");
        let mut store = FileMetaStore::new(&path);

        assert!(store.load_configuration().unwrap().is_none());

        let configuration = Configuration::new(
            7,
            3,
            Utc.timestamp_millis_opt(1_600_000_123_456).unwrap(),
            vec![snapshot("a", MemberType::Active), snapshot("b", MemberType::Passive)],
        );
        store.store_configuration(&configuration).unwrap();

        let loaded = store.load_configuration().unwrap().unwrap();
        assert_eq!(loaded, configuration);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn legacy_bootstrap_type_is_normalized_to_active() {
        let path = test_file_path("legacy-bootstrap");

        // Hand-write a record carrying the legacy BOOTSTRAP role name.
        let record = PersistedConfiguration {
            index: 0,
            term: 0,
            timestamp_millis: 1_600_000_000_000,
            members: vec![PersistedMember {
                id: "a".to_string(),
                member_type: "BOOTSTRAP".to_string(),
                updated_millis: 1_600_000_000_000,
            }],
        };
        let mut encoded = Vec::new();
        record.encode(&mut encoded).unwrap();
        std::fs::write(&path, &encoded).unwrap();

        let store = FileMetaStore::new(&path);
        let loaded = store.load_configuration().unwrap().unwrap();
        assert_eq!(loaded.members()[0].member_type, MemberType::Active);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_record_is_reported_not_swallowed() {
        let path = test_file_path("corrupt");
        std::fs::write(&path, b"\xFF\xFF\xFF\xFF").unwrap();

        let store = FileMetaStore::new(&path);
        match store.load_configuration() {
            Err(MetaStoreError::Corrupt(_)) => {}
            other => panic!("Expected corrupt error, got {:?}", other.map(|_| ())),
        }

        let _ = std::fs::remove_file(&path);
    }
}
