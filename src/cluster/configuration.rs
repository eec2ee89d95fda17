use crate::cluster::member::{MemberId, MemberType};
use chrono::{DateTime, Utc};

/// A member's identity and type as of one configuration's creation.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub member_type: MemberType,
    pub updated: DateTime<Utc>,
}

/// One agreed-upon membership: a versioned, immutable snapshot of
/// {index, term, timestamp, member set}. Configurations are totally ordered by
/// `index`; index 0 is reserved for the bootstrap configuration. A
/// configuration is replicated through the consensus log like any other entry
/// and only takes durable effect once its hosting log index is committed.
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    index: u64,
    term: u64,
    timestamp: DateTime<Utc>,
    members: Vec<MemberSnapshot>,
}

impl Configuration {
    pub fn new(index: u64, term: u64, timestamp: DateTime<Utc>, members: Vec<MemberSnapshot>) -> Self {
        Configuration {
            index,
            term,
            timestamp,
            members,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn members(&self) -> &[MemberSnapshot] {
        &self.members
    }

    pub fn member(&self, id: &MemberId) -> Option<&MemberSnapshot> {
        self.members.iter().find(|m| &m.id == id)
    }
}
