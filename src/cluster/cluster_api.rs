use crate::cluster::configuration::Configuration;
use crate::cluster::member::{MemberId, MemberType};
use crate::storage::{MetaStoreError, ReadMode};
use crate::transport::ReconfigureError;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Cluster has no configuration; bootstrap it first")]
    NotBootstrapped,

    #[error("Member {0:?} is not in the cluster configuration")]
    UnknownMember(MemberId),

    #[error("Local node is not a member of the cluster")]
    NotMember,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Cluster meta storage failed: {0}")]
    MetaStore(#[from] MetaStoreError),

    #[error("Reconfigure failed: {0}")]
    Reconfigure(#[from] ReconfigureError),

    #[error("Cluster actor has shut down")]
    Shutdown,
}

/// Which direction a reconfigure request moves one member's type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ReconfigureTarget {
    Promote,
    PromoteTo(MemberType),
    Demote,
    DemoteTo(MemberType),
    Remove,
}

/// Read-only snapshot of the cluster's membership state, answered by the
/// cluster actor. Consumed by election and replication collaborators.
#[derive(Clone, Debug)]
pub struct ClusterStateView {
    pub quorum: usize,
    pub local_member_type: MemberType,
    pub configuration: Option<Configuration>,
    pub active_member_ids: Vec<MemberId>,
}

/// Read-only snapshot of one remote member's replication progress.
#[derive(Clone, Debug)]
pub struct MemberStateView {
    pub member_type: MemberType,
    pub match_index: u64,
    pub reader_mode: ReadMode,
    pub failure_count: u32,
}
