mod actor;
mod api;
mod cluster;
mod storage;
mod transport;

pub use api::create_cluster_client;
pub use api::ClientCreationError;
pub use api::ClusterConfig;
pub use api::ClusterHandle;
pub use api::ClusterOptions;
pub use api::MemberHandle;
pub use cluster::ClusterContext;
pub use cluster::ClusterError;
pub use cluster::ClusterStateView;
pub use cluster::Configuration;
pub use cluster::Member;
pub use cluster::MemberId;
pub use cluster::MemberSnapshot;
pub use cluster::MemberStateView;
pub use cluster::MemberType;
pub use cluster::ReplicationProgress;
pub use cluster::TypeChangeListener;
pub use cluster::MAX_APPENDS_IN_FLIGHT;
pub use storage::FileMetaStore;
pub use storage::InMemoryLog;
pub use storage::InMemoryMetaStore;
pub use storage::LogEntry;
pub use storage::LogReader;
pub use storage::LogStorage;
pub use storage::MetaStore;
pub use storage::MetaStoreError;
pub use storage::ReadMode;
pub use transport::ReconfigureError;
pub use transport::ReconfigureRequest;
pub use transport::ReconfigureResponse;
pub use transport::ReconfigureTransport;
