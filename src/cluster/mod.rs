pub(crate) mod cluster_api;
mod configuration;
mod context;
mod member;
mod progress;
pub(crate) mod timers;

pub use cluster_api::ClusterError;
pub use cluster_api::ClusterStateView;
pub use cluster_api::MemberStateView;
pub use configuration::Configuration;
pub use configuration::MemberSnapshot;
pub use context::ClusterContext;
pub use member::Member;
pub use member::MemberId;
pub use member::MemberType;
pub use member::TypeChangeListener;
pub use progress::ReplicationProgress;
pub use progress::MAX_APPENDS_IN_FLIGHT;
