//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod options;

pub use client::create_cluster_client;
pub use client::ClientCreationError;
pub use client::ClusterConfig;
pub use client::ClusterHandle;
pub use client::MemberHandle;
pub use options::ClusterOptions;
