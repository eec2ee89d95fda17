use crate::actor;
use crate::api::options::{ClusterOptions, ClusterOptionsValidated};
use crate::cluster::cluster_api::ReconfigureTarget;
use crate::cluster::{
    ClusterContext, ClusterError, ClusterStateView, Configuration, MemberId, MemberStateView, MemberType,
};
use crate::storage::{LogStorage, MetaStore};
use crate::transport::ReconfigureTransport;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct ClusterConfig<L, M, T> {
    pub info_logger: slog::Logger,
    pub local_member_id: MemberId,
    pub log_storage: L,
    pub meta_store: M,
    pub transport: Arc<T>,
    pub options: ClusterOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientCreationError {
    #[error("Invalid cluster options: {0}")]
    InvalidOptions(&'static str),
    #[error("Failed to initialize cluster state: {0}")]
    StateInitialization(ClusterError),
}

/// Builds the cluster context, spawns the actor event loop and returns the
/// handle to drive it. Must be called within a tokio runtime. The event loop
/// exits once the returned handle (and every clone of it) has dropped.
pub fn create_cluster_client<L, M, T>(config: ClusterConfig<L, M, T>) -> Result<ClusterHandle, ClientCreationError>
where
    L: LogStorage + 'static,
    M: MetaStore + 'static,
    T: ReconfigureTransport + 'static,
{
    let options = ClusterOptionsValidated::try_from(config.options).map_err(ClientCreationError::InvalidOptions)?;

    let context = ClusterContext::new(
        config.info_logger.clone(),
        config.local_member_id,
        config.log_storage,
        config.meta_store,
    )
    .map_err(ClientCreationError::StateInitialization)?;

    let (actor_client, cluster_actor) = actor::create(
        options.event_queue_size,
        context,
        config.transport,
        options.election_timeout,
        config.info_logger,
    );
    tokio::task::spawn(cluster_actor.run_event_loop());

    Ok(ClusterHandle { actor_client })
}

/// Client handle to one node's membership state. Cheap to clone; all clones
/// talk to the same actor.
#[derive(Clone)]
pub struct ClusterHandle {
    actor_client: actor::ActorClient,
}

impl ClusterHandle {
    /// Creates the cluster with the given founding members, all ACTIVE. With
    /// an existing persisted configuration this only re-joins it. Fails with
    /// `NotMember` if the local node ends up outside the configuration.
    pub async fn bootstrap(&self, member_ids: Vec<MemberId>) -> Result<(), ClusterError> {
        self.actor_client.bootstrap(member_ids).await
    }

    /// Scopes reconfigure operations to one member.
    pub fn member(&self, member_id: MemberId) -> MemberHandle {
        MemberHandle {
            member_id,
            actor_client: self.actor_client.clone(),
        }
    }

    /// Applies a configuration observed in the replicated log.
    pub async fn apply_configuration(&self, configuration: Configuration) -> Result<(), ClusterError> {
        self.actor_client.apply_configuration(configuration).await
    }

    /// Advances the commit index. Once it covers the current configuration's
    /// own log index, the configuration is finalized: any deferred local
    /// demotion applies and it is persisted. Commits of earlier entries
    /// leave the configuration untouched.
    pub async fn commit(&self, commit_index: u64) -> Result<(), ClusterError> {
        self.actor_client.commit(commit_index).await
    }

    /// Discards in-memory membership state and reloads it from durable
    /// storage.
    pub async fn reset(&self) -> Result<(), ClusterError> {
        self.actor_client.reset().await
    }

    pub async fn cluster_state(&self) -> Result<ClusterStateView, ClusterError> {
        self.actor_client.cluster_state().await
    }

    pub async fn member_state(&self, member_id: MemberId) -> Result<MemberStateView, ClusterError> {
        self.actor_client.member_state(member_id).await
    }
}

/// Reconfigure operations for a single member. Each call completes once the
/// resulting configuration has committed and been applied locally, retrying
/// internally while the cluster has no leader.
pub struct MemberHandle {
    member_id: MemberId,
    actor_client: actor::ActorClient,
}

impl MemberHandle {
    /// Promotes the member one step up the type ladder. Already at ACTIVE is
    /// a successful no-op.
    pub async fn promote(&self) -> Result<(), ClusterError> {
        self.reconfigure(ReconfigureTarget::Promote).await
    }

    /// Promotes the member directly to `member_type`. Fails with
    /// `InvalidArgument` if that would be a demotion.
    pub async fn promote_to(&self, member_type: MemberType) -> Result<(), ClusterError> {
        self.reconfigure(ReconfigureTarget::PromoteTo(member_type)).await
    }

    /// Demotes the member one step down the type ladder. Already at INACTIVE
    /// is a successful no-op.
    pub async fn demote(&self) -> Result<(), ClusterError> {
        self.reconfigure(ReconfigureTarget::Demote).await
    }

    /// Demotes the member directly to `member_type`. Fails with
    /// `InvalidArgument` if that would be a promotion.
    pub async fn demote_to(&self, member_type: MemberType) -> Result<(), ClusterError> {
        self.reconfigure(ReconfigureTarget::DemoteTo(member_type)).await
    }

    /// Takes the member out of service by demoting it to INACTIVE.
    pub async fn remove(&self) -> Result<(), ClusterError> {
        self.reconfigure(ReconfigureTarget::Remove).await
    }

    async fn reconfigure(&self, target: ReconfigureTarget) -> Result<(), ClusterError> {
        self.actor_client.reconfigure(self.member_id.clone(), target).await
    }
}
