use crate::cluster::cluster_api::ReconfigureTarget;
use crate::cluster::timers::RetryTimerHandle;
use crate::cluster::{
    ClusterContext, ClusterError, ClusterStateView, Configuration, MemberId, MemberSnapshot, MemberStateView,
    MemberType,
};
use crate::storage::{LogStorage, MetaStore};
use crate::transport::{ReconfigureError, ReconfigureRequest, ReconfigureResponse, ReconfigureTransport};
use chrono::Utc;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

pub fn create<L, M, T>(
    buffer_size: usize,
    context: ClusterContext<L, M>,
    transport: Arc<T>,
    election_timeout: Duration,
    logger: slog::Logger,
) -> (ActorClient, ClusterActor<L, M, T>)
where
    L: LogStorage,
    M: MetaStore,
    T: ReconfigureTransport + 'static,
{
    let (client, receiver) = ActorClient::new(buffer_size);
    let actor = ClusterActor {
        logger,
        receiver,
        weak_client: client.weak(),
        context,
        transport,
        election_timeout,
        pending: HashMap::new(),
        next_op_id: 0,
    };

    (client, actor)
}

// All membership state is owned by the single actor task; callers interact
// through the event queue. Transport calls and retry timers run on their own
// tasks and come back as events, so nothing here ever blocks the loop.
#[derive(Debug)]
pub(crate) enum Event {
    // Create (or re-join) the cluster. Idempotent against an existing
    // configuration.
    Bootstrap(Vec<MemberId>, Callback<(), ClusterError>),

    // User-initiated promote/demote/remove of one member. Completes only once
    // the resulting configuration has been applied, possibly after retries.
    Reconfigure {
        member_id: MemberId,
        target: ReconfigureTarget,
        callback: Callback<(), ClusterError>,
    },

    // A configuration observed in the replicated log (or from a leader)
    // that should be applied to the local context.
    ApplyConfiguration(Configuration, Callback<(), ClusterError>),

    // The log entry hosting the current configuration is known committed.
    Commit {
        commit_index: u64,
        callback: Callback<(), ClusterError>,
    },

    // Recovery: discard in-memory state, reload from durable storage.
    Reset(Callback<(), ClusterError>),

    // Outcome of one transport submission, sent by the submission task.
    ReconfigureReply {
        op_id: u64,
        result: Result<ReconfigureResponse, ReconfigureError>,
    },

    // Backoff elapsed for a pending reconfigure, sent by its retry timer.
    ReconfigureRetry {
        op_id: u64,
    },

    GetClusterState(Callback<ClusterStateView, ClusterError>),
    GetMemberState(MemberId, Callback<MemberStateView, ClusterError>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

/// Strong handle to the cluster actor. The event loop runs for as long as at
/// least one `ActorClient` is alive; internal tasks hold `WeakActorClient`s
/// so they never keep the loop running on their own.
#[derive(Clone)]
pub struct ActorClient {
    sender: Arc<mpsc::Sender<Event>>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let client = ActorClient { sender: Arc::new(tx) };

        (client, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: Arc::downgrade(&self.sender),
        }
    }

    pub async fn bootstrap(&self, member_ids: Vec<MemberId>) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Bootstrap(member_ids, Callback(tx))).await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub(crate) async fn reconfigure(&self, member_id: MemberId, target: ReconfigureTarget) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Reconfigure {
            member_id,
            target,
            callback: Callback(tx),
        })
        .await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub async fn apply_configuration(&self, configuration: Configuration) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ApplyConfiguration(configuration, Callback(tx))).await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub async fn commit(&self, commit_index: u64) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Commit {
            commit_index,
            callback: Callback(tx),
        })
        .await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub async fn reset(&self) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Reset(Callback(tx))).await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub async fn cluster_state(&self) -> Result<ClusterStateView, ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetClusterState(Callback(tx))).await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    pub async fn member_state(&self, member_id: MemberId) -> Result<MemberStateView, ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetMemberState(member_id, Callback(tx))).await?;

        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    async fn send(&self, event: Event) -> Result<(), ClusterError> {
        self.sender.send(event).await.map_err(|_| ClusterError::Shutdown)
    }
}

/// Handle used by timer and transport tasks. Sends are best-effort: if the
/// actor has shut down, there is nobody left to act on the event.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: Weak<mpsc::Sender<Event>>,
}

impl WeakActorClient {
    pub(crate) async fn reconfigure_reply(&self, op_id: u64, result: Result<ReconfigureResponse, ReconfigureError>) {
        self.send(Event::ReconfigureReply { op_id, result }).await;
    }

    pub(crate) async fn reconfigure_retry(&self, op_id: u64) {
        self.send(Event::ReconfigureRetry { op_id }).await;
    }

    async fn send(&self, event: Event) {
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(event).await;
        }
    }
}

struct PendingReconfigure {
    member_id: MemberId,
    target_type: MemberType,
    callback: Callback<(), ClusterError>,
    attempts: u32,
    // Present while waiting out a backoff. Dropping it cancels the timer.
    retry_timer: Option<RetryTimerHandle>,
}

/// ClusterActor is the membership logic in actor model.
pub struct ClusterActor<L, M, T>
where
    L: LogStorage,
    M: MetaStore,
    T: ReconfigureTransport + 'static,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    weak_client: WeakActorClient,
    context: ClusterContext<L, M>,
    transport: Arc<T>,
    election_timeout: Duration,
    pending: HashMap<u64, PendingReconfigure>,
    next_op_id: u64,
}

impl<L, M, T> ClusterActor<L, M, T>
where
    L: LogStorage,
    M: MetaStore,
    T: ReconfigureTransport + 'static,
{
    /// Runs until every strong `ActorClient` has dropped, then fails whatever
    /// reconfigure operations were still pending.
    pub async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }

        self.shutdown();
    }

    // This must NOT be async. Any long running work must be spawned on another
    // task and/or come back as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Bootstrap(member_ids, callback) => {
                callback.send(self.context.bootstrap(member_ids));
            }
            Event::Reconfigure {
                member_id,
                target,
                callback,
            } => {
                self.handle_reconfigure(member_id, target, callback);
            }
            Event::ApplyConfiguration(configuration, callback) => {
                callback.send(self.context.configure(&configuration));
            }
            Event::Commit { commit_index, callback } => {
                self.context.update_commit_index(commit_index);
                callback.send(self.context.commit());
            }
            Event::Reset(callback) => {
                callback.send(self.context.reset());
            }
            Event::ReconfigureReply { op_id, result } => {
                self.handle_reconfigure_reply(op_id, result);
            }
            Event::ReconfigureRetry { op_id } => {
                self.handle_reconfigure_retry(op_id);
            }
            Event::GetClusterState(callback) => {
                callback.send(Ok(self.cluster_state_view()));
            }
            Event::GetMemberState(member_id, callback) => {
                callback.send(self.member_state_view(&member_id));
            }
        }
    }

    fn handle_reconfigure(&mut self, member_id: MemberId, target: ReconfigureTarget, callback: Callback<(), ClusterError>) {
        let configuration = match self.context.current_configuration() {
            Some(c) => c,
            None => {
                callback.send(Err(ClusterError::NotBootstrapped));
                return;
            }
        };

        let current_type = if &member_id == self.context.local_member().id() {
            self.context.local_member().member_type()
        } else {
            match configuration.member(&member_id) {
                Some(snapshot) => snapshot.member_type,
                None => {
                    callback.send(Err(ClusterError::UnknownMember(member_id)));
                    return;
                }
            }
        };

        let target_type = match resolve_target_type(current_type, target) {
            Ok(Some(target_type)) => target_type,
            Ok(None) => {
                // Already there. Complete without touching the cluster.
                callback.send(Ok(()));
                return;
            }
            Err(e) => {
                callback.send(Err(e));
                return;
            }
        };

        let request = ReconfigureRequest {
            index: configuration.index(),
            term: configuration.term(),
            member: MemberSnapshot {
                id: member_id.clone(),
                member_type: target_type,
                updated: Utc::now(),
            },
        };

        let op_id = self.next_op_id;
        self.next_op_id += 1;
        slog::info!(
            self.logger,
            "Submitting reconfigure op {}: {:?} {:?} -> {:?}",
            op_id,
            member_id,
            current_type,
            target_type
        );

        self.pending.insert(
            op_id,
            PendingReconfigure {
                member_id,
                target_type,
                callback,
                attempts: 0,
                retry_timer: None,
            },
        );
        self.spawn_submit(op_id, request);
    }

    fn handle_reconfigure_reply(&mut self, op_id: u64, result: Result<ReconfigureResponse, ReconfigureError>) {
        let mut pending = match self.pending.remove(&op_id) {
            Some(pending) => pending,
            // Cancelled at shutdown, or a late reply after we already
            // completed. Nothing to do.
            None => return,
        };

        match result {
            Ok(response) => {
                slog::info!(
                    self.logger,
                    "Reconfigure op {} committed at index {}",
                    op_id,
                    response.index
                );
                self.context.update_commit_index(response.index);
                let configuration =
                    Configuration::new(response.index, response.term, response.timestamp, response.members);
                let outcome = self
                    .context
                    .configure(&configuration)
                    .and_then(|_| self.context.commit());
                pending.callback.send(outcome);
            }
            Err(error) if error.is_retryable() => {
                pending.attempts += 1;
                let delay = retry_delay(self.election_timeout, pending.attempts);
                slog::info!(
                    self.logger,
                    "Reconfigure op {} attempt {} failed ({}); retrying in {:?}",
                    op_id,
                    pending.attempts,
                    error,
                    delay
                );
                pending.retry_timer = Some(RetryTimerHandle::spawn(delay, op_id, self.weak_client.clone()));
                self.pending.insert(op_id, pending);
            }
            Err(error) => {
                slog::warn!(self.logger, "Reconfigure op {} rejected: {}", op_id, error);
                pending.callback.send(Err(ClusterError::Reconfigure(error)));
            }
        }
    }

    fn handle_reconfigure_retry(&mut self, op_id: u64) {
        let (index, term) = match self.context.current_configuration() {
            Some(configuration) => (configuration.index(), configuration.term()),
            None => {
                if let Some(pending) = self.pending.remove(&op_id) {
                    pending.callback.send(Err(ClusterError::NotBootstrapped));
                }
                return;
            }
        };

        let pending = match self.pending.get_mut(&op_id) {
            Some(pending) => pending,
            None => return,
        };
        pending.retry_timer = None;

        // Rebuild against the configuration as it stands now; the one the
        // original request was built from may have been superseded.
        let request = ReconfigureRequest {
            index,
            term,
            member: MemberSnapshot {
                id: pending.member_id.clone(),
                member_type: pending.target_type,
                updated: Utc::now(),
            },
        };
        let member_id = pending.member_id.clone();

        slog::info!(self.logger, "Retrying reconfigure op {} for {:?}", op_id, member_id);
        self.spawn_submit(op_id, request);
    }

    fn spawn_submit(&self, op_id: u64, request: ReconfigureRequest) {
        let transport = self.transport.clone();
        let weak_client = self.weak_client.clone();
        tokio::task::spawn(async move {
            let result = transport.submit_reconfigure(request).await;
            weak_client.reconfigure_reply(op_id, result).await;
        });
    }

    fn cluster_state_view(&self) -> ClusterStateView {
        ClusterStateView {
            quorum: self.context.quorum(),
            local_member_type: self.context.local_member().member_type(),
            configuration: self.context.current_configuration().cloned(),
            active_member_ids: self.context.member_ids_with_type(MemberType::Active),
        }
    }

    fn member_state_view(&self, member_id: &MemberId) -> Result<MemberStateView, ClusterError> {
        match self.context.progress(member_id) {
            Some(progress) => Ok(MemberStateView {
                member_type: progress.member_type(),
                match_index: progress.match_index(),
                reader_mode: progress.reader_mode(),
                failure_count: progress.failure_count(),
            }),
            None => Err(ClusterError::UnknownMember(member_id.clone())),
        }
    }

    fn shutdown(self) {
        slog::info!(self.logger, "Cluster actor shutting down");
        for (_, pending) in self.pending {
            pending.callback.send(Err(ClusterError::Shutdown));
        }
        self.context.close();
    }
}

/// Resolves a reconfigure request to the member type it should produce.
/// `Ok(None)` means the member is already where the request would put it.
fn resolve_target_type(current: MemberType, target: ReconfigureTarget) -> Result<Option<MemberType>, ClusterError> {
    match target {
        ReconfigureTarget::Promote => Ok(current.next_higher()),
        ReconfigureTarget::Demote => Ok(current.next_lower()),
        ReconfigureTarget::PromoteTo(target_type) => {
            if target_type == current {
                Ok(None)
            } else if target_type > current {
                Ok(Some(target_type))
            } else {
                Err(ClusterError::InvalidArgument(format!(
                    "Cannot promote {:?} member to {:?}",
                    current, target_type
                )))
            }
        }
        ReconfigureTarget::DemoteTo(target_type) => {
            if target_type == current {
                Ok(None)
            } else if target_type < current {
                Ok(Some(target_type))
            } else {
                Err(ClusterError::InvalidArgument(format!(
                    "Cannot demote {:?} member to {:?}",
                    current, target_type
                )))
            }
        }
        ReconfigureTarget::Remove => {
            if current == MemberType::Inactive {
                Ok(None)
            } else {
                Ok(Some(MemberType::Inactive))
            }
        }
    }
}

/// First retry waits one election timeout; every later retry waits two. There
/// is no retry cap: a cluster without a leader can stay that way arbitrarily
/// long, and the operation should complete once one is elected.
fn retry_delay(election_timeout: Duration, attempts: u32) -> Duration {
    if attempts <= 1 {
        election_timeout
    } else {
        election_timeout * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryLog, InMemoryMetaStore};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    struct LeaderlessTransport;

    #[async_trait::async_trait]
    impl ReconfigureTransport for LeaderlessTransport {
        async fn submit_reconfigure(
            &self,
            _request: ReconfigureRequest,
        ) -> Result<ReconfigureResponse, ReconfigureError> {
            Err(ReconfigureError::NoLeader)
        }
    }

    #[tokio::test]
    async fn shutdown_fails_pending_reconfigures() {
        let context = ClusterContext::new(
            test_logger(),
            MemberId::new("a"),
            InMemoryLog::new(),
            InMemoryMetaStore::new(),
        )
        .unwrap();
        let (client, mut actor) = create(
            10,
            context,
            Arc::new(LeaderlessTransport),
            Duration::from_secs(10),
            test_logger(),
        );

        // A reconfigure stuck waiting out a long backoff.
        let (tx, rx) = oneshot::channel();
        actor.pending.insert(
            9,
            PendingReconfigure {
                member_id: MemberId::new("b"),
                target_type: MemberType::Passive,
                callback: Callback(tx),
                attempts: 1,
                retry_timer: None,
            },
        );

        // Last strong client gone: the loop must exit rather than wait for
        // a retry that can no longer be observed, failing the callback.
        drop(client);
        actor.run_event_loop().await;

        match rx.await.unwrap() {
            Err(ClusterError::Shutdown) => {}
            other => panic!("Expected Shutdown, got {:?}", other),
        }
    }

    #[test]
    fn retry_delay_doubles_after_first_attempt() {
        let election_timeout = Duration::from_millis(250);
        assert_eq!(retry_delay(election_timeout, 1), election_timeout);
        assert_eq!(retry_delay(election_timeout, 2), election_timeout * 2);
        assert_eq!(retry_delay(election_timeout, 100), election_timeout * 2);
    }

    #[test]
    fn resolve_promote_walks_one_step_and_saturates() {
        assert_eq!(
            resolve_target_type(MemberType::Passive, ReconfigureTarget::Promote).unwrap(),
            Some(MemberType::Promotable)
        );
        // Already at the top: no-op, not an error.
        assert_eq!(
            resolve_target_type(MemberType::Active, ReconfigureTarget::Promote).unwrap(),
            None
        );
        assert_eq!(
            resolve_target_type(MemberType::Inactive, ReconfigureTarget::Demote).unwrap(),
            None
        );
    }

    #[test]
    fn resolve_targeted_moves_validate_direction() {
        assert_eq!(
            resolve_target_type(MemberType::Passive, ReconfigureTarget::PromoteTo(MemberType::Active)).unwrap(),
            Some(MemberType::Active)
        );
        assert_eq!(
            resolve_target_type(MemberType::Active, ReconfigureTarget::DemoteTo(MemberType::Passive)).unwrap(),
            Some(MemberType::Passive)
        );
        // Same type either direction: no-op.
        assert_eq!(
            resolve_target_type(MemberType::Active, ReconfigureTarget::PromoteTo(MemberType::Active)).unwrap(),
            None
        );

        assert!(matches!(
            resolve_target_type(MemberType::Active, ReconfigureTarget::PromoteTo(MemberType::Passive)),
            Err(ClusterError::InvalidArgument(_))
        ));
        assert!(matches!(
            resolve_target_type(MemberType::Passive, ReconfigureTarget::DemoteTo(MemberType::Active)),
            Err(ClusterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn resolve_remove_targets_inactive() {
        assert_eq!(
            resolve_target_type(MemberType::Active, ReconfigureTarget::Remove).unwrap(),
            Some(MemberType::Inactive)
        );
        assert_eq!(
            resolve_target_type(MemberType::Inactive, ReconfigureTarget::Remove).unwrap(),
            None
        );
    }
}
