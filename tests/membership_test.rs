use chrono::Utc;
use raft_cluster::{
    ClusterConfig, ClusterError, ClusterHandle, ClusterOptions, Configuration, InMemoryLog, InMemoryMetaStore,
    MemberId, MemberSnapshot, MemberType, ReadMode, ReconfigureError, ReconfigureRequest, ReconfigureResponse,
    ReconfigureTransport,
};
use slog::Drain;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// Stands in for the leader. Answers each submission with the next scripted
/// result and records every request it saw.
struct FakeTransport {
    scripted: Mutex<VecDeque<Result<ReconfigureResponse, ReconfigureError>>>,
    requests: Mutex<Vec<ReconfigureRequest>>,
}

impl FakeTransport {
    fn scripted(script: Vec<Result<ReconfigureResponse, ReconfigureError>>) -> Arc<Self> {
        Arc::new(FakeTransport {
            scripted: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn recorded_requests(&self) -> Vec<ReconfigureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReconfigureTransport for FakeTransport {
    async fn submit_reconfigure(&self, request: ReconfigureRequest) -> Result<ReconfigureResponse, ReconfigureError> {
        self.requests.lock().unwrap().push(request);
        self.scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ReconfigureError::Rejected("transport script exhausted".to_string())))
    }
}

#[tokio::test]
async fn bootstrap_then_demote_member() {
    // Script the leader committing the demotion at index 1.
    let transport = FakeTransport::scripted(vec![Ok(committed_configuration(
        1,
        vec![
            ("a", MemberType::Active),
            ("b", MemberType::Active),
            ("c", MemberType::Passive),
        ],
    ))]);
    let client = create_client("a", transport.clone(), Duration::from_millis(50));

    client.bootstrap(ids(&["a", "b", "c"])).await.unwrap();

    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.local_member_type, MemberType::Active);
    assert_eq!(state.quorum, 2);
    assert_eq!(state.active_member_ids, ids(&["b", "c"]));
    assert_eq!(state.configuration.unwrap().index(), 0);

    // An ACTIVE follower replicates uncommitted entries.
    let c_state = client.member_state(MemberId::new("c")).await.unwrap();
    assert_eq!(c_state.member_type, MemberType::Active);
    assert_eq!(c_state.reader_mode, ReadMode::All);

    client.member(MemberId::new("c")).demote().await.unwrap();

    // The committed configuration has been applied: c is PASSIVE, reads
    // committed entries only and no longer counts toward quorum.
    let c_state = client.member_state(MemberId::new("c")).await.unwrap();
    assert_eq!(c_state.member_type, MemberType::Passive);
    assert_eq!(c_state.reader_mode, ReadMode::CommittedOnly);

    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.active_member_ids, ids(&["b"]));
    assert_eq!(state.configuration.unwrap().index(), 1);

    let requests = transport.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].member.id, MemberId::new("c"));
    assert_eq!(requests[0].member.member_type, MemberType::Passive);
    // Built against the bootstrap configuration.
    assert_eq!(requests[0].index, 0);
}

#[tokio::test]
async fn reconfigure_retries_with_election_timeout_backoff() {
    let election_timeout = Duration::from_millis(20);
    // Two leaderless rounds, then success.
    let transport = FakeTransport::scripted(vec![
        Err(ReconfigureError::NoLeader),
        Err(ReconfigureError::Unavailable),
        Ok(committed_configuration(
            1,
            vec![
                ("a", MemberType::Active),
                ("b", MemberType::Active),
                ("c", MemberType::Passive),
            ],
        )),
    ]);
    let client = create_client("a", transport.clone(), election_timeout);
    client.bootstrap(ids(&["a", "b", "c"])).await.unwrap();

    let start = Instant::now();
    client.member(MemberId::new("c")).demote().await.unwrap();

    // First retry after 1x the election timeout, second after 2x.
    assert!(start.elapsed() >= election_timeout * 3);
    assert_eq!(transport.recorded_requests().len(), 3);

    let c_state = client.member_state(MemberId::new("c")).await.unwrap();
    assert_eq!(c_state.member_type, MemberType::Passive);
}

#[tokio::test]
async fn rejected_reconfigure_fails_without_retry() {
    let transport = FakeTransport::scripted(vec![Err(ReconfigureError::Rejected(
        "another reconfiguration is in progress".to_string(),
    ))]);
    let client = create_client("a", transport.clone(), Duration::from_millis(20));
    client.bootstrap(ids(&["a", "b"])).await.unwrap();

    let result = client.member(MemberId::new("b")).demote().await;
    match result {
        Err(ClusterError::Reconfigure(ReconfigureError::Rejected(_))) => {}
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert_eq!(transport.recorded_requests().len(), 1);

    // Membership unchanged.
    let b_state = client.member_state(MemberId::new("b")).await.unwrap();
    assert_eq!(b_state.member_type, MemberType::Active);
}

#[tokio::test]
async fn promote_at_top_of_ladder_is_a_no_op() {
    let transport = FakeTransport::scripted(vec![]);
    let client = create_client("a", transport.clone(), Duration::from_millis(20));
    client.bootstrap(ids(&["a", "b"])).await.unwrap();

    client.member(MemberId::new("b")).promote().await.unwrap();
    assert!(transport.recorded_requests().is_empty());
}

#[tokio::test]
async fn reconfigure_of_unknown_member_fails() {
    let transport = FakeTransport::scripted(vec![]);
    let client = create_client("a", transport.clone(), Duration::from_millis(20));

    // Before bootstrap there is nothing to reconfigure at all.
    let result = client.member(MemberId::new("b")).demote().await;
    assert!(matches!(result, Err(ClusterError::NotBootstrapped)));

    client.bootstrap(ids(&["a", "b"])).await.unwrap();
    let result = client.member(MemberId::new("stranger")).demote().await;
    match result {
        Err(ClusterError::UnknownMember(id)) => assert_eq!(id, MemberId::new("stranger")),
        other => panic!("Expected UnknownMember, got {:?}", other),
    }
    assert!(transport.recorded_requests().is_empty());
}

#[tokio::test]
async fn local_removal_applies_only_once_committed() {
    let transport = FakeTransport::scripted(vec![]);
    let client = create_client("a", transport, Duration::from_millis(20));
    client.bootstrap(ids(&["a", "b", "c"])).await.unwrap();

    // A configuration without the local member arrives from the log at
    // index 5.
    let without_local = Configuration::new(
        5,
        1,
        Utc::now(),
        vec![
            snapshot("b", MemberType::Active),
            snapshot("c", MemberType::Active),
        ],
    );
    client.apply_configuration(without_local).await.unwrap();

    // Not yet committed: the node keeps serving as ACTIVE.
    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.local_member_type, MemberType::Active);

    // Earlier entries committing must not finalize the configuration.
    client.commit(3).await.unwrap();
    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.local_member_type, MemberType::Active);

    client.commit(5).await.unwrap();
    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.local_member_type, MemberType::Inactive);
}

#[tokio::test]
async fn reset_restores_last_committed_configuration() {
    let transport = FakeTransport::scripted(vec![]);
    let client = create_client("a", transport, Duration::from_millis(20));
    client.bootstrap(ids(&["a", "b", "c"])).await.unwrap();

    // Apply (but never commit) a configuration that drops c.
    let dropped_c = Configuration::new(
        1,
        1,
        Utc::now(),
        vec![
            snapshot("a", MemberType::Active),
            snapshot("b", MemberType::Active),
        ],
    );
    client.apply_configuration(dropped_c).await.unwrap();
    assert!(client.member_state(MemberId::new("c")).await.is_err());

    client.reset().await.unwrap();

    // Back to the bootstrap configuration, c included.
    let state = client.cluster_state().await.unwrap();
    assert_eq!(state.configuration.unwrap().index(), 0);
    assert_eq!(state.active_member_ids, ids(&["b", "c"]));
}

fn create_client(local_id: &str, transport: Arc<FakeTransport>, election_timeout: Duration) -> ClusterHandle {
    raft_cluster::create_cluster_client(ClusterConfig {
        info_logger: create_root_logger_for_stdout(local_id.to_string()),
        local_member_id: MemberId::new(local_id),
        log_storage: InMemoryLog::new(),
        meta_store: InMemoryMetaStore::new(),
        transport,
        options: ClusterOptions {
            election_timeout: Some(election_timeout),
            event_queue_size: None,
        },
    })
    .expect("Failed to create cluster client")
}

fn ids(raw: &[&str]) -> Vec<MemberId> {
    raw.iter().map(|id| MemberId::new(*id)).collect()
}

fn snapshot(id: &str, member_type: MemberType) -> MemberSnapshot {
    MemberSnapshot {
        id: MemberId::new(id),
        member_type,
        updated: Utc::now(),
    }
}

fn committed_configuration(index: u64, members: Vec<(&str, MemberType)>) -> ReconfigureResponse {
    ReconfigureResponse {
        index,
        term: 1,
        timestamp: Utc::now(),
        members: members
            .into_iter()
            .map(|(id, member_type)| snapshot(id, member_type))
            .collect(),
    }
}

fn create_root_logger_for_stdout(member_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("MemberId" => member_id))
}
