use crate::cluster::member::{MemberId, MemberType};
use crate::storage::{LogReader, LogStorage, ReadMode};
use std::collections::VecDeque;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Pipelining cap: at most this many append RPCs may be in flight to one
/// member at a time.
pub const MAX_APPENDS_IN_FLIGHT: u32 = 2;

/// Number of recent append round-trip samples kept for pacing.
const RTT_WINDOW_SIZE: usize = 8;

/// Everything the local node tracks about one remote member's replication
/// state: in-flight append/configure/install RPCs, timing statistics, failure
/// streaks, and the log reader cursor feeding that member.
///
/// All mutation happens on the cluster's sequential execution context; there
/// is no internal locking.
pub struct ReplicationProgress {
    member_id: MemberId,
    member_type: MemberType,

    match_index: u64,
    config_index: u64,
    config_term: u64,

    snapshot_index: u64,
    next_snapshot_index: u64,
    next_snapshot_chunk: u32,

    heartbeat_time: Instant,
    response_time: Instant,

    appends_in_flight: u32,
    append_succeeded: bool,
    last_append_time: Option<Instant>,
    rtt_window: VecDeque<Duration>,

    configuring: bool,
    installing: bool,

    failure_count: u32,
    first_failure_time: Option<Instant>,

    reader: Box<dyn LogReader>,
}

impl ReplicationProgress {
    pub(crate) fn new(member_id: MemberId, member_type: MemberType, log: &dyn LogStorage) -> Self {
        let now = Instant::now();
        let reader = log.open_reader(1, Self::read_mode_for(member_type));

        ReplicationProgress {
            member_id,
            member_type,
            match_index: 0,
            config_index: 0,
            config_term: 0,
            snapshot_index: 0,
            next_snapshot_index: 0,
            next_snapshot_chunk: 0,
            heartbeat_time: now,
            response_time: now,
            appends_in_flight: 0,
            append_succeeded: false,
            last_append_time: None,
            rtt_window: VecDeque::with_capacity(RTT_WINDOW_SIZE),
            configuring: false,
            installing: false,
            failure_count: 0,
            first_failure_time: None,
            reader,
        }
    }

    fn read_mode_for(member_type: MemberType) -> ReadMode {
        match member_type {
            MemberType::Promotable | MemberType::Active => ReadMode::All,
            MemberType::Passive | MemberType::Inactive => ReadMode::CommittedOnly,
        }
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    pub(crate) fn update_member_type(&mut self, member_type: MemberType) {
        self.member_type = member_type;
    }

    /// Re-derives all transient state and re-opens the log reader at
    /// `match_index + 1` with the visibility appropriate for the member's
    /// current type. Called when the member's type changes or a configuration
    /// is (re)applied; prior per-type assumptions about reader visibility and
    /// in-flight counters are invalid afterwards.
    pub(crate) fn reset_state(&mut self, log: &dyn LogStorage) {
        self.appends_in_flight = 0;
        self.append_succeeded = false;
        self.last_append_time = None;
        self.rtt_window.clear();
        self.configuring = false;
        self.installing = false;
        self.next_snapshot_index = 0;
        self.next_snapshot_chunk = 0;
        self.failure_count = 0;
        self.first_failure_time = None;

        self.reader = log.open_reader(self.match_index + 1, Self::read_mode_for(self.member_type));
    }

    // ------------------------------------------------------------------
    // Append flow control
    // ------------------------------------------------------------------

    /// Whether the replication sender should start another append to this
    /// member right now. With nothing in flight the answer is always yes.
    /// Otherwise pipelining is allowed only while the last append succeeded,
    /// the cap has room, and enough time has passed since the last append
    /// start relative to observed round-trip latency.
    pub fn can_append(&self, now: Instant) -> bool {
        if self.appends_in_flight == 0 {
            return true;
        }

        self.append_succeeded
            && self.appends_in_flight < MAX_APPENDS_IN_FLIGHT
            && match self.last_append_time {
                Some(last) => now >= last + self.append_pacing_delay(),
                None => true,
            }
    }

    /// Heartbeats are suppressed while real appends are outstanding; an
    /// append also serves as a heartbeat.
    pub fn can_heartbeat(&self) -> bool {
        self.appends_in_flight == 0
    }

    pub fn start_append(&mut self, now: Instant) {
        self.appends_in_flight += 1;
        self.last_append_time = Some(now);
    }

    pub fn complete_append(&mut self) {
        self.appends_in_flight = self.appends_in_flight.saturating_sub(1);
    }

    /// Completes an append and feeds its round-trip time into the rolling
    /// window used for pacing. Oldest sample is evicted on overflow.
    pub fn complete_append_with_latency(&mut self, round_trip: Duration) {
        self.complete_append();
        if self.rtt_window.len() == RTT_WINDOW_SIZE {
            self.rtt_window.pop_front();
        }
        self.rtt_window.push_back(round_trip);
    }

    pub fn append_succeeded(&mut self) {
        self.append_succeeded = true;
    }

    pub fn append_failed(&mut self) {
        self.append_succeeded = false;
    }

    fn append_pacing_delay(&self) -> Duration {
        if self.rtt_window.is_empty() {
            return Duration::from_millis(0);
        }
        let mean: Duration = self.rtt_window.iter().sum::<Duration>() / self.rtt_window.len() as u32;
        mean / MAX_APPENDS_IN_FLIGHT
    }

    // ------------------------------------------------------------------
    // Single-flight configure / install-snapshot RPCs
    // ------------------------------------------------------------------

    pub fn can_configure(&self) -> bool {
        !self.configuring
    }

    pub fn start_configure(&mut self) {
        self.configuring = true;
    }

    pub fn complete_configure(&mut self) {
        self.configuring = false;
    }

    pub fn can_install(&self) -> bool {
        !self.installing
    }

    pub fn start_install(&mut self) {
        self.installing = true;
    }

    pub fn complete_install(&mut self) {
        self.installing = false;
    }

    // ------------------------------------------------------------------
    // Failure streak
    // ------------------------------------------------------------------

    /// Increments the consecutive-failure streak and returns the new count.
    /// The recorded time is that of the *first* failure in the streak; later
    /// increments leave it untouched so callers can detect a member that has
    /// been failing for a sustained period.
    pub fn increment_failure_count(&mut self, now: Instant) -> u32 {
        if self.failure_count == 0 {
            self.first_failure_time = Some(now);
        }
        self.failure_count += 1;
        self.failure_count
    }

    pub fn reset_failure_count(&mut self) {
        self.failure_count = 0;
        self.first_failure_time = None;
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn first_failure_time(&self) -> Option<Instant> {
        self.first_failure_time
    }

    // ------------------------------------------------------------------
    // Indexes and timestamps
    // ------------------------------------------------------------------

    pub fn match_index(&self) -> u64 {
        self.match_index
    }

    /// `match_index` only ever moves forward. A lower value is a designed
    /// no-op: out-of-order replies must not rewind what we know is replicated.
    pub fn set_match_index(&mut self, match_index: u64) {
        if match_index > self.match_index {
            self.match_index = match_index;
        }
    }

    pub fn config_index(&self) -> u64 {
        self.config_index
    }

    pub fn config_term(&self) -> u64 {
        self.config_term
    }

    pub fn set_config(&mut self, config_index: u64, config_term: u64) {
        self.config_index = config_index;
        self.config_term = config_term;
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    pub fn set_snapshot_index(&mut self, snapshot_index: u64) {
        self.snapshot_index = snapshot_index;
    }

    pub fn next_snapshot_index(&self) -> u64 {
        self.next_snapshot_index
    }

    pub fn set_next_snapshot_index(&mut self, next_snapshot_index: u64) {
        self.next_snapshot_index = next_snapshot_index;
    }

    pub fn next_snapshot_chunk(&self) -> u32 {
        self.next_snapshot_chunk
    }

    pub fn set_next_snapshot_chunk(&mut self, next_snapshot_chunk: u32) {
        self.next_snapshot_chunk = next_snapshot_chunk;
    }

    pub fn heartbeat_time(&self) -> Instant {
        self.heartbeat_time
    }

    /// Keep-the-max: a delayed packet carrying an older timestamp never moves
    /// the stored value backward.
    pub fn update_heartbeat_time(&mut self, time: Instant) {
        if time > self.heartbeat_time {
            self.heartbeat_time = time;
        }
    }

    pub fn response_time(&self) -> Instant {
        self.response_time
    }

    pub fn update_response_time(&mut self, time: Instant) {
        if time > self.response_time {
            self.response_time = time;
        }
    }

    // ------------------------------------------------------------------
    // Log reader
    // ------------------------------------------------------------------

    pub fn reader(&mut self) -> &mut dyn LogReader {
        self.reader.as_mut()
    }

    pub fn reader_mode(&self) -> ReadMode {
        self.reader.mode()
    }
}

impl fmt::Debug for ReplicationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationProgress")
            .field("member_id", &self.member_id)
            .field("member_type", &self.member_type)
            .field("match_index", &self.match_index)
            .field("appends_in_flight", &self.appends_in_flight)
            .field("failure_count", &self.failure_count)
            .field("reader_mode", &self.reader.mode())
            .finish()
    }
}
