use crate::cluster::MemberSnapshot;
use chrono::{DateTime, Utc};

/// A proposal to change one member's type, addressed to whichever node
/// currently serves as the consensus decision point. `index`/`term` identify
/// the configuration the proposal was built against.
#[derive(Clone, Debug)]
pub struct ReconfigureRequest {
    pub index: u64,
    pub term: u64,
    pub member: MemberSnapshot,
}

/// The newly committed configuration, returned when a reconfigure proposal
/// has been durably agreed by quorum.
#[derive(Clone, Debug)]
pub struct ReconfigureResponse {
    pub index: u64,
    pub term: u64,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<MemberSnapshot>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconfigureError {
    // Likely an election is in progress. Caller retries with backoff.
    #[error("No known leader to process the reconfigure request")]
    NoLeader,

    #[error("Leader is currently unavailable")]
    Unavailable,

    #[error("Reconfigure request hit a protocol error")]
    ProtocolError,

    #[error("Reconfigure request was rejected: {0}")]
    Rejected(String),

    // Hard delivery failure, not a structured rejection. Never retried.
    #[error("Transport failure while submitting reconfigure request: {0}")]
    TransportFailure(String),
}

impl ReconfigureError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconfigureError::NoLeader | ReconfigureError::Unavailable | ReconfigureError::ProtocolError
        )
    }
}

/// ReconfigureTransport delivers reconfigure proposals to the current leader,
/// directly if local or by forwarding. The wire protocol is owned elsewhere;
/// this crate only sees request in, response or rejection out.
#[async_trait::async_trait]
pub trait ReconfigureTransport: Send + Sync {
    async fn submit_reconfigure(&self, request: ReconfigureRequest) -> Result<ReconfigureResponse, ReconfigureError>;
}
