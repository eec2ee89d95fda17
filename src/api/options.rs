use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunables for a cluster client. Every field has a sensible default; only
/// set what you need to change.
#[derive(Clone, Default)]
pub struct ClusterOptions {
    /// Base backoff for retrying reconfigure operations. The first retry
    /// waits one election timeout, later retries wait two.
    pub election_timeout: Option<Duration>,
    /// Capacity of the cluster actor's event queue.
    pub event_queue_size: Option<usize>,
}

pub(super) struct ClusterOptionsValidated {
    pub election_timeout: Duration,
    pub event_queue_size: usize,
}

impl ClusterOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.election_timeout == Duration::from_millis(0) {
            return Err("Election timeout must be greater than zero");
        }
        if self.event_queue_size == 0 {
            return Err("Event queue size must be greater than zero");
        }

        Ok(())
    }
}

impl TryFrom<ClusterOptions> for ClusterOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClusterOptions) -> Result<Self, Self::Error> {
        let values = ClusterOptionsValidated {
            election_timeout: options.election_timeout.unwrap_or(Duration::from_millis(2500)),
            event_queue_size: options.event_queue_size.unwrap_or(100),
        };

        values.validate()?;
        Ok(values)
    }
}
