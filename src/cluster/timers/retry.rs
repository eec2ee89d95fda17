use crate::actor::WeakActorClient;
use crate::cluster::timers::stop_signal;
use crate::cluster::timers::time::{Clock, RealClock};
use tokio::time::Duration;

/// One-shot timer that re-enqueues a pending reconfigure operation after a
/// backoff delay. Dropping the handle cancels the retry.
pub(crate) struct RetryTimerHandle {
    _to_drop: stop_signal::Stopper,
}

struct RetryTimerTask<C: Clock> {
    delay: Duration,
    op_id: u64,
    actor_client: WeakActorClient,
    clock: C,
    stop_check: stop_signal::StopCheck,
}

impl RetryTimerHandle {
    pub(crate) fn spawn(delay: Duration, op_id: u64, actor_client: WeakActorClient) -> Self {
        let (task, handle) = RetryTimerTask::new(delay, op_id, actor_client, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> RetryTimerTask<C> {
    fn new(
        delay: Duration,
        op_id: u64,
        actor_client: WeakActorClient,
        clock: C,
    ) -> (Self, RetryTimerHandle) {
        let (stopper, stop_check) = stop_signal::new();

        let task = RetryTimerTask {
            delay,
            op_id,
            actor_client,
            clock,
            stop_check,
        };
        let handle = RetryTimerHandle { _to_drop: stopper };

        (task, handle)
    }

    async fn run(mut self) {
        self.clock.sleep(self.delay).await;

        if self.stop_check.should_stop() {
            return;
        }

        // The actor may already be gone; nothing left to retry then.
        self.actor_client.reconfigure_retry(self.op_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::cluster::timers::time;

    #[tokio::test]
    async fn retry_fires_once_after_delay() {
        let delay = Duration::from_millis(100);
        let (strong_actor_client, mut rx) = ActorClient::new(10);
        let actor_client = strong_actor_client.weak();

        let (mock_clock, mut controller) = time::mocked_clock();
        // Keep a receiver alive so advancing after the one-shot task exits
        // doesn't panic the controller's watch sender.
        let _clock_keepalive = mock_clock.clone();
        let (task, _handle) = RetryTimerTask::new(delay, 7, actor_client, mock_clock);
        tokio::task::spawn(task.run());

        // Not yet.
        controller.advance(delay / 2);
        tokio::time::timeout(delay, rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(delay);
        match rx.recv().await {
            Some(Event::ReconfigureRetry { op_id }) => assert_eq!(op_id, 7),
            other => panic!("Unexpected event: {:?}", other),
        }

        // One-shot: nothing further no matter how far time advances.
        controller.advance(delay * 10);
        tokio::time::timeout(delay, rx.recv())
            .await
            .expect_err("Expected timeout");
    }

    #[tokio::test]
    async fn dropping_handle_cancels_retry() {
        let delay = Duration::from_millis(100);
        let (strong_actor_client, mut rx) = ActorClient::new(10);
        let actor_client = strong_actor_client.weak();

        let (mock_clock, mut controller) = time::mocked_clock();
        let (task, handle) = RetryTimerTask::new(delay, 7, actor_client, mock_clock);
        let join_handle = tokio::task::spawn(task.run());
        // Let the task poll once so it anchors its sleep deadline before the
        // clock is advanced.
        tokio::time::timeout(delay, rx.recv())
            .await
            .expect_err("Expected timeout");
        drop(handle);

        controller.advance(delay * 2);
        tokio::time::timeout(delay, join_handle)
            .await
            .expect("Timer task should exit once cancelled")
            .unwrap();
        tokio::time::timeout(delay, rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}
