use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Time source for timer tasks. Production code uses `RealClock`; tests drive
/// timer tasks deterministically through `mocked_clock()`.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[allow(dead_code)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock { current_time: rx };
    let controller = MockClockController { current_time: tx };

    (clock, controller)
}

#[allow(dead_code)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            if *self.current_time.borrow() >= deadline {
                return;
            }

            self.current_time.changed().await.expect("Controller dropped");
        }
    }
}

#[allow(dead_code)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
}

#[allow(dead_code)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.current_time.borrow()
    }

    /// The mock `sleep_until` only promises to return once `now` is at or past
    /// the deadline, so a single large `advance` releases every sleeper at
    /// once. Advance in increments smaller than whatever granularity the test
    /// observes.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let now = *self.current_time.borrow();
        self.current_time.send(now + duration).expect("MockClock dropped");
    }
}
