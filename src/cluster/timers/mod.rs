mod retry;
mod stop_signal;
mod time;

pub(crate) use retry::RetryTimerHandle;
