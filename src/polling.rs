use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Outcome of one poll: keep waiting, or stop with a value.
pub enum Poll<T> {
    Pending,
    Ready(T),
}

/// Calls `check` immediately and then once per `period` until it returns
/// `Ready`, an error, or `max_attempts` checks have run. `Ok(None)` means the
/// attempts ran out.
pub async fn poll_until<T, F, Fut>(
    period: Duration,
    max_attempts: u32,
    mut check: F,
) -> anyhow::Result<Option<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Poll<T>>>,
{
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for attempt in 1..=max_attempts {
        ticker.tick().await;
        if let Poll::Ready(value) = check(attempt).await? {
            return Ok(Some(value));
        }
        debug!(attempt, max_attempts, "still waiting");
    }

    Ok(None)
}
