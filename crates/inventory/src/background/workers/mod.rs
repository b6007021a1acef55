pub(crate) mod cache_sweep;
pub(crate) mod refresh;
pub(crate) mod stale_references;

use std::time::Duration;

use tokio::time::Instant;

/// Roughly thirty years; the latest a periodic worker is scheduled to run.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// First tick of a worker that waits one full period before running.
/// Periods too large to add to the clock saturate at [`FAR_FUTURE`].
pub(crate) fn first_tick_after(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
