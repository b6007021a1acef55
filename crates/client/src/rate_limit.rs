use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::CertificationClient;
use crate::error::ClientError;
use crate::metrics::ClientMetrics;

/// A token bucket refilled continuously at `rate` tokens per second up to
/// `burst` tokens.
///
/// Waiters reserve a token up front (the balance may go negative) and sleep
/// until it matures, so callers are served in arrival order. A waiter that
/// is cancelled hands its reservation back.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// A rate that is zero, negative or not finite disables limiting. The
    /// burst is clamped to at least one token.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Whether this bucket ever makes callers wait.
    pub fn is_limited(&self) -> bool {
        self.rate.is_finite() && self.rate > 0.0
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.refilled_at = now;
    }

    /// Take a token without waiting. Returns `false` if none is available.
    pub fn try_acquire(&self) -> bool {
        if !self.is_limited() {
            return true;
        }
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait for a token, returning how long the caller had to wait.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Cancelled`] if `cancel` fires first, or had
    /// already fired on entry.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Duration, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if !self.is_limited() {
            return Ok(Duration::ZERO);
        }

        let wait = {
            let mut state = self.state.lock();
            self.refill(&mut state, Instant::now());
            state.tokens -= 1.0;
            if state.tokens >= 0.0 {
                return Ok(Duration::ZERO);
            }
            Duration::try_from_secs_f64(-state.tokens / self.rate).unwrap_or(Duration::MAX)
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let mut state = self.state.lock();
                self.refill(&mut state, Instant::now());
                state.tokens = (state.tokens + 1.0).min(self.burst);
                Err(ClientError::Cancelled)
            }
            () = tokio::time::sleep(wait) => Ok(wait),
        }
    }
}

/// Bounds the call rate into the wrapped source with a [`TokenBucket`].
///
/// Callers block until a token is available rather than failing; health
/// checks bypass the bucket.
pub struct RateLimitedClient<C> {
    inner: C,
    bucket: TokenBucket,
    metrics: Arc<ClientMetrics>,
}

impl<C: CertificationClient> RateLimitedClient<C> {
    pub fn new(inner: C, rate: f64, burst: u32, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(rate, burst),
            metrics,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CertificationClient> CertificationClient for RateLimitedClient<C> {
    type Data = C::Data;

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Self::Data>, ClientError> {
        match self.bucket.acquire(cancel).await {
            Ok(waited) if !waited.is_zero() => {
                self.metrics.increment_rate_limit_wait();
                debug!(
                    endpoint = self.inner.endpoint(),
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "rate limiter delayed lookup"
                );
            }
            Ok(_) => {}
            Err(e) => {
                self.metrics.increment_cancelled();
                return Err(e);
            }
        }
        self.inner.lookup(cancel, registry, repository, digest).await
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await
    }

    fn cache_key(&self, registry: &str, repository: &str, digest: &str) -> String {
        self.inner.cache_key(registry, repository, digest)
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticClient;

    fn limited(
        rate: f64,
        burst: u32,
    ) -> (RateLimitedClient<Arc<StaticClient<u8>>>, Arc<StaticClient<u8>>, Arc<ClientMetrics>) {
        let source = Arc::new(StaticClient::found(1));
        let metrics = Arc::new(ClientMetrics::default());
        let client = RateLimitedClient::new(Arc::clone(&source), rate, burst, Arc::clone(&metrics));
        (client, source, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_passes_immediately_then_waits() {
        let (client, source, metrics) = limited(1.0, 3);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..3 {
            client.lookup(&cancel, "r", "p", "d").await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        client.lookup(&cancel, "r", "p", "d").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(source.call_count(), 4);
        assert_eq!(metrics.snapshot().rate_limit_waits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_rate_converges_to_configured_rate() {
        let (client, source, _) = limited(2.0, 3);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..13 {
            client.lookup(&cancel, "r", "p", "d").await.unwrap();
        }

        // Three from the burst, then ten at two per second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4_900), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(5_200), "{elapsed:?}");
        assert_eq!(source.call_count(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_returns_without_calling_source() {
        let (client, source, metrics) = limited(0.01, 1);
        let cancel = CancellationToken::new();
        client.lookup(&cancel, "r", "p", "d").await.unwrap();

        let waiter = CancellationToken::new();
        let trigger = waiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = client.lookup(&waiter, "r", "p", "d").await;
        assert_eq!(result, Err(ClientError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(source.call_count(), 1);
        assert_eq!(metrics.snapshot().lookups_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_caller_is_rejected_up_front() {
        let (client, source, _) = limited(10.0, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            client.lookup(&cancel, "r", "p", "d").await,
            Err(ClientError::Cancelled)
        );
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_reservation_is_returned() {
        let bucket = TokenBucket::new(1.0, 1);
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let gone = CancellationToken::new();
        let trigger = gone.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        assert_eq!(bucket.acquire(&gone).await, Err(ClientError::Cancelled));

        // The abandoned reservation does not push the next caller back.
        let start = Instant::now();
        bucket.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(950));
    }

    #[tokio::test(start_paused = true)]
    async fn health_checks_bypass_the_bucket() {
        let (client, _, _) = limited(0.01, 1);
        let cancel = CancellationToken::new();
        client.lookup(&cancel, "r", "p", "d").await.unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            assert!(client.healthy().await);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_rate_disables_limiting() {
        let bucket = TokenBucket::new(0.0, 1);
        assert!(!bucket.is_limited());
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..100 {
            bucket.acquire(&cancel).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn vanishingly_small_rate_waits_instead_of_overflowing() {
        let bucket = TokenBucket::new(1e-20, 1);
        let cancel = CancellationToken::new();
        assert_eq!(bucket.acquire(&cancel).await, Ok(Duration::ZERO));

        let waiter = CancellationToken::new();
        let trigger = waiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        assert_eq!(bucket.acquire(&waiter).await, Err(ClientError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_respects_balance() {
        let bucket = TokenBucket::new(1.0, 2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire());
    }
}
