use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::CertificationClient;
use crate::error::ClientError;
use crate::metrics::ClientMetrics;

/// Default time-to-live for cached lookups.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Expiry used when the TTL is too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct CacheEntry<D> {
    value: Option<D>,
    expires_at: Instant,
}

impl<D> CacheEntry<D> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Expiry sweeping for caches of any payload type.
pub trait CacheSweep: Send + Sync {
    /// Drop every expired entry, returning how many were removed.
    fn sweep_expired(&self) -> usize;

    /// Name of the cached source, for logs.
    fn name(&self) -> &str;
}

/// Memoizes lookups of the wrapped source for a fixed TTL.
///
/// Both found and "no such record" answers are cached; errors never are.
/// Concurrent misses on the same key are not coalesced: each caller reaches
/// the wrapped source. Expired entries are ignored on read and only
/// removed by [`sweep_expired`](CacheSweep::sweep_expired).
///
/// A plain locked map rather than `moka`: its loaders coalesce concurrent
/// misses and it evicts on its own schedule, neither of which is wanted here.
pub struct CachingClient<C: CertificationClient> {
    inner: C,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<C::Data>>>,
    metrics: Arc<ClientMetrics>,
}

impl<C: CertificationClient> CachingClient<C> {
    pub fn new(inner: C, ttl: Duration, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// The wrapped source.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Number of entries held, live or expired.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn expiry(&self, now: Instant) -> Instant {
        now.checked_add(self.ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    fn live_entry(&self, key: &str) -> Option<Option<C::Data>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }
}

#[async_trait]
impl<C: CertificationClient> CertificationClient for CachingClient<C> {
    type Data = C::Data;

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Self::Data>, ClientError> {
        let key = self.inner.cache_key(registry, repository, digest);

        if let Some(value) = self.live_entry(&key) {
            self.metrics.increment_cache_hit();
            debug!(endpoint = self.inner.endpoint(), key = %key, "cache hit");
            return Ok(value);
        }

        self.metrics.increment_cache_miss();
        let value = self
            .inner
            .lookup(cancel, registry, repository, digest)
            .await?;

        self.entries.write().insert(
            key,
            CacheEntry {
                value: value.clone(),
                expires_at: self.expiry(Instant::now()),
            },
        );
        Ok(value)
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

impl<C: CertificationClient> CacheSweep for CachingClient<C> {
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.metrics.add_cache_evictions(removed as u64);
            debug!(endpoint = self.inner.endpoint(), removed, "swept expired cache entries");
        }
        removed
    }

    fn name(&self) -> &str {
        self.inner.endpoint()
    }
}

impl<C: CertificationClient> std::fmt::Debug for CachingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingClient")
            .field("endpoint", &self.inner.endpoint())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
