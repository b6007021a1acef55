//! Certification source capability and the decorators that govern how the
//! inventory talks to it.
//!
//! A source is anything implementing [`CertificationClient`]. [`layered`]
//! composes the standard stack: a TTL cache in front of a token-bucket rate
//! limiter in front of an instrumented base client.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod instrumented;
pub mod metrics;
pub mod mock;
pub mod rate_limit;

use std::sync::Arc;

pub use cache::{CacheSweep, CachingClient, DEFAULT_CACHE_TTL};
pub use client::CertificationClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use instrumented::InstrumentedClient;
pub use metrics::{ClientMetrics, ClientMetricsSnapshot, LookupOutcome};
pub use mock::{FailingClient, MappingClient, StaticClient};
pub use rate_limit::{RateLimitedClient, TokenBucket};

/// The standard decorator stack built by [`layered`].
pub type Layered<C> = CachingClient<RateLimitedClient<InstrumentedClient<C>>>;

/// Wrap `base` as cache(rate limit(instrumentation(base))).
///
/// Cache hits never consume a rate-limit token; only lookups that reach the
/// source are timed.
pub fn layered<C: CertificationClient>(
    base: C,
    config: &ClientConfig,
    metrics: Arc<ClientMetrics>,
) -> Layered<C> {
    let instrumented = InstrumentedClient::new(base, Arc::clone(&metrics));
    let limited = RateLimitedClient::new(instrumented, config.rate, config.burst, Arc::clone(&metrics));
    CachingClient::new(limited, config.cache_ttl, metrics)
}
