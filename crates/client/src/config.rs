use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;

/// Steady lookup rate for the primary certification source, per second.
pub const PRIMARY_RATE: f64 = 10.0;
pub const PRIMARY_BURST: u32 = 20;

/// Steady lookup rate for the secondary popularity source, per second.
pub const SECONDARY_RATE: f64 = 5.0;
pub const SECONDARY_BURST: u32 = 10;

/// Caching and rate-limiting settings for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub cache_ttl: Duration,
    /// Tokens per second. Zero or negative disables limiting.
    pub rate: f64,
    pub burst: u32,
}

impl ClientConfig {
    /// Defaults for the primary certification source.
    pub fn primary() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            rate: PRIMARY_RATE,
            burst: PRIMARY_BURST,
        }
    }

    /// Defaults for the secondary popularity source.
    pub fn secondary() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            rate: SECONDARY_RATE,
            burst: SECONDARY_BURST,
        }
    }

    /// How often the cache should be swept: half the TTL, at least one second.
    pub fn sweep_interval(&self) -> Duration {
        (self.cache_ttl / 2).max(Duration::from_secs(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::primary()
    }
}
