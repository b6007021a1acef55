use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// A lookup-only view of an external certification or metadata source.
///
/// Implementations own their transport, authentication and response
/// mapping. Decorators in this crate ([`CachingClient`](crate::CachingClient),
/// [`RateLimitedClient`](crate::RateLimitedClient),
/// [`InstrumentedClient`](crate::InstrumentedClient)) implement the same
/// trait, so they compose by plain wrapping.
#[async_trait]
pub trait CertificationClient: Send + Sync {
    /// Payload returned for a known image.
    type Data: Clone + Send + Sync + 'static;

    /// Look up the record for one image.
    ///
    /// Returns `Ok(None)` when the source confirms it has no record. The
    /// `cancel` token lets a waiting caller abandon the lookup.
    async fn lookup(
        &self,
        cancel: &CancellationToken,
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Self::Data>, ClientError>;

    /// Liveness probe for the source.
    async fn healthy(&self) -> bool;

    /// Cache key identifying a lookup.
    ///
    /// Sources that answer per repository rather than per digest narrow
    /// this so that every digest of a repository shares one entry.
    fn cache_key(&self, registry: &str, repository: &str, digest: &str) -> String {
        format!("{registry}/{repository}@{digest}")
    }

    /// Name of the source, used in logs.
    fn endpoint(&self) -> &str {
        "certification"
    }
}

#[async_trait]
impl<T> CertificationClient for Arc<T>
where
    T: CertificationClient + ?Sized,
{
    type Data = T::Data;

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Self::Data>, ClientError> {
        (**self).lookup(cancel, registry, repository, digest).await
    }

    async fn healthy(&self) -> bool {
        (**self).healthy().await
    }

    fn cache_key(&self, registry: &str, repository: &str, digest: &str) -> String {
        (**self).cache_key(registry, repository, digest)
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
