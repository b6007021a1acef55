use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::CertificationClient;
use crate::error::ClientError;
use crate::metrics::{ClientMetrics, LookupOutcome};

/// Records the outcome and latency of every lookup that reaches the
/// wrapped source.
pub struct InstrumentedClient<C> {
    inner: C,
    metrics: Arc<ClientMetrics>,
}

impl<C: CertificationClient> InstrumentedClient<C> {
    pub fn new(inner: C, metrics: Arc<ClientMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<C: CertificationClient> CertificationClient for InstrumentedClient<C> {
    type Data = C::Data;

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Self::Data>, ClientError> {
        let start = Instant::now();
        let result = self.inner.lookup(cancel, registry, repository, digest).await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(Some(_)) => LookupOutcome::Found,
            Ok(None) => LookupOutcome::NotFound,
            Err(e) => {
                warn!(
                    endpoint = self.inner.endpoint(),
                    registry,
                    repository,
                    error = %e,
                    "certification lookup failed"
                );
                LookupOutcome::Failed
            }
        };
        self.metrics.record_lookup(outcome, elapsed);
        debug!(
            endpoint = self.inner.endpoint(),
            registry,
            repository,
            outcome = ?outcome,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "certification lookup completed"
        );
        result
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
    use crate::mock::{FailingClient, StaticClient};

    #[tokio::test]
    async fn outcomes_are_recorded() {
        let metrics = Arc::new(ClientMetrics::default());
        let cancel = CancellationToken::new();

        let found = InstrumentedClient::new(StaticClient::found(1_u8), Arc::clone(&metrics));
        found.lookup(&cancel, "r", "p", "d").await.unwrap();

        let absent = InstrumentedClient::new(StaticClient::<u8>::absent(), Arc::clone(&metrics));
        absent.lookup(&cancel, "r", "p", "d").await.unwrap();

        let failing = InstrumentedClient::new(FailingClient::<u8>::new(), Arc::clone(&metrics));
        failing.lookup(&cancel, "r", "p", "d").await.unwrap_err();

        let snap = metrics.snapshot();
        assert_eq!(snap.lookups_found, 1);
        assert_eq!(snap.lookups_not_found, 1);
        assert_eq!(snap.lookups_failed, 1);
    }
}
