//! In-memory certification sources for tests.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::CertificationClient;
use crate::error::ClientError;

/// A source that answers every lookup with the same result.
///
/// The answer can be swapped between calls, and an optional delay makes
/// each lookup suspend like a network call would.
pub struct StaticClient<D> {
    answer: Mutex<Result<Option<D>, ClientError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl<D> StaticClient<D> {
    /// A source that knows the image and returns `data`.
    pub fn found(data: D) -> Self {
        Self::with_answer(Ok(Some(data)))
    }

    /// A source that confirms it has no record.
    pub fn absent() -> Self {
        Self::with_answer(Ok(None))
    }

    fn with_answer(answer: Result<Option<D>, ClientError>) -> Self {
        Self {
            answer: Mutex::new(answer),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` inside every lookup.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the answer returned by subsequent lookups.
    pub fn set_answer(&self, answer: Result<Option<D>, ClientError>) {
        *self.answer.lock() = answer;
    }

    /// Number of times [`lookup`](CertificationClient::lookup) was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<D> CertificationClient for StaticClient<D>
where
    D: Clone + Send + Sync + 'static,
{
    type Data = D;

    async fn lookup(
        &self,
        _cancel: &CancellationToken,
        _registry: &str,
        _repository: &str,
        _digest: &str,
    ) -> Result<Option<D>, ClientError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.lock().clone()
    }

    async fn healthy(&self) -> bool {
        true
    }

    fn endpoint(&self) -> &str {
        "static"
    }
}

/// A source that fails every lookup with a transport error.
pub struct FailingClient<D> {
    calls: AtomicUsize,
    _data: PhantomData<fn() -> D>,
}

impl<D> FailingClient<D> {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            _data: PhantomData,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl<D> Default for FailingClient<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D> CertificationClient for FailingClient<D>
where
    D: Clone + Send + Sync + 'static,
{
    type Data = D;

    async fn lookup(
        &self,
        _cancel: &CancellationToken,
        _registry: &str,
        _repository: &str,
        _digest: &str,
    ) -> Result<Option<D>, ClientError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(ClientError::Transport("mock failure".to_owned()))
    }

    async fn healthy(&self) -> bool {
        false
    }

    fn endpoint(&self) -> &str {
        "failing"
    }
}

/// A source that answers per repository; unknown repositories are absent.
///
/// Narrows its cache key to `registry/repository`, like a source whose
/// records are not digest-specific.
pub struct MappingClient<D> {
    records: HashMap<String, D>,
    calls: AtomicUsize,
}

impl<D> MappingClient<D> {
    pub fn new(records: impl IntoIterator<Item = (String, D)>) -> Self {
        Self {
            records: records.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<D> CertificationClient for MappingClient<D>
where
    D: Clone + Send + Sync + 'static,
{
    type Data = D;

    async fn lookup(
        &self,
        _cancel: &CancellationToken,
        _registry: &str,
        repository: &str,
        _digest: &str,
    ) -> Result<Option<D>, ClientError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(repository).cloned())
    }

    async fn healthy(&self) -> bool {
        true
    }

    fn cache_key(&self, registry: &str, repository: &str, _digest: &str) -> String {
        format!("{registry}/{repository}")
    }

    fn endpoint(&self) -> &str {
        "mapping"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_client_answer_can_change() {
        let client = StaticClient::found(7_u32);
        let cancel = CancellationToken::new();
        assert_eq!(client.lookup(&cancel, "r", "p", "d").await, Ok(Some(7)));

        client.set_answer(Ok(None));
        assert_eq!(client.lookup(&cancel, "r", "p", "d").await, Ok(None));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn failing_client_reports_transport_errors() {
        let client = FailingClient::<u32>::new();
        let err = client
            .lookup(&CancellationToken::new(), "r", "p", "d")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!client.healthy().await);
    }

    #[tokio::test]
    async fn mapping_client_answers_by_repository() {
        let client = MappingClient::new([("library/nginx".to_owned(), "nginx")]);
        let cancel = CancellationToken::new();
        assert_eq!(
            client.lookup(&cancel, "docker.io", "library/nginx", "sha256:1").await,
            Ok(Some("nginx"))
        );
        assert_eq!(
            client.lookup(&cancel, "docker.io", "library/redis", "sha256:1").await,
            Ok(None)
        );
        assert_eq!(
            client.cache_key("docker.io", "library/nginx", "sha256:1"),
            "docker.io/library/nginx"
        );
    }
}
