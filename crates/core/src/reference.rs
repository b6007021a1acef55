use serde::{Deserialize, Serialize};

use crate::error::ReferenceError;

/// Registry assumed when an identifier does not name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace prepended to single-segment repositories on the default registry.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Pull-scheme prefixes reported by container runtimes, stripped before parsing.
const SCHEME_PREFIXES: [&str; 2] = ["docker-pullable://", "docker://"];

/// A container image reference resolved down to a content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry hostname, optionally with a port (e.g. `quay.io`, `localhost:5000`).
    pub registry: String,
    /// Repository path within the registry (e.g. `ubi9/ubi-minimal`).
    pub repository: String,
    /// Tag, when the runtime reported one alongside the digest.
    pub tag: Option<String>,
    /// Content digest, including the algorithm prefix (e.g. `sha256:...`).
    pub digest: String,
    /// The identifier as reported by the runtime, minus any pull-scheme prefix.
    pub full_reference: String,
}

/// Parse a runtime image identifier such as
/// `docker-pullable://quay.io/org/app:1.2@sha256:...` into its parts.
///
/// A digest is mandatory: a tag-only reference does not pin content and is
/// rejected with [`ReferenceError::MissingDigest`].
///
/// # Errors
///
/// Returns a [`ReferenceError`] when the identifier is empty, has no
/// `@`-delimited digest, or leaves no repository once registry, tag and
/// digest are removed.
pub fn parse_image_id(raw: &str) -> Result<ImageReference, ReferenceError> {
    if raw.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let mut stripped = raw;
    for prefix in SCHEME_PREFIXES {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            stripped = rest;
        }
    }

    let Some((name, digest)) = stripped.rsplit_once('@') else {
        return Err(ReferenceError::MissingDigest(stripped.to_owned()));
    };
    if digest.is_empty() {
        return Err(ReferenceError::MissingDigest(stripped.to_owned()));
    }

    // A trailing `:segment` is a tag only if it holds no `/`; otherwise the
    // colon belongs to a `host:port` registry.
    let (name, tag) = match name.rsplit_once(':') {
        Some((head, tail)) if !tail.contains('/') => (head, Some(tail.to_owned())),
        _ => (name, None),
    };

    let (registry, repository) = match name.split_once('/') {
        None => (
            DEFAULT_REGISTRY.to_owned(),
            format!("{DEFAULT_NAMESPACE}/{name}"),
        ),
        Some((first, rest)) if is_registry_host(first) => (first.to_owned(), rest.to_owned()),
        Some(_) => (DEFAULT_REGISTRY.to_owned(), name.to_owned()),
    };

    if repository.is_empty() || repository.ends_with('/') || name.is_empty() {
        return Err(ReferenceError::EmptyRepository(stripped.to_owned()));
    }

    Ok(ImageReference {
        registry,
        repository,
        tag,
        digest: digest.to_owned(),
        full_reference: stripped.to_owned(),
    })
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl ImageReference {
    /// The deterministic inventory record key for this reference.
    ///
    /// Shape: `<registry>.<repository>.<short-digest>`, with `/` turned into
    /// `.`. See [`record_key`](crate::key::record_key).
    #[must_use]
    pub fn record_key(&self) -> String {
        crate::key::record_key(&self.registry, &self.repository, &self.digest)
    }

    /// First eight hex characters of a `sha256:` digest, or the whole digest
    /// for other algorithms.
    #[must_use]
    pub fn short_digest(&self) -> &str {
        crate::key::short_digest(&self.digest)
    }

    /// Last path segment of the repository (`nginx` for `library/nginx`).
    #[must_use]
    pub fn repository_name(&self) -> &str {
        self.repository
            .rsplit_once('/')
            .map_or(self.repository.as_str(), |(_, name)| name)
    }

    /// Repository path without its last segment, empty for single-segment
    /// repositories.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.repository
            .rsplit_once('/')
            .map_or("", |(namespace, _)| namespace)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        write!(f, "@{}", self.digest)
    }
}
