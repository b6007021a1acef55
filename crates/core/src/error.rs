use thiserror::Error;

/// Errors produced while parsing a container image identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("empty image identifier")]
    Empty,

    #[error("image identifier has no digest: {0}")]
    MissingDigest(String),

    #[error("image identifier has an empty repository: {0}")]
    EmptyRepository(String),
}
