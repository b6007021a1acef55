use thiserror::Error;

use imagecert_client::ClientError;
use imagecert_store::StoreError;

use crate::config::ConfigError;

/// Errors from inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("certification source error: {0}")]
    Client(#[from] ClientError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0} is required")]
    MissingComponent(&'static str),
}

impl InventoryError {
    /// Whether the error is an optimistic-concurrency conflict that
    /// survived the single retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}
