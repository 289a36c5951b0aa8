//! Catalog error types.

use item_store::StoreError;
use thiserror::Error;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Input rejected before reaching the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No item matched.
    #[error("Item not found: {0}")]
    NotFound(String),

    /// The identifier is not well formed.
    #[error("Invalid item id: {0}")]
    InvalidId(String),

    /// A decrement would have driven stock negative. Nothing was written.
    #[error("Insufficient stock for '{name}': requested {requested}, available {available}")]
    InsufficientStock {
        name: String,
        requested: u32,
        available: u32,
    },

    /// Another item already uses this name.
    #[error("An item named '{0}' already exists")]
    DuplicateName(String),

    /// The store did not answer within the configured timeout.
    #[error("Store operation '{operation}' timed out")]
    Timeout { operation: &'static str },

    /// Item store error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CatalogError {
    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Timeout { .. } => true,
            CatalogError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => CatalogError::DuplicateName(name),
            other => CatalogError::Store(other),
        }
    }
}

/// Convenience type alias for catalog results.
pub type Result<T> = std::result::Result<T, CatalogError>;
