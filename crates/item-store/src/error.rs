use thiserror::Error;

/// Errors that can occur when interacting with the item store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another item already uses this name.
    #[error("An item named '{0}' already exists")]
    DuplicateName(String),

    /// A row could not be mapped back to an item.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if repeating the operation is likely to succeed: a
    /// connectivity problem, or a transaction the database aborted because
    /// of a deadlock or serialization conflict.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => is_transient_sqlx(err),
            StoreError::Migration(sqlx::migrate::MigrateError::Execute(err)) => {
                is_transient_sqlx(err)
            }
            _ => false,
        }
    }
}

/// SQLSTATE codes for `serialization_failure` and `deadlock_detected`.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_) => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}

/// Result type for item store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
