//! Session store abstraction for path-addressed durable backends

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by a session store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store call timed out")]
    Timeout,

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transaction on {0} kept conflicting")]
    Conflict(String),

    #[error("invalid data at {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: Box<StoreError> },

    /// A transaction failed before anything was written
    #[error("transaction not committed: {0}")]
    Uncommitted(#[source] Box<StoreError>),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout | StoreError::Http(_) => true,
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
            StoreError::Uncommitted(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

/// Decision returned by a transaction closure
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    /// Write the value (`None` deletes the path)
    Commit(Option<Value>),
    /// Leave the path untouched
    Abort,
}

/// Closure applied atomically to the current value at a path.
///
/// It may run more than once when a backend retries on conflict, so it must
/// only depend on the value it is given.
pub type TransactFn<'a> = dyn FnMut(Option<Value>) -> Transaction + Send + 'a;

/// A hierarchical key-value store addressed by `/`-separated paths
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the value at `path`, `None` if nothing is stored there
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path`; keys may be nested paths
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Atomically read-modify-write `path`. Returns whether a write happened.
    ///
    /// Failures known to precede any write are wrapped in
    /// [`StoreError::Uncommitted`] so callers may safely run the whole
    /// transaction again.
    async fn transact(&self, path: &str, apply: &mut TransactFn<'_>) -> Result<bool, StoreError>;

    /// Delete the value at `path`
    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Keys of the direct children of `path`
    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}
