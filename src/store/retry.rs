//! Timeout and retry policy around any session store

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tracing::warn;

use super::traits::{SessionStore, StoreError, TransactFn};

/// Wraps a store with a per-call timeout and bounded retries on transient errors
pub struct RetryingStore<S> {
    inner: S,
    call_timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl<S: SessionStore> RetryingStore<S> {
    pub fn new(inner: S, call_timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            call_timeout,
            max_retries,
            backoff: Duration::from_millis(200),
        }
    }

    /// Set the base delay between attempts (grows linearly per attempt)
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn with_retries<T, F, Fut>(&self, op: &'static str, path: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    warn!(store = self.inner.name(), op, path, attempt, error = %e, "store call failed, retrying");
                    sleep(self.backoff * attempt).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(StoreError::Unavailable {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for RetryingStore<S> {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.with_retries("get", path, move || self.inner.get(path)).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.with_retries("set", path, move || self.inner.set(path, value.clone())).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.with_retries("update", path, move || self.inner.update(path, fields.clone()))
            .await
    }

    /// Only failures the backend marks [`StoreError::Uncommitted`] are
    /// retried. A timed-out or failed commit may still have landed, and
    /// re-running a non-idempotent closure (a toggle) would apply it twice.
    async fn transact(&self, path: &str, apply: &mut TransactFn<'_>) -> Result<bool, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = match timeout(self.call_timeout, self.inner.transact(path, &mut *apply)).await {
                Ok(Err(StoreError::Uncommitted(e))) if e.is_transient() && attempt <= self.max_retries => {
                    warn!(store = self.inner.name(), op = "transact", path, attempt, error = %e, "store call failed, retrying");
                    sleep(self.backoff * attempt).await;
                    continue;
                }
                Ok(Err(StoreError::Uncommitted(e))) if e.is_transient() => *e,
                Ok(Err(StoreError::Uncommitted(e))) => return Err(*e),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(result) => return result,
                Err(_) => StoreError::Timeout,
            };
            return Err(StoreError::Unavailable {
                attempts: attempt,
                last: Box::new(last),
            });
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.with_retries("remove", path, move || self.inner.remove(path)).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.with_retries("children", path, move || self.inner.children(path)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
