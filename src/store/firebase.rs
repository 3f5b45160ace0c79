//! Realtime Database REST backend
//!
//! Paths map to `{database_url}/{path}.json`. Transactions use the ETag
//! protocol: read with `X-Firebase-ETag: true`, write back with `if-match`,
//! and re-run the closure when the server answers 412.

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;

use super::traits::{SessionStore, StoreError, TransactFn, Transaction};

/// Maximum optimistic transaction attempts before reporting a conflict
const MAX_TRANSACTION_ATTEMPTS: u32 = 25;

/// Session store backed by the Realtime Database REST API
pub struct FirebaseStore {
    client: Client,
    database_url: String,
    secret: Option<String>,
}

impl FirebaseStore {
    /// Create a store for `database_url`, authenticating with `secret` if given
    pub fn new(database_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            database_url: database_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url, path.trim_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.secret {
            Some(secret) => builder.query(&[("auth", secret.as_str())]),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Read `path` together with the ETag a conditional write must match
    async fn read_versioned(&self, path: &str) -> Result<(HeaderValue, Option<Value>), StoreError> {
        let response = Self::check(
            self.request(Method::GET, path)
                .header("X-Firebase-ETag", "true")
                .send()
                .await?,
        )
        .await?;
        let etag = response
            .headers()
            .get("ETag")
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("null_etag"));
        Ok((etag, Self::read_json(path, response).await?))
    }

    async fn read_json(path: &str, response: Response) -> Result<Option<Value>, StoreError> {
        let bytes = response.bytes().await?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialization {
            path: path.to_string(),
            source,
        })?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[async_trait]
impl SessionStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = Self::check(self.request(Method::GET, path).send().await?).await?;
        Self::read_json(path, response).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        Self::check(self.request(Method::PUT, path).json(&value).send().await?).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        Self::check(self.request(Method::PATCH, path).json(&fields).send().await?).await?;
        Ok(())
    }

    async fn transact(&self, path: &str, apply: &mut TransactFn<'_>) -> Result<bool, StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (etag, current) = self
                .read_versioned(path)
                .await
                .map_err(|e| StoreError::Uncommitted(Box::new(e)))?;

            let next = match apply(current) {
                Transaction::Commit(next) => next.unwrap_or(Value::Null),
                Transaction::Abort => return Ok(false),
            };

            let response = self
                .request(Method::PUT, path)
                .header("if-match", etag)
                .json(&next)
                .send()
                .await?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                debug!(path, attempt, "transaction conflict, retrying");
                continue;
            }
            Self::check(response).await?;
            return Ok(true);
        }

        Err(StoreError::Conflict(path.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        Self::check(self.request(Method::DELETE, path).send().await?).await?;
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let response = Self::check(
            self.request(Method::GET, path)
                .query(&[("shallow", "true")])
                .send()
                .await?,
        )
        .await?;
        Ok(Self::read_json(path, response)
            .await?
            .as_ref()
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "firebase"
    }
}
