//! Typed access to `sessions/{trackerId}` records

use std::sync::Arc;

use relay_shared::{paths, SessionRecord};
use serde_json::Value;

use super::traits::{SessionStore, StoreError, Transaction};
use crate::error::{RelayError, Result};

/// Session records stored under [`paths::SESSIONS`]
#[derive(Clone)]
pub struct SessionRecords {
    store: Arc<dyn SessionStore>,
}

impl SessionRecords {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub async fn load(&self, tracker_id: &str) -> Result<Option<SessionRecord>> {
        let path = paths::session(tracker_id);
        match self.store.get(&path).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Serialization { path, source }.into()),
            None => Ok(None),
        }
    }

    /// Read-modify-write one session record atomically.
    ///
    /// `apply` sees the current record (`None` if absent) and may edit it,
    /// create it, or set it to `None` to delete it. Returning `Ok` commits
    /// whatever `apply` left behind (nothing is written if it is unchanged);
    /// returning `Err` aborts without writing.
    /// The closure may run more than once under contention.
    pub async fn transact<T, F>(&self, tracker_id: &str, mut apply: F) -> Result<T>
    where
        F: FnMut(&mut Option<SessionRecord>) -> Result<T> + Send,
        T: Send,
    {
        let path = paths::session(tracker_id);
        let mut outcome: Option<Result<T>> = None;

        let mut step = |current: Option<Value>| -> Transaction {
            let mut record = match current.map(serde_json::from_value::<SessionRecord>).transpose() {
                Ok(record) => record,
                Err(source) => {
                    outcome = Some(Err(StoreError::Serialization {
                        path: path.clone(),
                        source,
                    }
                    .into()));
                    return Transaction::Abort;
                }
            };

            let original = record.clone();
            match apply(&mut record) {
                Ok(value) if record == original => {
                    outcome = Some(Ok(value));
                    Transaction::Abort
                }
                Ok(value) => match record.as_ref().map(serde_json::to_value).transpose() {
                    Ok(next) => {
                        outcome = Some(Ok(value));
                        Transaction::Commit(next)
                    }
                    Err(source) => {
                        outcome = Some(Err(StoreError::Serialization {
                            path: path.clone(),
                            source,
                        }
                        .into()));
                        Transaction::Abort
                    }
                },
                Err(e) => {
                    outcome = Some(Err(e));
                    Transaction::Abort
                }
            }
        };

        self.store.transact(&path, &mut step).await?;
        outcome.unwrap_or_else(|| Err(RelayError::from(StoreError::Conflict(path))))
    }

    /// Ids of every stored session
    pub async fn tracker_ids(&self) -> Result<Vec<String>> {
        Ok(self.store.children(paths::SESSIONS).await?)
    }
}
