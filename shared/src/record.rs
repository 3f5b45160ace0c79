//! Persisted session layout
//!
//! Mirrors `sessions/{trackerId}` in the session store. Empty maps and null
//! values are omitted when serialized, matching how the Realtime Database
//! drops them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The session's admin identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRecord {
    pub uid: String,
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default)]
    pub is_alive: bool,
}

/// Last known position and alarm state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationState {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub alarm_status: Value,
}

/// One admitted viewer and its durable mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRecord {
    pub uid: String,
    pub device_id: String,
    #[serde(default)]
    pub is_alive: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub updates: BTreeMap<String, Value>,
}

impl ViewerRecord {
    pub fn new(uid: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            device_id: device_id.into(),
            is_alive: true,
            updates: BTreeMap::new(),
        }
    }
}

/// Full record stored at `sessions/{trackerId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub admin: AdminRecord,
    pub location: LocationState,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub duration: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub viewers: BTreeMap<String, ViewerRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocked: BTreeMap<String, bool>,
    #[serde(default)]
    pub allow_new_viewers: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub send_timestamp: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp_server: Value,
}

impl SessionRecord {
    /// Check whether `(uid, device_id)` is the recorded admin identity
    pub fn is_admin(&self, uid: &str, device_id: &str) -> bool {
        self.admin.uid == uid && self.admin.device_id == device_id
    }

    pub fn is_blocked(&self, uid: &str) -> bool {
        self.blocked.get(uid).copied().unwrap_or(false)
    }

    /// Move `uid` from the viewer list to the block list
    pub fn block(&mut self, uid: &str) {
        self.viewers.remove(uid);
        self.blocked.insert(uid.to_owned(), true);
    }

    pub fn unblock(&mut self, uid: &str) -> bool {
        self.blocked.remove(uid).is_some()
    }

    /// Remove the viewer record for `uid` if it belongs to `device_id`
    pub fn remove_viewer(&mut self, uid: &str, device_id: &str) -> bool {
        match self.viewers.get(uid) {
            Some(viewer) if viewer.device_id == device_id => {
                self.viewers.remove(uid);
                true
            }
            _ => false,
        }
    }

    /// Append `event` under `key` to every mailbox except `skip_uid`'s.
    ///
    /// Keys must sort in delivery order; when `limit` is non-zero the oldest
    /// entries beyond it are dropped. Returns the number of mailboxes touched.
    pub fn append_update(&mut self, key: &str, event: &Value, skip_uid: Option<&str>, limit: usize) -> usize {
        let mut touched = 0;
        for (uid, viewer) in self.viewers.iter_mut() {
            if Some(uid.as_str()) == skip_uid {
                continue;
            }
            viewer.updates.insert(key.to_owned(), event.clone());
            while limit > 0 && viewer.updates.len() > limit {
                viewer.updates.pop_first();
            }
            touched += 1;
        }
        touched
    }
}
