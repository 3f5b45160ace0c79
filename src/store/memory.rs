//! In-process session store
//!
//! Keeps one JSON tree behind a mutex. Writes follow Realtime Database
//! semantics: writing null deletes, and objects left empty disappear.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::traits::{SessionStore, StoreError, TransactFn, Transaction};

/// Session store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Drop nulls and empty objects, returning `None` if nothing is left
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

fn lookup<'a>(node: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut current = node;
    for seg in segs {
        current = current.as_object()?.get(*seg)?;
    }
    if is_empty(current) {
        None
    } else {
        Some(current)
    }
}

fn write_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    if value.is_none() && !map.contains_key(*head) {
        return;
    }

    let child = map.entry(head.to_string()).or_insert(Value::Null);
    write_at(child, rest, value);
    if is_empty(child) {
        map.remove(*head);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let root = self.root.lock().await;
        Ok(lookup(&root, &segments(path)).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut root = self.root.lock().await;
        write_at(&mut root, &segments(path), normalize(value));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut root = self.root.lock().await;
        let base = segments(path);
        for (key, value) in fields {
            let mut segs = base.clone();
            segs.extend(segments(&key));
            write_at(&mut root, &segs, normalize(value));
        }
        Ok(())
    }

    async fn transact(&self, path: &str, apply: &mut TransactFn<'_>) -> Result<bool, StoreError> {
        let mut root = self.root.lock().await;
        let segs = segments(path);
        let current = lookup(&root, &segs).cloned();
        match apply(current) {
            Transaction::Commit(value) => {
                write_at(&mut root, &segs, value.and_then(normalize));
                Ok(true)
            }
            Transaction::Abort => Ok(false),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let mut root = self.root.lock().await;
        write_at(&mut root, &segments(path), None);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.lock().await;
        Ok(lookup(&root, &segments(path))
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get_nested() {
        let store = MemoryStore::new();
        store
            .set("sessions/t1", json!({"admin": {"uid": "A1"}, "allowNewViewers": true}))
            .await
            .unwrap();

        assert_eq!(store.get("sessions/t1/admin/uid").await.unwrap(), Some(json!("A1")));
        assert_eq!(store.get("sessions/t2").await.unwrap(), None);
        assert_eq!(store.children("sessions").await.unwrap(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.set("sessions/t1/viewers/V1/uid", json!("V1")).await.unwrap();
        store.remove("sessions/t1/viewers/V1").await.unwrap();

        assert_eq!(store.get("sessions").await.unwrap(), None);
        assert!(store.children("sessions").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_and_empty_values_are_not_stored() {
        let store = MemoryStore::new();
        store
            .set("sessions/t1", json!({"blocked": {}, "photo": null, "duration": 5}))
            .await
            .unwrap();
        assert_eq!(store.get("sessions/t1").await.unwrap(), Some(json!({"duration": 5})));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .set("sessions/t1/location", json!({"latitude": 1.0, "longitude": 2.0, "alarmStatus": true}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("latitude".into(), json!(3.0));
        fields.insert("extra/nested".into(), json!("x"));
        store.update("sessions/t1/location", fields).await.unwrap();

        assert_eq!(
            store.get("sessions/t1/location").await.unwrap(),
            Some(json!({"latitude": 3.0, "longitude": 2.0, "alarmStatus": true, "extra": {"nested": "x"}}))
        );
    }

    #[tokio::test]
    async fn test_transact_commit_and_abort() {
        let store = MemoryStore::new();
        store.set("counter", json!(1)).await.unwrap();

        let committed = store
            .transact("counter", &mut |current| {
                let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
                Transaction::Commit(Some(json!(n + 1)))
            })
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(store.get("counter").await.unwrap(), Some(json!(2)));

        let committed = store.transact("counter", &mut |_| Transaction::Abort).await.unwrap();
        assert!(!committed);
        assert_eq!(store.get("counter").await.unwrap(), Some(json!(2)));

        store.transact("counter", &mut |_| Transaction::Commit(None)).await.unwrap();
        assert_eq!(store.get("counter").await.unwrap(), None);
    }
}
