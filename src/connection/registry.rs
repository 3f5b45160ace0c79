//! Registry of live connections and their bindings

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::handle::{Binding, ConnectionHandle, Identity};

/// Tracks every open connection
///
/// Lookups return cloned handles so callers never hold the lock while
/// sending, and a connection removed mid-iteration is simply skipped.
pub struct ConnectionRegistry {
    /// Map of connection id -> entry
    connections: Arc<RwLock<HashMap<String, ConnectionEntry>>>,
    next_id: AtomicU64,
}

struct ConnectionEntry {
    handle: ConnectionHandle,
    binding: Binding,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique connection id
    pub fn next_id(&self) -> String {
        format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a new, unbound connection
    pub async fn register(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        connections.insert(
            handle.id.clone(),
            ConnectionEntry {
                handle,
                binding: Binding::Unbound,
            },
        );
    }

    /// Remove a connection, returning its handle and final binding.
    ///
    /// Only the first call for an id gets `Some`.
    pub async fn remove(&self, id: &str) -> Option<(ConnectionHandle, Binding)> {
        let mut connections = self.connections.write().await;
        connections.remove(id).map(|entry| (entry.handle, entry.binding))
    }

    pub async fn binding(&self, id: &str) -> Option<Binding> {
        let connections = self.connections.read().await;
        connections.get(id).map(|entry| entry.binding.clone())
    }

    /// Replace the binding of `id`, returning the previous one
    pub async fn bind(&self, id: &str, binding: Binding) -> Option<Binding> {
        let mut connections = self.connections.write().await;
        connections
            .get_mut(id)
            .map(|entry| std::mem::replace(&mut entry.binding, binding))
    }

    pub async fn unbind(&self, id: &str) -> Option<Binding> {
        self.bind(id, Binding::Unbound).await
    }

    /// Bind `id` as admin of `identity.tracker_id`, demoting any other
    /// connection currently bound as admin of that tracker.
    ///
    /// Returns the previous binding of `id` and the demoted handles.
    pub async fn bind_admin(&self, id: &str, identity: Identity) -> (Option<Binding>, Vec<ConnectionHandle>) {
        let mut connections = self.connections.write().await;
        let mut demoted = Vec::new();
        for (conn_id, entry) in connections.iter_mut() {
            if conn_id != id && entry.binding.is_admin_of(&identity.tracker_id) {
                entry.binding = Binding::Unbound;
                demoted.push(entry.handle.clone());
            }
        }
        let previous = connections
            .get_mut(id)
            .map(|entry| std::mem::replace(&mut entry.binding, Binding::Admin(identity)));
        (previous, demoted)
    }

    /// Unbind every connection bound to `tracker_id` except `keep`, returning them
    pub async fn unbind_session(&self, tracker_id: &str, keep: Option<&str>) -> Vec<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        connections
            .iter_mut()
            .filter(|(conn_id, entry)| {
                entry.binding.tracker_id() == Some(tracker_id) && keep != Some(conn_id.as_str())
            })
            .map(|(_, entry)| {
                entry.binding = Binding::Unbound;
                entry.handle.clone()
            })
            .collect()
    }

    /// Snapshot of the handles whose binding matches `predicate`
    pub async fn find<F>(&self, predicate: F) -> Vec<ConnectionHandle>
    where
        F: Fn(&Binding) -> bool,
    {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|entry| predicate(&entry.binding))
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Connections bound to `tracker_id`, admin and viewers alike
    pub async fn session_members(&self, tracker_id: &str) -> Vec<ConnectionHandle> {
        self.find(|binding| binding.tracker_id() == Some(tracker_id)).await
    }

    /// The connection currently bound as admin of `tracker_id`
    pub async fn admin_of(&self, tracker_id: &str) -> Option<ConnectionHandle> {
        self.find(|binding| binding.is_admin_of(tracker_id))
            .await
            .into_iter()
            .next()
    }

    /// Snapshot of every registered handle
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.find(|_| true).await
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
