//! Fixtures shared by the relay's unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_shared::{AdminJoin, Coordinates, ServerMessage, SessionRecord};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::connection::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::session::SessionManager;
use crate::store::{MemoryStore, SessionRecords, SessionStore, StoreError, TransactFn};

/// In-memory store whose transactions and listings fail while it is down.
///
/// Plain reads keep working so tests can inspect what was left behind.
#[derive(Default)]
pub struct OutageStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl OutageStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Uncommitted(Box::new(StoreError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            })));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for OutageStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update(path, fields).await
    }

    async fn transact(&self, path: &str, apply: &mut TransactFn<'_>) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.transact(path, apply).await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.children(path).await
    }

    fn name(&self) -> &'static str {
        "outage"
    }
}

/// A relay wired to an in-memory store
pub struct TestRelay {
    pub store: Arc<OutageStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
}

/// A channel-backed client connection
pub struct TestClient {
    pub handle: ConnectionHandle,
    rx: UnboundedReceiver<Outbound>,
}

impl TestRelay {
    pub fn new() -> Self {
        Self::with_limits(3, 0)
    }

    pub fn with_limits(viewer_capacity: usize, mailbox_limit: usize) -> Self {
        let store = Arc::new(OutageStore::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            registry.clone(),
            store.clone(),
            viewer_capacity,
            mailbox_limit,
        ));
        Self {
            store,
            registry,
            sessions,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let (handle, rx) = ConnectionHandle::channel(self.registry.next_id(), None);
        self.registry.register(handle.clone()).await;
        TestClient { handle, rx }
    }

    /// Create a session administered by `client` as `(A1, D1)`
    pub async fn create_session(&self, client: &mut TestClient) -> String {
        let reply = self
            .sessions
            .create_session(&client.handle, admin_join("A1", "D1"))
            .await
            .unwrap();
        match reply {
            ServerMessage::AdminJoined { tracker_id, .. } => tracker_id,
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    pub async fn record(&self, tracker_id: &str) -> Option<SessionRecord> {
        SessionRecords::new(self.store.clone()).load(tracker_id).await.unwrap()
    }
}

impl TestClient {
    /// Drain queued frames
    pub fn frames(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drain queued frames, keeping decoded text messages
    pub fn messages(&mut self) -> Vec<ServerMessage> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    pub fn id(&self) -> &str {
        &self.handle.id
    }
}

pub fn admin_join(uid: &str, device_id: &str) -> AdminJoin {
    AdminJoin {
        uid: uid.to_string(),
        device_id: device_id.to_string(),
        name: "Ana".to_string(),
        photo: Some("https://example.com/ana.png".to_string()),
        location: Coordinates {
            latitude: -23.55,
            longitude: -46.63,
        },
        timestamp_local: Value::from(1_700_000_000_000u64),
        alarm_status: Value::Bool(false),
        duration: Value::from(3600),
        viewers: None,
        send_timestamp: Value::Null,
        timestamp_server: Value::Null,
    }
}
