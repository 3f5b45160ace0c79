//! Individual connection handle and role binding

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_shared::{codec, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Frame queued for the connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text frame
    Text(String),
    /// Liveness ping
    Ping,
    /// Close the connection after flushing what is queued
    Close,
}

/// Handle to push frames to one connection
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: String,
    pub addr: Option<SocketAddr>,
    sender: mpsc::UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
    /// Cancelled when the relay drops the connection without flushing
    terminate: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: String, addr: Option<SocketAddr>, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            addr,
            sender,
            alive: Arc::new(AtomicBool::new(true)),
            terminate: CancellationToken::new(),
        }
    }

    /// Create a handle together with the receiving end of its outbound queue
    pub fn channel(id: String, addr: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, addr, tx), rx)
    }

    /// Queue a message; returns false if the connection is gone
    pub fn send(&self, message: &ServerMessage) -> bool {
        match codec::encode(message) {
            Ok(text) => self.send_encoded(text),
            Err(e) => {
                error!(conn_id = %self.id, kind = message.kind(), error = %e, "failed to encode message");
                false
            }
        }
    }

    /// Queue an already encoded frame
    pub fn send_encoded(&self, text: String) -> bool {
        self.sender.send(Outbound::Text(text)).is_ok()
    }

    /// Queue a liveness ping
    pub fn ping(&self) -> bool {
        self.sender.send(Outbound::Ping).is_ok()
    }

    /// Ask the writer to close the connection once the queue drains
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }

    /// Drop the connection now, discarding whatever is still queued
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once `terminate` has been called on any clone of this handle
    pub async fn terminated(&self) {
        self.terminate.cancelled().await
    }

    /// Record activity (any message, ping or pong)
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether it was set
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

/// Role of a connection within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unbound,
    Admin,
    Viewer,
}

/// Who a bound connection speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub device_id: String,
    pub tracker_id: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>, device_id: impl Into<String>, tracker_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            device_id: device_id.into(),
            tracker_id: tracker_id.into(),
        }
    }
}

/// Current binding of a connection; replaced wholesale on rebind
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Unbound,
    Admin(Identity),
    Viewer(Identity),
}

impl Binding {
    pub fn role(&self) -> Role {
        match self {
            Binding::Unbound => Role::Unbound,
            Binding::Admin(_) => Role::Admin,
            Binding::Viewer(_) => Role::Viewer,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Binding::Unbound => None,
            Binding::Admin(identity) | Binding::Viewer(identity) => Some(identity),
        }
    }

    pub fn tracker_id(&self) -> Option<&str> {
        self.identity().map(|identity| identity.tracker_id.as_str())
    }

    pub fn is_admin_of(&self, tracker_id: &str) -> bool {
        matches!(self, Binding::Admin(identity) if identity.tracker_id == tracker_id)
    }

    pub fn is_viewer_of(&self, tracker_id: &str, uid: &str) -> bool {
        matches!(self, Binding::Viewer(identity) if identity.tracker_id == tracker_id && identity.uid == uid)
    }
}
