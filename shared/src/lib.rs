//! Location Relay Shared Types
//!
//! This crate provides the wire messages, persisted session records and
//! codec shared between the relay server and its clients.

pub mod codec;
pub mod messages;
pub mod record;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use messages::*;
pub use record::{AdminRecord, LocationState, SessionRecord, ViewerRecord};

/// Default operating limits for the relay
pub mod limits {
    /// Heartbeat ping interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

    /// Maximum number of viewers admitted to one session
    pub const VIEWER_CAPACITY: usize = 3;

    /// Per-call timeout for session store operations
    pub const STORE_TIMEOUT_MS: u64 = 5_000;

    /// Retries on transient store errors before giving up
    pub const STORE_MAX_RETRIES: u32 = 3;

    /// Maximum events kept in one viewer mailbox (0 = unbounded)
    pub const MAILBOX_LIMIT: usize = 256;

    /// How long a session may live without a bound admin before it is reaped
    pub const ORPHAN_SESSION_TTL_MS: u64 = 600_000;

    /// How often the orphan reaper scans the store
    pub const REAPER_INTERVAL_MS: u64 = 60_000;

    /// Prefix of generated tracker ids
    pub const TRACKER_ID_PREFIX: &str = "location_";

    /// Number of random base-36 characters after the prefix
    pub const TRACKER_ID_LEN: usize = 8;

    /// Largest inbound text frame the codec accepts
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
}

/// Store path helpers for the persisted session layout
pub mod paths {
    /// Root of all session records
    pub const SESSIONS: &str = "sessions";

    /// Path of one session record
    pub fn session(tracker_id: &str) -> String {
        format!("{SESSIONS}/{tracker_id}")
    }

    /// Whether `key` can be used as a single path segment.
    ///
    /// Rejects the characters the Realtime Database forbids in keys, plus
    /// anything that would let a client address a different path.
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= 768
            && key != "."
            && key != ".."
            && !key
                .chars()
                .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control())
    }
}
