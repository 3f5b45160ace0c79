//! Live connection tracking
//!
//! This module handles:
//! - Per-connection handles for pushing frames, pings and close requests
//! - The role binding (admin/viewer of a tracker) of every connection
//! - Snapshot lookups by tracker id and uid for fan-out and kicks

mod handle;
mod registry;

pub use handle::{Binding, ConnectionHandle, Identity, Outbound, Role};
pub use registry::ConnectionRegistry;
