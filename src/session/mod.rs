//! Session lifecycle
//!
//! This module handles:
//! - Creating, joining, moderating and ending sessions
//! - Per-tracker serialization of check-then-act operations
//! - Removing sessions whose admin never came back

mod locks;
mod manager;
mod reaper;

pub use manager::SessionManager;
pub use reaper::OrphanReaper;
