//! Connection liveness
//!
//! Two-tick death detection: every interval each connection is either
//! pinged (flag cleared, ping sent) or, if nothing was heard since the
//! previous ping, terminated.

mod monitor;

pub use monitor::{HeartbeatMonitor, HeartbeatMonitorHandle, TickReport};
