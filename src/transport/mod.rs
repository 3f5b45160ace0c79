//! WebSocket transport
//!
//! One axum router: the upgrade endpoint feeds frames to the dispatcher and
//! drains each connection's outbound queue; plain HTTP gets a health line.

mod websocket;

pub use websocket::{router, AppState};
