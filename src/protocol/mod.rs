//! Inbound message handling
//!
//! Decodes each text frame once and routes it to the session manager.

mod dispatcher;

pub use dispatcher::Dispatcher;
