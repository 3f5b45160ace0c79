//! Session store adapters
//!
//! The relay treats the durable store as the source of truth for session
//! membership and last-known state. Backends:
//! - `MemoryStore` for development and tests
//! - `FirebaseStore` for the Realtime Database REST API
//! - `RetryingStore` wraps either with timeouts and bounded retries
//!
//! `SessionRecords` layers typed session access on top.

mod firebase;
mod memory;
mod records;
mod retry;
mod traits;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;
pub use records::SessionRecords;
pub use retry::RetryingStore;
pub use traits::{SessionStore, StoreError, TransactFn, Transaction};
