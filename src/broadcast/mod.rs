//! Session event fan-out

mod fanout;

pub use fanout::{Broadcaster, Delivery, Origin};
