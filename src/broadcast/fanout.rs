//! Fan-out of session events to live connections and viewer mailboxes
//!
//! Every session event takes two independent paths:
//! - live: pushed to each connection bound to the session
//! - durable: appended under a time-ordered key to each viewer's mailbox
//!
//! A failure on one path is logged and never cancels the other.

use std::sync::Arc;

use relay_shared::{codec, ServerMessage};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionRegistry;
use crate::error::Result;
use crate::store::SessionRecords;

/// The connection and user an event came from; both are skipped
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub conn_id: &'a str,
    pub uid: &'a str,
}

/// What one notification reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the frame was queued on
    pub live: usize,
    /// Mailboxes the event was appended to
    pub mailboxes: usize,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    records: SessionRecords,
    mailbox_limit: usize,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, records: SessionRecords, mailbox_limit: usize) -> Self {
        Self {
            registry,
            records,
            mailbox_limit,
        }
    }

    /// Deliver `event` to everyone in `tracker_id` except `origin`, live and durably
    pub async fn notify_session(&self, tracker_id: &str, event: &ServerMessage, origin: Option<Origin<'_>>) -> Delivery {
        let (live, mailboxes) = tokio::join!(
            self.push_live(tracker_id, event, origin.map(|o| o.conn_id)),
            self.append_mailboxes(tracker_id, event, origin.map(|o| o.uid)),
        );

        let mailboxes = match mailboxes {
            Ok(count) => count,
            Err(e) => {
                warn!(tracker_id, kind = event.kind(), error = %e, "mailbox append failed");
                0
            }
        };
        Delivery { live, mailboxes }
    }

    /// Push `event` to every live connection bound to `tracker_id`
    pub async fn push_live(&self, tracker_id: &str, event: &ServerMessage, exclude: Option<&str>) -> usize {
        let text = match codec::encode(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(tracker_id, kind = event.kind(), error = %e, "failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in self.registry.session_members(tracker_id).await {
            if Some(conn.id.as_str()) == exclude {
                continue;
            }
            if conn.send_encoded(text.clone()) {
                delivered += 1;
            } else {
                debug!(tracker_id, conn_id = %conn.id, "connection gone before delivery");
            }
        }
        debug!(tracker_id, kind = event.kind(), delivered, "live push");
        delivered
    }

    /// Append `event` to the mailbox of every viewer of `tracker_id` except `skip_uid`.
    ///
    /// Runs as a session transaction, so it never recreates a deleted session.
    async fn append_mailboxes(&self, tracker_id: &str, event: &ServerMessage, skip_uid: Option<&str>) -> Result<usize> {
        let value = codec::encode_value(event)?;
        let key = Uuid::now_v7().to_string();
        let limit = self.mailbox_limit;

        self.records
            .transact(tracker_id, |current| {
                Ok(current
                    .as_mut()
                    .map(|record| record.append_update(&key, &value, skip_uid, limit))
                    .unwrap_or(0))
            })
            .await
    }
}
