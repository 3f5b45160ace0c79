//! Message dispatcher for client frames

use std::sync::Arc;

use relay_shared::{codec, ClientMessage, ServerMessage};
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{RelayError, Result};
use crate::session::SessionManager;

/// Routes decoded client messages to session operations and replies
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Handle one text frame from `conn`.
    ///
    /// Every outcome is reported on the connection itself: the success
    /// envelope (if the operation has one) or an `error` envelope. A failed
    /// `viewerJoin` also closes the connection.
    pub async fn handle_text(&self, conn: &ConnectionHandle, text: &str) {
        conn.mark_alive();

        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                let err = RelayError::from(e);
                debug!(conn_id = %conn.id, code = err.code(), error = %err, "rejected frame");
                conn.send(&err.to_message());
                return;
            }
        };

        let kind = message.kind();
        let close_on_error = matches!(message, ClientMessage::ViewerJoin { .. });

        match self.route(conn, message).await {
            Ok(Some(reply)) => {
                conn.send(&reply);
            }
            Ok(None) => {}
            Err(err) => {
                match &err {
                    RelayError::StoreUnavailable(source) => {
                        warn!(conn_id = %conn.id, kind, error = %source, "store failure");
                    }
                    other => info!(conn_id = %conn.id, kind, code = other.code(), "operation rejected"),
                }
                conn.send(&err.to_message());
                if close_on_error {
                    conn.close();
                }
            }
        }
    }

    async fn route(&self, conn: &ConnectionHandle, message: ClientMessage) -> Result<Option<ServerMessage>> {
        let sessions = &self.sessions;
        match message {
            ClientMessage::AdminJoin(join) => sessions.create_session(conn, *join).await.map(Some),
            ClientMessage::AdminReconnect {
                tracker_id,
                uid,
                device_id,
            } => sessions
                .reconnect_admin(conn, &tracker_id, &uid, &device_id)
                .await
                .map(Some),
            ClientMessage::ViewerJoin {
                tracker_id,
                uid,
                device_id,
            } => sessions
                .join_viewer(conn, &tracker_id, &uid, &device_id)
                .await
                .map(Some),
            ClientMessage::BlockUser {
                tracker_id,
                user_to_block,
            } => sessions.block_user(conn, &tracker_id, &user_to_block).await.map(Some),
            ClientMessage::UnblockUser {
                tracker_id,
                user_to_unblock,
            } => sessions
                .unblock_user(conn, &tracker_id, &user_to_unblock)
                .await
                .map(Some),
            ClientMessage::LocationUpdate { location, timestamp } => {
                sessions.update_location(conn, location, timestamp).await.map(|_| None)
            }
            ClientMessage::ToggleNewViewers { tracker_id } => sessions.toggle_new_viewers(conn, &tracker_id).await.map(Some),
            ClientMessage::AlarmUpdate { alarm_status } => sessions.update_alarm(conn, alarm_status).await.map(|_| None),
            ClientMessage::Stop { tracker_id } => sessions.stop(conn, &tracker_id).await.map(Some),
            ClientMessage::ViewerLeave { device_id } => sessions.viewer_leave(conn, &device_id).await.map(Some),
            // Liveness was already recorded
            ClientMessage::Ping => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Binding, Outbound};
    use crate::testing::{TestClient, TestRelay};
    use serde_json::json;

    fn dispatcher(relay: &TestRelay) -> Dispatcher {
        Dispatcher::new(relay.sessions.clone())
    }

    async fn send(dispatcher: &Dispatcher, client: &mut TestClient, frame: serde_json::Value) -> Vec<ServerMessage> {
        dispatcher.handle_text(&client.handle, &frame.to_string()).await;
        client.messages()
    }

    fn error_code(messages: &[ServerMessage]) -> Option<&str> {
        match messages {
            [ServerMessage::Error { code, .. }] => Some(code.as_str()),
            _ => None,
        }
    }

    async fn admin_session(dispatcher: &Dispatcher, admin: &mut TestClient) -> String {
        let replies = send(
            dispatcher,
            admin,
            json!({
                "type": "adminJoin",
                "uid": "A1",
                "deviceId": "D1",
                "name": "Ana",
                "location": {"latitude": 1.5, "longitude": 2.5},
                "alarmStatus": false
            }),
        )
        .await;
        match replies.as_slice() {
            [ServerMessage::AdminJoined { tracker_id, .. }] => tracker_id.clone(),
            other => panic!("unexpected replies: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_admin_join_and_viewer_join() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        let tracker_id = admin_session(&dispatcher, &mut admin).await;

        let mut viewer = relay.connect().await;
        let replies = send(
            &dispatcher,
            &mut viewer,
            json!({"type": "viewerJoin", "trackerId": tracker_id, "uid": "V1", "deviceId": "DV1"}),
        )
        .await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::ViewerJoined { admin_name, .. }] if admin_name == "Ana"
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_keeps_connection() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut client = relay.connect().await;

        dispatcher.handle_text(&client.handle, r#"{"type":"teleport"}"#).await;
        let frames = client.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Outbound::Text(text) if text.contains("UnknownMessageType")));

        let replies = send(&dispatcher, &mut client, json!({"type": "ping"})).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_invalid_message() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut client = relay.connect().await;

        dispatcher.handle_text(&client.handle, "not json").await;
        assert_eq!(error_code(&client.messages()), Some("InvalidMessage"));

        let replies = send(&dispatcher, &mut client, json!({"type": "viewerJoin", "trackerId": "t"})).await;
        assert_eq!(error_code(&replies), Some("InvalidMessage"));
    }

    #[tokio::test]
    async fn test_failed_viewer_join_closes_connection() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut viewer = relay.connect().await;

        dispatcher
            .handle_text(
                &viewer.handle,
                &json!({"type": "viewerJoin", "trackerId": "location_nothere", "uid": "V1", "deviceId": "DV1"})
                    .to_string(),
            )
            .await;

        let frames = viewer.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Outbound::Text(text) if text.contains("SessionNotFound")));
        assert_eq!(frames[1], Outbound::Close);
    }

    #[tokio::test]
    async fn test_capacity_error_over_the_wire() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        let tracker_id = admin_session(&dispatcher, &mut admin).await;

        for uid in ["V1", "V2", "V3"] {
            let mut viewer = relay.connect().await;
            let replies = send(
                &dispatcher,
                &mut viewer,
                json!({"type": "viewerJoin", "trackerId": tracker_id, "uid": uid, "deviceId": "dev"}),
            )
            .await;
            assert!(matches!(replies.as_slice(), [ServerMessage::ViewerJoined { .. }]));
        }

        let mut fourth = relay.connect().await;
        dispatcher
            .handle_text(
                &fourth.handle,
                &json!({"type": "viewerJoin", "trackerId": tracker_id, "uid": "V4", "deviceId": "dev"}).to_string(),
            )
            .await;
        let frames = fourth.frames();
        assert!(matches!(&frames[0], Outbound::Text(text) if text.contains("CapacityExceeded")));
        assert_eq!(frames.last(), Some(&Outbound::Close));
    }

    #[tokio::test]
    async fn test_location_update_has_no_reply() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        admin_session(&dispatcher, &mut admin).await;

        let replies = send(
            &dispatcher,
            &mut admin,
            json!({"type": "locationUpdate", "location": {"latitude": 3.0, "longitude": 4.0}, "timestamp": 7}),
        )
        .await;
        assert!(replies.is_empty());

        let mut stranger = relay.connect().await;
        let replies = send(
            &dispatcher,
            &mut stranger,
            json!({"type": "locationUpdate", "location": {"latitude": 3.0, "longitude": 4.0}}),
        )
        .await;
        assert_eq!(error_code(&replies), Some("Unauthorized"));
    }

    #[tokio::test]
    async fn test_toggle_and_stop_replies() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        let tracker_id = admin_session(&dispatcher, &mut admin).await;

        let replies = send(&dispatcher, &mut admin, json!({"type": "toggleNewViewers", "trackerId": tracker_id})).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::NewViewersToggled { allow_new_viewers: false, .. }]
        ));

        let replies = send(&dispatcher, &mut admin, json!({"type": "stop", "trackerId": tracker_id})).await;
        assert!(matches!(replies.as_slice(), [ServerMessage::Stopped { .. }]));

        let replies = send(&dispatcher, &mut admin, json!({"type": "stop", "trackerId": tracker_id})).await;
        assert_eq!(error_code(&replies), Some("SessionNotFound"));
    }

    #[tokio::test]
    async fn test_store_outage_during_viewer_join() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        let tracker_id = admin_session(&dispatcher, &mut admin).await;

        relay.store.set_down(true);
        let mut viewer = relay.connect().await;
        dispatcher
            .handle_text(
                &viewer.handle,
                &json!({"type": "viewerJoin", "trackerId": tracker_id, "uid": "V1", "deviceId": "DV1"}).to_string(),
            )
            .await;

        let frames = viewer.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Outbound::Text(text) if text.contains("StoreUnavailable")));
        assert_eq!(frames[1], Outbound::Close);
        assert_eq!(relay.registry.binding(viewer.id()).await, Some(Binding::Unbound));

        relay.store.set_down(false);
        assert!(relay.record(&tracker_id).await.unwrap().viewers.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_reported_once_to_admin() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let mut admin = relay.connect().await;
        let tracker_id = admin_session(&dispatcher, &mut admin).await;

        relay.store.set_down(true);
        dispatcher
            .handle_text(
                &admin.handle,
                &json!({"type": "toggleNewViewers", "trackerId": tracker_id}).to_string(),
            )
            .await;
        let frames = admin.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Outbound::Text(text) if text.contains("StoreUnavailable")));

        relay.store.set_down(false);
        assert!(relay.record(&tracker_id).await.unwrap().allow_new_viewers);
        assert!(relay.registry.binding(admin.id()).await.unwrap().is_admin_of(&tracker_id));
    }

    #[tokio::test]
    async fn test_frames_mark_connection_alive() {
        let relay = TestRelay::new();
        let dispatcher = dispatcher(&relay);
        let client = relay.connect().await;

        client.handle.take_alive();
        dispatcher.handle_text(&client.handle, r#"{"type":"ping"}"#).await;
        assert!(client.handle.take_alive());
    }
}
