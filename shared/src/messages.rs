//! Wire messages exchanged over the relay's WebSocket connections
//!
//! Every frame is a JSON object with a string `type` discriminator plus
//! type-specific fields in camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::paths;
use crate::record::{LocationState, ViewerRecord};

/// Latitude/longitude pair as sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Payload of `adminJoin`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminJoin {
    pub uid: String,
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
    pub location: Coordinates,
    #[serde(default)]
    pub timestamp_local: Value,
    #[serde(default)]
    pub alarm_status: Value,
    #[serde(default)]
    pub duration: Value,
    /// Viewers to seed the session with; anything but an object of viewer
    /// records is ignored
    #[serde(default, deserialize_with = "lenient_viewers")]
    pub viewers: Option<BTreeMap<String, ViewerRecord>>,
    #[serde(default)]
    pub send_timestamp: Value,
    #[serde(default)]
    pub timestamp_server: Value,
}

fn lenient_viewers<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, ViewerRecord>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        entries
            .into_iter()
            .filter_map(|(uid, entry)| serde_json::from_value(entry).ok().map(|viewer| (uid, viewer)))
            .collect(),
    ))
}

/// Inbound message, decoded once from the envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    AdminJoin(Box<AdminJoin>),
    #[serde(rename_all = "camelCase")]
    AdminReconnect {
        tracker_id: String,
        uid: String,
        device_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ViewerJoin {
        tracker_id: String,
        uid: String,
        device_id: String,
    },
    #[serde(rename_all = "camelCase")]
    BlockUser {
        tracker_id: String,
        user_to_block: String,
    },
    #[serde(rename_all = "camelCase")]
    UnblockUser {
        tracker_id: String,
        user_to_unblock: String,
    },
    #[serde(rename_all = "camelCase")]
    LocationUpdate {
        location: Coordinates,
        #[serde(default)]
        timestamp: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToggleNewViewers { tracker_id: String },
    #[serde(rename_all = "camelCase")]
    AlarmUpdate {
        #[serde(default)]
        alarm_status: Value,
    },
    #[serde(rename_all = "camelCase")]
    Stop { tracker_id: String },
    #[serde(rename_all = "camelCase")]
    ViewerLeave { device_id: String },
    Ping,
}

impl ClientMessage {
    /// Every `type` value the relay understands
    pub const KINDS: &'static [&'static str] = &[
        "adminJoin",
        "adminReconnect",
        "viewerJoin",
        "blockUser",
        "unblockUser",
        "locationUpdate",
        "toggleNewViewers",
        "alarmUpdate",
        "stop",
        "viewerLeave",
        "ping",
    ];

    /// The wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::AdminJoin(_) => "adminJoin",
            ClientMessage::AdminReconnect { .. } => "adminReconnect",
            ClientMessage::ViewerJoin { .. } => "viewerJoin",
            ClientMessage::BlockUser { .. } => "blockUser",
            ClientMessage::UnblockUser { .. } => "unblockUser",
            ClientMessage::LocationUpdate { .. } => "locationUpdate",
            ClientMessage::ToggleNewViewers { .. } => "toggleNewViewers",
            ClientMessage::AlarmUpdate { .. } => "alarmUpdate",
            ClientMessage::Stop { .. } => "stop",
            ClientMessage::ViewerLeave { .. } => "viewerLeave",
            ClientMessage::Ping => "ping",
        }
    }

    /// Returns the name of the first field that cannot be used as a store key.
    ///
    /// Identifiers end up as path segments (`sessions/{trackerId}/viewers/{uid}`),
    /// so they are checked once here instead of at every store call.
    pub fn invalid_key(&self) -> Option<&'static str> {
        let keys: Vec<(&'static str, &str)> = match self {
            ClientMessage::AdminJoin(join) => vec![("uid", join.uid.as_str())],
            ClientMessage::AdminReconnect { tracker_id, uid, .. }
            | ClientMessage::ViewerJoin { tracker_id, uid, .. } => {
                vec![("trackerId", tracker_id.as_str()), ("uid", uid.as_str())]
            }
            ClientMessage::BlockUser {
                tracker_id,
                user_to_block,
            } => vec![
                ("trackerId", tracker_id.as_str()),
                ("userToBlock", user_to_block.as_str()),
            ],
            ClientMessage::UnblockUser {
                tracker_id,
                user_to_unblock,
            } => vec![
                ("trackerId", tracker_id.as_str()),
                ("userToUnblock", user_to_unblock.as_str()),
            ],
            ClientMessage::ToggleNewViewers { tracker_id } | ClientMessage::Stop { tracker_id } => {
                vec![("trackerId", tracker_id.as_str())]
            }
            ClientMessage::LocationUpdate { .. }
            | ClientMessage::AlarmUpdate { .. }
            | ClientMessage::ViewerLeave { .. }
            | ClientMessage::Ping => Vec::new(),
        };

        keys.into_iter()
            .find(|(_, value)| !paths::is_valid_key(value))
            .map(|(field, _)| field)
    }
}

/// Marker carried by every successful reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Allowed,
}

/// Outbound message: replies, fan-out events and errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    AdminJoined {
        status: Status,
        tracker_id: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    AdminReconnected {
        status: Status,
        tracker_id: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    ViewerJoined {
        status: Status,
        message: String,
        location: LocationState,
        admin_name: String,
        admin_photo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserBlocked {
        status: Status,
        user_to_block: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    UserUnblocked {
        status: Status,
        user_to_unblock: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    NewViewersToggled {
        status: Status,
        allow_new_viewers: bool,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Stopped {
        status: Status,
        tracker_id: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    ViewerLeft { status: Status, message: String },
    #[serde(rename_all = "camelCase")]
    LocationUpdate {
        latitude: f64,
        longitude: f64,
        timestamp: Value,
    },
    #[serde(rename_all = "camelCase")]
    AlarmUpdate { alarm_status: Value },
    #[serde(rename_all = "camelCase")]
    SessionEnded { tracker_id: String, message: String },
    Disconnected { message: String },
    Error { code: String, message: String },
}

/// Builder helpers for replies
impl ServerMessage {
    pub fn admin_joined(tracker_id: impl Into<String>) -> Self {
        ServerMessage::AdminJoined {
            status: Status::Allowed,
            tracker_id: tracker_id.into(),
            message: "Admin joined successfully".into(),
        }
    }

    pub fn admin_reconnected(tracker_id: impl Into<String>) -> Self {
        ServerMessage::AdminReconnected {
            status: Status::Allowed,
            tracker_id: tracker_id.into(),
            message: "Admin reconnected successfully".into(),
        }
    }

    pub fn viewer_joined(location: LocationState, admin_name: String, admin_photo: Option<String>) -> Self {
        ServerMessage::ViewerJoined {
            status: Status::Allowed,
            message: "Viewer joined successfully".into(),
            location,
            admin_name,
            admin_photo,
        }
    }

    pub fn user_blocked(uid: impl Into<String>) -> Self {
        ServerMessage::UserBlocked {
            status: Status::Allowed,
            user_to_block: uid.into(),
            message: "User blocked successfully".into(),
        }
    }

    pub fn user_unblocked(uid: impl Into<String>) -> Self {
        ServerMessage::UserUnblocked {
            status: Status::Allowed,
            user_to_unblock: uid.into(),
            message: "User unblocked successfully".into(),
        }
    }

    pub fn new_viewers_toggled(allow_new_viewers: bool) -> Self {
        ServerMessage::NewViewersToggled {
            status: Status::Allowed,
            allow_new_viewers,
            message: "New viewers access toggled successfully".into(),
        }
    }

    pub fn stopped(tracker_id: impl Into<String>) -> Self {
        ServerMessage::Stopped {
            status: Status::Allowed,
            tracker_id: tracker_id.into(),
            message: "Location sharing stopped successfully".into(),
        }
    }

    pub fn viewer_left() -> Self {
        ServerMessage::ViewerLeft {
            status: Status::Allowed,
            message: "Viewer left successfully".into(),
        }
    }

    pub fn session_ended(tracker_id: impl Into<String>) -> Self {
        ServerMessage::SessionEnded {
            tracker_id: tracker_id.into(),
            message: "The admin stopped sharing this location".into(),
        }
    }

    pub fn disconnected_by_block() -> Self {
        ServerMessage::Disconnected {
            message: "You were blocked by the admin and can no longer view this location".into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AdminJoined { .. } => "adminJoined",
            ServerMessage::AdminReconnected { .. } => "adminReconnected",
            ServerMessage::ViewerJoined { .. } => "viewerJoined",
            ServerMessage::UserBlocked { .. } => "userBlocked",
            ServerMessage::UserUnblocked { .. } => "userUnblocked",
            ServerMessage::NewViewersToggled { .. } => "newViewersToggled",
            ServerMessage::Stopped { .. } => "stopped",
            ServerMessage::ViewerLeft { .. } => "viewerLeft",
            ServerMessage::LocationUpdate { .. } => "locationUpdate",
            ServerMessage::AlarmUpdate { .. } => "alarmUpdate",
            ServerMessage::SessionEnded { .. } => "sessionEnded",
            ServerMessage::Disconnected { .. } => "disconnected",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kinds_cover_every_variant() {
        let samples = [
            ClientMessage::AdminReconnect {
                tracker_id: "t".into(),
                uid: "u".into(),
                device_id: "d".into(),
            },
            ClientMessage::Stop { tracker_id: "t".into() },
            ClientMessage::ViewerLeave { device_id: "d".into() },
            ClientMessage::Ping,
        ];
        for msg in samples {
            assert!(ClientMessage::KINDS.contains(&msg.kind()));
        }
    }

    #[test]
    fn test_reply_carries_status_and_mirrored_type() {
        let value = serde_json::to_value(ServerMessage::admin_joined("location_abcd1234")).unwrap();
        assert_eq!(value["type"], "adminJoined");
        assert_eq!(value["status"], "allowed");
        assert_eq!(value["trackerId"], "location_abcd1234");
        assert!(value["message"].is_string());
    }

    #[test]
    fn test_error_has_no_status() {
        let value = serde_json::to_value(ServerMessage::error("Blocked", "nope")).unwrap();
        assert_eq!(value, json!({"type": "error", "code": "Blocked", "message": "nope"}));
    }

    #[test]
    fn test_invalid_key_detection() {
        let msg = ClientMessage::BlockUser {
            tracker_id: "location_ok".into(),
            user_to_block: "../admin".into(),
        };
        assert_eq!(msg.invalid_key(), Some("userToBlock"));

        let msg = ClientMessage::ViewerJoin {
            tracker_id: "location_ok".into(),
            uid: "V1".into(),
            device_id: "any/device".into(),
        };
        assert_eq!(msg.invalid_key(), None);
    }
}
