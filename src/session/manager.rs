//! Session manager: membership, access control and lifecycle of sessions

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use relay_shared::limits::{TRACKER_ID_LEN, TRACKER_ID_PREFIX};
use relay_shared::state_machine::{SessionEvent, SessionStateMachine};
use relay_shared::{
    paths, AdminJoin, AdminRecord, Coordinates, LocationState, ServerMessage, SessionRecord, ViewerRecord,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::locks::SessionLocks;
use crate::broadcast::{Broadcaster, Origin};
use crate::connection::{Binding, ConnectionHandle, ConnectionRegistry, Identity};
use crate::error::{RelayError, Result};
use crate::store::{SessionRecords, SessionStore, StoreError};

/// Attempts at drawing an unused tracker id before giving up
const MAX_TRACKER_ID_ATTEMPTS: usize = 8;

const TRACKER_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Draw a fresh `location_xxxxxxxx` tracker id
pub fn generate_tracker_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TRACKER_ID_LEN)
        .map(|_| TRACKER_ID_ALPHABET[rng.random_range(0..TRACKER_ID_ALPHABET.len())] as char)
        .collect();
    format!("{TRACKER_ID_PREFIX}{suffix}")
}

/// Check that `event` is legal for a session in the observed state
fn transition(record: Option<&SessionRecord>, event: SessionEvent) -> Result<()> {
    let mut fsm = SessionStateMachine::observe(record.is_some());
    if fsm.process_event(event).is_valid() {
        Ok(())
    } else {
        Err(RelayError::SessionNotFound)
    }
}

/// Owns every session-level operation
///
/// The durable record is the source of truth for membership; the registry
/// only says which live connection speaks for whom.
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    records: SessionRecords,
    broadcaster: Broadcaster,
    locks: SessionLocks,
    viewer_capacity: usize,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn SessionStore>,
        viewer_capacity: usize,
        mailbox_limit: usize,
    ) -> Self {
        let records = SessionRecords::new(store);
        let broadcaster = Broadcaster::new(registry.clone(), records.clone(), mailbox_limit);
        Self {
            registry,
            records,
            broadcaster,
            locks: SessionLocks::new(),
            viewer_capacity,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The caller's admin identity, if it is bound as admin (of `tracker_id` when given)
    async fn require_admin(&self, conn_id: &str, tracker_id: Option<&str>) -> Result<Identity> {
        match self.registry.binding(conn_id).await {
            Some(Binding::Admin(identity)) if tracker_id.map_or(true, |id| id == identity.tracker_id) => Ok(identity),
            _ => Err(RelayError::Unauthorized),
        }
    }

    /// Create a session owned by the caller and bind it as admin
    pub async fn create_session(&self, conn: &ConnectionHandle, join: AdminJoin) -> Result<ServerMessage> {
        let AdminJoin {
            uid,
            device_id,
            name,
            photo,
            location,
            timestamp_local,
            alarm_status,
            duration,
            viewers,
            send_timestamp,
            timestamp_server,
        } = join;

        let offered = viewers.unwrap_or_default();
        let offered_count = offered.len();
        let viewers: BTreeMap<String, ViewerRecord> = offered
            .into_iter()
            .filter(|(key, _)| paths::is_valid_key(key))
            .take(self.viewer_capacity)
            .collect();
        if viewers.len() < offered_count {
            warn!(uid = %uid, offered = offered_count, kept = viewers.len(), "dropping initial viewers over capacity");
        }

        let record = SessionRecord {
            admin: AdminRecord {
                uid: uid.clone(),
                device_id: device_id.clone(),
                name,
                photo,
                is_alive: true,
            },
            location: LocationState {
                latitude: location.latitude,
                longitude: location.longitude,
                timestamp: timestamp_local,
                alarm_status,
            },
            duration,
            viewers,
            blocked: BTreeMap::new(),
            allow_new_viewers: true,
            send_timestamp,
            timestamp_server,
        };

        for attempt in 1..=MAX_TRACKER_ID_ATTEMPTS {
            let tracker_id = generate_tracker_id();
            let guard = self.locks.lock(&tracker_id).await;
            let created = self
                .records
                .transact(&tracker_id, |current| {
                    if transition(current.as_ref(), SessionEvent::Created).is_err() {
                        return Ok(false);
                    }
                    *current = Some(record.clone());
                    Ok(true)
                })
                .await?;

            if created {
                let identity = Identity::new(uid.as_str(), device_id.as_str(), tracker_id.as_str());
                let (previous, _) = self.registry.bind_admin(&conn.id, identity.clone()).await;
                drop(guard);
                info!(tracker_id = %tracker_id, uid = %uid, conn_id = %conn.id, "session created");
                self.release_replaced(&conn.id, previous, &Binding::Admin(identity)).await;
                return Ok(ServerMessage::admin_joined(tracker_id));
            }
            debug!(tracker_id = %tracker_id, attempt, "tracker id taken, drawing another");
        }

        Err(StoreError::Conflict(paths::SESSIONS.to_string()).into())
    }

    /// Rebind the caller as admin of an existing session
    pub async fn reconnect_admin(
        &self,
        conn: &ConnectionHandle,
        tracker_id: &str,
        uid: &str,
        device_id: &str,
    ) -> Result<ServerMessage> {
        let guard = self.locks.lock(tracker_id).await;
        self.records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::AdminReconnected)?;
                if let Some(record) = current.as_mut() {
                    record.admin.is_alive = true;
                }
                Ok(())
            })
            .await?;

        let identity = Identity::new(uid, device_id, tracker_id);
        let (previous, demoted) = self.registry.bind_admin(&conn.id, identity.clone()).await;
        drop(guard);
        for stale in demoted {
            info!(tracker_id, conn_id = %stale.id, "stale admin connection demoted");
        }
        info!(tracker_id, uid, conn_id = %conn.id, "admin reconnected");
        self.release_replaced(&conn.id, previous, &Binding::Admin(identity)).await;
        Ok(ServerMessage::admin_reconnected(tracker_id))
    }

    /// Admit the caller as a viewer of `tracker_id`
    pub async fn join_viewer(
        &self,
        conn: &ConnectionHandle,
        tracker_id: &str,
        uid: &str,
        device_id: &str,
    ) -> Result<ServerMessage> {
        let guard = self.locks.lock(tracker_id).await;
        let capacity = self.viewer_capacity;

        let joined = self
            .records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::ViewerJoined)?;
                let record = current.as_mut().ok_or(RelayError::SessionNotFound)?;

                let rejoining = record.viewers.contains_key(uid);
                if !rejoining && record.viewers.len() >= capacity {
                    return Err(RelayError::CapacityExceeded);
                }
                if record.is_blocked(uid) {
                    return Err(RelayError::Blocked);
                }
                if !rejoining && !record.allow_new_viewers {
                    return Err(RelayError::ViewersNotAllowed);
                }

                let updates = record
                    .viewers
                    .remove(uid)
                    .map(|viewer| viewer.updates)
                    .unwrap_or_default();
                record.viewers.insert(
                    uid.to_string(),
                    ViewerRecord {
                        updates,
                        ..ViewerRecord::new(uid, device_id)
                    },
                );
                Ok((record.location.clone(), record.admin.name.clone(), record.admin.photo.clone()))
            })
            .await;

        let (location, admin_name, admin_photo) = match joined {
            Ok(snapshot) => snapshot,
            Err(e) => {
                info!(tracker_id, uid, conn_id = %conn.id, code = e.code(), "viewer join rejected");
                return Err(e);
            }
        };

        let binding = Binding::Viewer(Identity::new(uid, device_id, tracker_id));
        let previous = self.registry.bind(&conn.id, binding.clone()).await;
        drop(guard);
        info!(tracker_id, uid, conn_id = %conn.id, "viewer joined");
        self.release_replaced(&conn.id, previous, &binding).await;
        Ok(ServerMessage::viewer_joined(location, admin_name, admin_photo))
    }

    /// Block `uid` from the caller's session and kick its live connections
    pub async fn block_user(&self, conn: &ConnectionHandle, tracker_id: &str, uid: &str) -> Result<ServerMessage> {
        self.require_admin(&conn.id, Some(tracker_id)).await?;
        let _guard = self.locks.lock(tracker_id).await;

        self.records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::AccessChanged)?;
                if let Some(record) = current.as_mut() {
                    record.block(uid);
                }
                Ok(())
            })
            .await?;

        let notice = ServerMessage::disconnected_by_block();
        let targets = self
            .registry
            .find(|binding| binding.is_viewer_of(tracker_id, uid))
            .await;
        for target in &targets {
            self.registry.unbind(&target.id).await;
            target.send(&notice);
            target.close();
        }
        info!(tracker_id, uid, kicked = targets.len(), "user blocked");
        Ok(ServerMessage::user_blocked(uid))
    }

    pub async fn unblock_user(&self, conn: &ConnectionHandle, tracker_id: &str, uid: &str) -> Result<ServerMessage> {
        self.require_admin(&conn.id, Some(tracker_id)).await?;
        let _guard = self.locks.lock(tracker_id).await;

        let was_blocked = self
            .records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::AccessChanged)?;
                Ok(current.as_mut().is_some_and(|record| record.unblock(uid)))
            })
            .await?;

        info!(tracker_id, uid, was_blocked, "user unblocked");
        Ok(ServerMessage::user_unblocked(uid))
    }

    /// Flip whether new viewers may join
    pub async fn toggle_new_viewers(&self, conn: &ConnectionHandle, tracker_id: &str) -> Result<ServerMessage> {
        self.require_admin(&conn.id, Some(tracker_id)).await?;
        let _guard = self.locks.lock(tracker_id).await;

        let allow = self
            .records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::AccessChanged)?;
                let record = current.as_mut().ok_or(RelayError::SessionNotFound)?;
                record.allow_new_viewers = !record.allow_new_viewers;
                Ok(record.allow_new_viewers)
            })
            .await?;

        info!(tracker_id, allow_new_viewers = allow, "new viewers toggled");
        Ok(ServerMessage::new_viewers_toggled(allow))
    }

    /// Record the admin's position and fan it out
    pub async fn update_location(&self, conn: &ConnectionHandle, location: Coordinates, timestamp: Value) -> Result<()> {
        let admin = self.require_admin(&conn.id, None).await?;
        let tracker_id = admin.tracker_id.as_str();
        let _guard = self.locks.lock(tracker_id).await;

        self.records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::LocationUpdated)?;
                if let Some(record) = current.as_mut() {
                    record.location.latitude = location.latitude;
                    record.location.longitude = location.longitude;
                    record.location.timestamp = timestamp.clone();
                }
                Ok(())
            })
            .await?;

        let event = ServerMessage::LocationUpdate {
            latitude: location.latitude,
            longitude: location.longitude,
            timestamp,
        };
        let delivery = self
            .broadcaster
            .notify_session(
                tracker_id,
                &event,
                Some(Origin {
                    conn_id: &conn.id,
                    uid: &admin.uid,
                }),
            )
            .await;
        debug!(tracker_id, live = delivery.live, mailboxes = delivery.mailboxes, "location relayed");
        Ok(())
    }

    /// Record the admin's alarm state and fan it out
    pub async fn update_alarm(&self, conn: &ConnectionHandle, alarm_status: Value) -> Result<()> {
        let admin = self.require_admin(&conn.id, None).await?;
        let tracker_id = admin.tracker_id.as_str();
        let _guard = self.locks.lock(tracker_id).await;

        self.records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::LocationUpdated)?;
                if let Some(record) = current.as_mut() {
                    record.location.alarm_status = alarm_status.clone();
                }
                Ok(())
            })
            .await?;

        let event = ServerMessage::AlarmUpdate { alarm_status };
        let delivery = self
            .broadcaster
            .notify_session(
                tracker_id,
                &event,
                Some(Origin {
                    conn_id: &conn.id,
                    uid: &admin.uid,
                }),
            )
            .await;
        info!(tracker_id, live = delivery.live, mailboxes = delivery.mailboxes, "alarm relayed");
        Ok(())
    }

    /// Delete the caller's session and release everyone bound to it
    pub async fn stop(&self, conn: &ConnectionHandle, tracker_id: &str) -> Result<ServerMessage> {
        self.require_admin(&conn.id, Some(tracker_id)).await?;
        let _guard = self.locks.lock(tracker_id).await;

        self.records
            .transact(tracker_id, |current| {
                transition(current.as_ref(), SessionEvent::Stopped)?;
                *current = None;
                Ok(())
            })
            .await?;

        self.end_session(tracker_id, Some(&conn.id)).await;
        info!(tracker_id, conn_id = %conn.id, "session stopped");
        Ok(ServerMessage::stopped(tracker_id))
    }

    /// Remove the caller's viewer record and unbind it.
    ///
    /// The record removed is the one the connection joined with; `device_id`
    /// from the payload is informational.
    pub async fn viewer_leave(&self, conn: &ConnectionHandle, device_id: &str) -> Result<ServerMessage> {
        let viewer = match self.registry.binding(&conn.id).await {
            Some(Binding::Viewer(identity)) => identity,
            _ => return Err(RelayError::Unauthorized),
        };
        if device_id != viewer.device_id {
            debug!(conn_id = %conn.id, uid = %viewer.uid, device_id, bound = %viewer.device_id, "viewer leave names another device");
        }
        let tracker_id = viewer.tracker_id.as_str();
        let _guard = self.locks.lock(tracker_id).await;

        let removed = self
            .records
            .transact(tracker_id, |current| {
                if transition(current.as_ref(), SessionEvent::ViewerLeft).is_err() {
                    return Ok(false);
                }
                Ok(current
                    .as_mut()
                    .is_some_and(|record| record.remove_viewer(&viewer.uid, &viewer.device_id)))
            })
            .await?;

        self.registry.unbind(&conn.id).await;
        info!(tracker_id, uid = %viewer.uid, removed, "viewer left");
        Ok(ServerMessage::viewer_left())
    }

    /// Tear down a closed connection.
    ///
    /// Safe to call more than once for the same id; only the first call
    /// releases what the connection held. Returns whether this call did.
    pub async fn disconnect(&self, conn_id: &str, reason: &str) -> bool {
        let Some((handle, binding)) = self.registry.remove(conn_id).await else {
            return false;
        };
        handle.close();
        handle.terminate();
        info!(
            conn_id,
            reason,
            remote = ?handle.addr,
            role = ?binding.role(),
            tracker_id = binding.tracker_id(),
            "connection closed"
        );

        if let Err(e) = self.release(&binding).await {
            warn!(conn_id, tracker_id = binding.tracker_id(), error = %e, "failed to release session membership");
        }
        true
    }

    async fn release(&self, binding: &Binding) -> Result<()> {
        match binding {
            Binding::Unbound => Ok(()),
            Binding::Admin(identity) => {
                let tracker_id = identity.tracker_id.as_str();
                let _guard = self.locks.lock(tracker_id).await;
                let deleted = self
                    .records
                    .transact(tracker_id, |current| match current.as_mut() {
                        Some(record) if record.is_admin(&identity.uid, &identity.device_id) => {
                            transition(Some(&*record), SessionEvent::AdminDisconnected)?;
                            *current = None;
                            Ok(true)
                        }
                        Some(record) => {
                            record.remove_viewer(&identity.uid, &identity.device_id);
                            Ok(false)
                        }
                        None => Ok(false),
                    })
                    .await?;

                if deleted {
                    self.end_session(tracker_id, None).await;
                    info!(tracker_id, uid = %identity.uid, "session deleted on admin disconnect");
                }
                Ok(())
            }
            Binding::Viewer(identity) => {
                let tracker_id = identity.tracker_id.as_str();
                let _guard = self.locks.lock(tracker_id).await;
                let removed = self
                    .records
                    .transact(tracker_id, |current| {
                        if transition(current.as_ref(), SessionEvent::ViewerLeft).is_err() {
                            return Ok(false);
                        }
                        Ok(current
                            .as_mut()
                            .is_some_and(|record| record.remove_viewer(&identity.uid, &identity.device_id)))
                    })
                    .await?;
                debug!(tracker_id, uid = %identity.uid, removed, "viewer record released");
                Ok(())
            }
        }
    }

    /// Tell the remaining members the session is over and unbind them.
    ///
    /// `except` is neither notified nor unbound, so later admin calls from it
    /// see the session as missing.
    async fn end_session(&self, tracker_id: &str, except: Option<&str>) {
        self.broadcaster
            .push_live(tracker_id, &ServerMessage::session_ended(tracker_id), except)
            .await;
        let released = self.registry.unbind_session(tracker_id, except).await;
        debug!(tracker_id, released = released.len(), "session members released");
    }

    /// Release the membership a connection held before rebinding to `current`.
    ///
    /// Must be called without holding any session lock.
    async fn release_replaced(&self, conn_id: &str, previous: Option<Binding>, current: &Binding) {
        let Some(previous) = previous else {
            return;
        };
        let superseded = match &previous {
            Binding::Unbound => true,
            Binding::Admin(old) => current.tracker_id() == Some(old.tracker_id.as_str()),
            Binding::Viewer(old) => current.identity() == Some(old),
        };
        if superseded {
            return;
        }

        info!(
            conn_id,
            role = ?previous.role(),
            tracker_id = previous.tracker_id(),
            "connection rebound, releasing previous membership"
        );
        if let Err(e) = self.release(&previous).await {
            warn!(conn_id, tracker_id = previous.tracker_id(), error = %e, "failed to release session membership");
        }
    }

    /// Ids of every stored session
    pub async fn tracker_ids(&self) -> Result<Vec<String>> {
        self.records.tracker_ids().await
    }

    pub async fn has_bound_admin(&self, tracker_id: &str) -> bool {
        self.registry.admin_of(tracker_id).await.is_some()
    }

    /// Delete a session nobody administers any more.
    ///
    /// Re-checks under the session lock; returns false if an admin came
    /// back or the session is already gone.
    pub async fn expire(&self, tracker_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(tracker_id).await;
        if self.has_bound_admin(tracker_id).await {
            return Ok(false);
        }

        let removed = self
            .records
            .transact(tracker_id, |current| {
                if transition(current.as_ref(), SessionEvent::Expired).is_err() {
                    return Ok(false);
                }
                *current = None;
                Ok(true)
            })
            .await?;

        if removed {
            self.end_session(tracker_id, None).await;
        }
        Ok(removed)
    }
}
