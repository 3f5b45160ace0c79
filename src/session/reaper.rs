//! Removal of sessions left without an admin

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::manager::SessionManager;

/// Deletes sessions that have had no bound admin connection for longer than a TTL
pub struct OrphanReaper {
    sessions: Arc<SessionManager>,
    ttl: Duration,
    check_interval: Duration,
    /// When each session was first seen without an admin
    orphaned_since: HashMap<String, Instant>,
}

impl OrphanReaper {
    pub fn new(sessions: Arc<SessionManager>, ttl: Duration, check_interval: Duration) -> Self {
        Self {
            sessions,
            ttl,
            check_interval,
            orphaned_since: HashMap::new(),
        }
    }

    /// Start the scan loop
    pub async fn run(mut self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reaped = self.sweep().await;
            if !reaped.is_empty() {
                info!(count = reaped.len(), "reaped orphaned sessions");
            }
        }
    }

    /// One scan; returns the tracker ids deleted
    pub async fn sweep(&mut self) -> Vec<String> {
        let tracker_ids = match self.sessions.tracker_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "orphan scan could not list sessions");
                return Vec::new();
            }
        };

        let now = Instant::now();
        self.orphaned_since.retain(|id, _| tracker_ids.contains(id));

        let mut reaped = Vec::new();
        for tracker_id in tracker_ids {
            if self.sessions.has_bound_admin(&tracker_id).await {
                self.orphaned_since.remove(&tracker_id);
                continue;
            }

            let since = *self.orphaned_since.entry(tracker_id.clone()).or_insert(now);
            if now.duration_since(since) < self.ttl {
                continue;
            }

            match self.sessions.expire(&tracker_id).await {
                Ok(true) => {
                    info!(tracker_id = %tracker_id, "orphaned session removed");
                    self.orphaned_since.remove(&tracker_id);
                    reaped.push(tracker_id);
                }
                Ok(false) => {
                    self.orphaned_since.remove(&tracker_id);
                }
                Err(e) => warn!(tracker_id = %tracker_id, error = %e, "failed to remove orphaned session"),
            }
        }
        reaped
    }
}
