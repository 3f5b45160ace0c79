//! Heartbeat Monitor
//!
//! Runs a background task that pings every registered connection and
//! terminates the ones that stopped answering.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::connection::ConnectionRegistry;
use crate::session::SessionManager;

/// Outcome of one heartbeat pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pinged: usize,
    pub terminated: usize,
}

pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, sessions: Arc<SessionManager>, interval: Duration) -> Self {
        Self {
            registry,
            sessions,
            interval,
        }
    }

    /// Start the monitoring background task
    pub fn start(self) -> HeartbeatMonitorHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = self.tick().await;
                if report.terminated > 0 {
                    info!(terminated = report.terminated, pinged = report.pinged, "heartbeat pass");
                } else {
                    debug!(pinged = report.pinged, "heartbeat pass");
                }
            }
        });

        HeartbeatMonitorHandle { task }
    }

    /// Ping or terminate every registered connection once
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for conn in self.registry.snapshot().await {
            if conn.take_alive() && conn.ping() {
                report.pinged += 1;
                continue;
            }
            if self.sessions.disconnect(&conn.id, "heartbeat timeout").await {
                report.terminated += 1;
            }
        }
        report
    }
}

/// Owns the heartbeat task; dropping it leaves the task running
pub struct HeartbeatMonitorHandle {
    task: JoinHandle<()>,
}

impl HeartbeatMonitorHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::testing::TestRelay;
    use relay_shared::Coordinates;
    use serde_json::Value;

    fn monitor(relay: &TestRelay) -> HeartbeatMonitor {
        HeartbeatMonitor::new(relay.registry.clone(), relay.sessions.clone(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_silent_connection_dies_on_second_tick() {
        let relay = TestRelay::new();
        let mut client = relay.connect().await;
        let monitor = monitor(&relay);

        assert_eq!(monitor.tick().await, TickReport { pinged: 1, terminated: 0 });
        assert_eq!(client.frames(), vec![Outbound::Ping]);

        assert_eq!(monitor.tick().await, TickReport { pinged: 0, terminated: 1 });
        assert_eq!(client.frames(), vec![Outbound::Close]);
        assert!(client.handle.is_terminated());
        assert_eq!(relay.registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_backlogged_viewer_is_terminated_without_draining() {
        let relay = TestRelay::with_limits(3, 1);
        let mut admin = relay.connect().await;
        let tracker_id = relay.create_session(&mut admin).await;
        let viewer = relay.connect().await;
        relay
            .sessions
            .join_viewer(&viewer.handle, &tracker_id, "V1", "DV1")
            .await
            .unwrap();

        for n in 0..500 {
            relay
                .sessions
                .update_location(
                    &admin.handle,
                    Coordinates {
                        latitude: f64::from(n),
                        longitude: 0.0,
                    },
                    Value::Null,
                )
                .await
                .unwrap();
        }

        let monitor = monitor(&relay);
        monitor.tick().await;
        admin.handle.mark_alive();
        monitor.tick().await;

        assert!(viewer.handle.is_terminated());
        tokio::time::timeout(Duration::from_secs(1), viewer.handle.terminated())
            .await
            .unwrap();
        assert!(!admin.handle.is_terminated());
        assert!(relay.registry.binding(viewer.id()).await.is_none());
        assert!(relay.record(&tracker_id).await.unwrap().viewers.is_empty());
    }

    #[tokio::test]
    async fn test_activity_keeps_connection() {
        let relay = TestRelay::new();
        let client = relay.connect().await;
        let monitor = monitor(&relay);

        for _ in 0..3 {
            monitor.tick().await;
            client.handle.mark_alive();
        }
        assert_eq!(relay.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_dead_admin_ends_session() {
        let relay = TestRelay::new();
        let mut admin = relay.connect().await;
        let tracker_id = relay.create_session(&mut admin).await;
        let monitor = monitor(&relay);

        monitor.tick().await;
        monitor.tick().await;

        assert!(relay.record(&tracker_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_runs_on_interval() {
        let relay = TestRelay::new();
        let _client = relay.connect().await;
        let handle = monitor(&relay).start();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(relay.registry.len().await, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(relay.registry.len().await, 0);
        handle.stop();
    }
}
