//! Supervisor state and health metrics

use sriquant_core::Timestamp;
use std::sync::{Arc, Mutex, MutexGuard};

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Point-in-time health snapshot of a supervised stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHealth {
    pub state: SupervisorState,
    pub sessions_started: u64,
    pub reconnect_count: u64,
    pub frames_received: u64,
    pub errors_reported: u64,
    /// Start of the current session, if one is live
    pub connected_at: Option<Timestamp>,
    pub last_activity: Option<Timestamp>,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHealth {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Idle,
            sessions_started: 0,
            reconnect_count: 0,
            frames_received: 0,
            errors_reported: 0,
            connected_at: None,
            last_activity: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SupervisorState::Connected
    }

    /// Connected and heard from the remote within `tolerance_ms`
    pub fn is_healthy(&self, tolerance_ms: u64) -> bool {
        self.is_connected()
            && self
                .last_activity
                .is_some_and(|seen| (seen.elapsed().as_millis() as u64) < tolerance_ms)
    }
}

/// Shared, cheaply cloneable writer side of [`StreamHealth`]
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    inner: Arc<Mutex<StreamHealth>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StreamHealth {
        self.lock().clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.lock().state
    }

    pub fn set_state(&self, state: SupervisorState) {
        let mut health = self.lock();
        if state != SupervisorState::Connected {
            health.connected_at = None;
        }
        health.state = state;
    }

    pub(crate) fn session_started(&self) {
        let mut health = self.lock();
        let now = Timestamp::now();
        health.state = SupervisorState::Connected;
        health.sessions_started += 1;
        health.connected_at = Some(now);
        health.last_activity = Some(now);
    }

    pub(crate) fn reconnect_scheduled(&self) {
        let mut health = self.lock();
        health.state = SupervisorState::Reconnecting;
        health.reconnect_count += 1;
        health.connected_at = None;
    }

    pub(crate) fn frame_received(&self) {
        let mut health = self.lock();
        health.frames_received += 1;
        health.last_activity = Some(Timestamp::now());
    }

    pub(crate) fn activity(&self) {
        self.lock().last_activity = Some(Timestamp::now());
    }

    pub(crate) fn error_reported(&self) {
        self.lock().errors_reported += 1;
    }

    // A panicking error handler must not take the metrics down with it.
    fn lock(&self) -> MutexGuard<'_, StreamHealth> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_health() {
        let health = StreamHealth::new();
        assert_eq!(health.state, SupervisorState::Idle);
        assert!(!health.is_connected());
        assert!(!health.is_healthy(30_000));
    }

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = HealthTracker::new();
        tracker.set_state(SupervisorState::Connecting);
        tracker.session_started();
        tracker.frame_received();
        tracker.frame_received();

        let health = tracker.snapshot();
        assert!(health.is_connected());
        assert!(health.is_healthy(30_000));
        assert_eq!(health.sessions_started, 1);
        assert_eq!(health.frames_received, 2);
        assert!(health.connected_at.is_some());

        tracker.reconnect_scheduled();
        tracker.error_reported();
        let health = tracker.snapshot();
        assert_eq!(health.state, SupervisorState::Reconnecting);
        assert_eq!(health.reconnect_count, 1);
        assert_eq!(health.errors_reported, 1);
        assert!(health.connected_at.is_none());
        assert!(!health.is_healthy(30_000));
    }

    #[test]
    fn test_tracker_clones_share_state() {
        let tracker = HealthTracker::new();
        let other = tracker.clone();
        other.set_state(SupervisorState::Stopped);
        assert_eq!(tracker.state(), SupervisorState::Stopped);
    }
}
