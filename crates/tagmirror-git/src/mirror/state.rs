//! Sync bookkeeping for one mirror.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::store::CommitId;

#[derive(Debug, Default)]
struct Inner {
    head: Option<CommitId>,
    last_success: Option<Instant>,
    last_attempt: Option<Instant>,
    last_error: Option<String>,
    failure_count: u32,
}

/// Outcome history of clone and fetch attempts against a mirror.
#[derive(Debug, Default)]
pub struct SyncState {
    inner: RwLock<Inner>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The HEAD commit seen after the last successful sync.
    pub fn head(&self) -> Option<CommitId> {
        self.inner.read().head.clone()
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.inner.read().last_success
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.inner.read().last_attempt
    }

    /// Time since the last successful sync.
    pub fn time_since_sync(&self) -> Option<Duration> {
        self.inner.read().last_success.map(|t| t.elapsed())
    }

    /// Records a successful clone or fetch.
    pub fn record_success(&self, head: Option<CommitId>) {
        let mut inner = self.inner.write();
        let now = Instant::now();

        if head.is_some() {
            inner.head = head;
        }
        inner.last_success = Some(now);
        inner.last_attempt = Some(now);
        inner.last_error = None;
        inner.failure_count = 0;
    }

    /// Records a failed clone or fetch. Earlier successes are kept.
    pub fn record_failure(&self, error: impl Into<String>) {
        let mut inner = self.inner.write();

        inner.last_attempt = Some(Instant::now());
        inner.last_error = Some(error.into());
        inner.failure_count += 1;
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// Number of consecutive failures.
    pub fn failure_count(&self) -> u32 {
        self.inner.read().failure_count
    }

    pub fn has_synced(&self) -> bool {
        self.inner.read().last_success.is_some()
    }

    /// True once synced and while the latest attempt succeeded.
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.read();
        inner.last_success.is_some() && inner.last_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(fill: char) -> CommitId {
        CommitId::new(fill.to_string().repeat(40))
    }

    #[test]
    fn test_new_state() {
        let state = SyncState::new();
        assert!(state.head().is_none());
        assert!(state.last_success().is_none());
        assert!(!state.has_synced());
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_record_success() {
        let state = SyncState::new();
        state.record_success(Some(commit('a')));

        assert_eq!(state.head(), Some(commit('a')));
        assert!(state.last_success().is_some());
        assert!(state.time_since_sync().is_some());
        assert!(state.is_healthy());
        assert_eq!(state.failure_count(), 0);
    }

    #[test]
    fn test_record_failure_keeps_previous_head() {
        let state = SyncState::new();
        state.record_success(Some(commit('a')));
        state.record_failure("network error");
        state.record_failure("timeout");

        assert_eq!(state.failure_count(), 2);
        assert_eq!(state.last_error().as_deref(), Some("timeout"));
        assert_eq!(state.head(), Some(commit('a')));
        assert!(state.has_synced());
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_success_resets_failures() {
        let state = SyncState::new();
        state.record_failure("error 1");
        state.record_failure("error 2");
        assert!(state.last_attempt().is_some());

        state.record_success(None);
        assert_eq!(state.failure_count(), 0);
        assert!(state.last_error().is_none());
        assert!(state.head().is_none());
    }
}
