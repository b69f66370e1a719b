//! Shared sync state published to UI subscribers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::db::{MutationCounts, RecognitionCounts};

/// Coarse sync state for status badges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    /// Local changes are waiting for the next drain
    Pending,
    Synced,
    /// Needs user attention: failed entries or an expired session
    Error,
}

/// Read-only counters derived from the local store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    /// Mutations not yet acknowledged (pending + processing + failed)
    pub pending_sync_count: u64,
    /// Mutations waiting for user retry or discard
    pub failed_sync_count: u64,
    /// Recognition jobs pending or processing
    pub pending_recognition_count: u64,
    /// Last completed drain cycle (Unix ms)
    pub last_sync_at: Option<i64>,
    pub is_syncing: bool,
    pub is_recognizing: bool,
    /// Set when the backend refused the session; drains pause until cleared
    pub auth_required: bool,
    pub is_online: bool,
}

impl SyncSnapshot {
    pub const fn state(&self) -> SyncState {
        if self.auth_required || self.failed_sync_count > 0 {
            SyncState::Error
        } else if self.is_syncing {
            SyncState::Syncing
        } else if !self.is_online {
            SyncState::Offline
        } else if self.pending_sync_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}

/// Cloneable publisher for [`SyncSnapshot`].
///
/// Every setter only notifies subscribers when the value actually changed.
#[derive(Clone, Debug)]
pub struct SyncStateHandle {
    tx: Arc<watch::Sender<SyncSnapshot>>,
}

impl Default for SyncStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Receiver that observes every published change
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.tx.subscribe()
    }

    /// Current value
    pub fn snapshot(&self) -> SyncSnapshot {
        self.tx.borrow().clone()
    }

    pub fn auth_required(&self) -> bool {
        self.tx.borrow().auth_required
    }

    fn update(&self, apply: impl FnOnce(&mut SyncSnapshot)) {
        self.tx.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            apply(snapshot);
            *snapshot != before
        });
    }

    pub(crate) fn set_counts(&self, mutations: MutationCounts, recognitions: RecognitionCounts) {
        self.update(|snapshot| {
            snapshot.pending_sync_count = mutations.unresolved();
            snapshot.failed_sync_count = mutations.failed;
            snapshot.pending_recognition_count = recognitions.outstanding();
        });
    }

    pub(crate) fn set_last_sync_at(&self, at: Option<i64>) {
        self.update(|snapshot| snapshot.last_sync_at = at);
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.update(|snapshot| snapshot.is_syncing = syncing);
    }

    pub(crate) fn set_recognizing(&self, recognizing: bool) {
        self.update(|snapshot| snapshot.is_recognizing = recognizing);
    }

    pub(crate) fn set_auth_required(&self, required: bool) {
        self.update(|snapshot| snapshot.auth_required = required);
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.update(|snapshot| snapshot.is_online = online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_prefers_errors_over_progress() {
        let mut snapshot = SyncSnapshot {
            is_online: true,
            ..SyncSnapshot::default()
        };
        assert_eq!(snapshot.state(), SyncState::Synced);

        snapshot.pending_sync_count = 2;
        assert_eq!(snapshot.state(), SyncState::Pending);

        snapshot.is_syncing = true;
        assert_eq!(snapshot.state(), SyncState::Syncing);

        snapshot.failed_sync_count = 1;
        assert_eq!(snapshot.state(), SyncState::Error);
    }

    #[test]
    fn offline_without_failures() {
        let snapshot = SyncSnapshot {
            pending_sync_count: 3,
            ..SyncSnapshot::default()
        };
        assert_eq!(snapshot.state(), SyncState::Offline);
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let handle = SyncStateHandle::new();
        let mut rx = handle.subscribe();

        handle.set_online(false);
        assert!(!rx.has_changed().unwrap());

        handle.set_counts(
            MutationCounts {
                pending: 2,
                processing: 1,
                failed: 1,
            },
            RecognitionCounts {
                pending: 1,
                processing: 1,
                done: 4,
                error: 0,
            },
        );
        assert!(rx.has_changed().unwrap());

        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.pending_sync_count, 4);
        assert_eq!(snapshot.failed_sync_count, 1);
        assert_eq!(snapshot.pending_recognition_count, 2);
    }
}
