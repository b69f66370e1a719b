//! Process-wide handle that owns the engines and their background loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::SyncSettings;
use crate::error::Result;
use crate::gateway::RemoteGateway;
use crate::network::NetworkMonitor;
use crate::recognition::{RecognitionProcessor, RecognitionReport};
use crate::services::{LocalStore, StaleRecovery};
use crate::state::{SyncSnapshot, SyncStateHandle};
use crate::sync::{BackgroundLoop, DrainReport, SyncEngine};

/// Started sync runtime.
///
/// Built once at app init. Dropping it without [`SyncRuntime::shutdown`]
/// detaches the loops; claims they hold are recovered by the next start-up
/// sweep.
pub struct SyncRuntime {
    store: LocalStore,
    network: NetworkMonitor,
    engine: Arc<SyncEngine>,
    recognizer: Arc<RecognitionProcessor>,
    sync_loop: BackgroundLoop,
    recognition_loop: BackgroundLoop,
    shutdown: watch::Sender<bool>,
    recovered: StaleRecovery,
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncRuntime")
            .field("network", &self.network)
            .field("sync_loop", &self.sync_loop)
            .field("recognition_loop", &self.recognition_loop)
            .finish_non_exhaustive()
    }
}

impl SyncRuntime {
    /// Sweep abandoned claims, wire connectivity into the published state and
    /// start both background loops.
    pub async fn start(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        network: NetworkMonitor,
        settings: SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;

        // Nothing can be in flight before this process starts draining.
        let recovered = store.recover_stale_processing(Duration::ZERO).await?;
        store.refresh_counters().await?;

        let state = store.state().clone();
        state.set_online(network.is_online());
        network.on_transition(move |online| state.set_online(online));
        network.start();

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            gateway.clone(),
            network.clone(),
            settings.clone(),
        ));
        let recognizer = Arc::new(RecognitionProcessor::new(
            store.clone(),
            gateway,
            network.clone(),
            settings.clone(),
        ));

        let sync_loop = BackgroundLoop::spawn(
            engine.clone(),
            network.clone(),
            settings.sync_interval(),
            settings.interval_jitter(),
        );
        let recognition_loop = BackgroundLoop::spawn(
            recognizer.clone(),
            network.clone(),
            settings.sync_interval(),
            settings.interval_jitter(),
        );
        tracing::info!(
            "Sync runtime started (online: {}, interval: {}s)",
            network.is_online(),
            settings.sync_interval_secs
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            store,
            network,
            engine,
            recognizer,
            sync_loop,
            recognition_loop,
            shutdown,
            recovered,
        })
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn state(&self) -> &SyncStateHandle {
        self.store.state()
    }

    /// Receiver for published counter changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.store.state().subscribe()
    }

    /// Claims reset by the start-up sweep
    pub const fn recovered(&self) -> StaleRecovery {
        self.recovered
    }

    /// Wake both loops, e.g. right after a local write.
    pub fn nudge(&self) {
        self.sync_loop.nudge();
        self.recognition_loop.nudge();
    }

    /// Run one cycle of each engine on the caller's task.
    ///
    /// A loop that is mid-cycle makes the matching report come back skipped.
    pub async fn sync_now(&self) -> Result<(DrainReport, RecognitionReport)> {
        let mutations = self.engine.drain(self.shutdown.subscribe()).await?;
        let recognitions = self.recognizer.drain(self.shutdown.subscribe()).await?;
        Ok((mutations, recognitions))
    }

    /// Clear the authentication pause and wake the loops.
    pub fn resume_after_reauth(&self) {
        self.engine.resume_after_reauth();
        self.nudge();
    }

    /// Stop the loops, releasing in-flight claims, then stop polling the
    /// network.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        tokio::join!(self.sync_loop.stop(), self.recognition_loop.stop());
        self.network.stop().await;
        tracing::info!("Sync runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MutationRequest, Outcome, RecognitionRequest};
    use crate::models::Fazenda;
    use async_trait::async_trait;

    struct AcceptAll;

    #[async_trait]
    impl RemoteGateway for AcceptAll {
        async fn apply_mutation(&self, _request: &MutationRequest) -> Outcome<Option<String>> {
            Outcome::Success(None)
        }

        async fn submit_recognition(
            &self,
            _request: &RecognitionRequest,
        ) -> Outcome<serde_json::Value> {
            Outcome::Success(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn start_publishes_connectivity_and_follows_transitions() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let (network, _probe) = NetworkMonitor::fixed(false);
        let runtime = SyncRuntime::start(
            store,
            Arc::new(AcceptAll),
            network.clone(),
            SyncSettings::default(),
        )
        .await
        .unwrap();

        assert!(!runtime.state().snapshot().is_online);
        network.report(true).await;
        assert!(runtime.state().snapshot().is_online);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn background_loop_drains_after_nudge() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let (network, _probe) = NetworkMonitor::fixed(true);
        let runtime = SyncRuntime::start(
            store.clone(),
            Arc::new(AcceptAll),
            network,
            SyncSettings::default(),
        )
        .await
        .unwrap();
        let mut rx = runtime.subscribe();

        store.create_record(Fazenda::new("Boa Vista")).await.unwrap();
        runtime.nudge();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.pending_sync_count == 0 && snapshot.last_sync_at.is_some() {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_invalid_settings() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let (network, _probe) = NetworkMonitor::fixed(true);
        let settings = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };

        let result = SyncRuntime::start(store, Arc::new(AcceptAll), network, settings).await;
        assert!(result.is_err());
    }
}
