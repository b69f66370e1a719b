//! Background drain loop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::backoff::random_jitter;
use super::shutdown_requested;
use crate::error::Result;
use crate::network::NetworkMonitor;

/// A queue consumer driven by [`BackgroundLoop`]
#[async_trait]
pub trait DrainTask: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Run one cycle; must return promptly once `shutdown` flips to `true`.
    async fn drain_once(&self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Wakes a [`DrainTask`] periodically, when nudged, and when the network
/// comes back.
pub struct BackgroundLoop {
    name: &'static str,
    nudge: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for BackgroundLoop {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackgroundLoop")
            .field("name", &self.name)
            .field("finished", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

impl BackgroundLoop {
    /// Spawn the loop on the current runtime. The first cycle runs right away
    /// when online.
    pub fn spawn(
        task: Arc<dyn DrainTask>,
        network: NetworkMonitor,
        interval: Duration,
        jitter: Duration,
    ) -> Self {
        let name = task.name();
        let nudge = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            task,
            network,
            interval,
            jitter,
            nudge.clone(),
            shutdown_rx,
        ));
        tracing::debug!("Started {name} loop (interval {interval:?})");

        Self {
            name,
            nudge,
            shutdown,
            handle,
        }
    }

    /// Request a cycle as soon as the loop is idle.
    ///
    /// Nudges that arrive while a cycle runs collapse into one follow-up.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Ask the loop to stop and wait for the in-flight cycle to wind down.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(error) = self.handle.await {
            tracing::warn!("{} loop task failed: {error}", self.name);
        }
        tracing::debug!("Stopped {} loop", self.name);
    }
}

async fn run_loop(
    task: Arc<dyn DrainTask>,
    network: NetworkMonitor,
    interval: Duration,
    jitter: Duration,
    nudge: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut online_rx = network.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }
        if network.is_online() {
            if let Err(error) = task.drain_once(shutdown.clone()).await {
                tracing::warn!("{} cycle failed: {error}", task.name());
            }
        }

        let delay = interval + random_jitter(jitter);
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            () = nudge.notified() => {
                tracing::trace!("{} loop nudged", task.name());
            }
            () = went_online(&mut online_rx) => {
                tracing::debug!("{} loop woke on reconnect", task.name());
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Resolves on the next offline-to-online transition.
async fn went_online(online: &mut watch::Receiver<bool>) {
    loop {
        if online.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *online.borrow_and_update() {
            return;
        }
    }
}
