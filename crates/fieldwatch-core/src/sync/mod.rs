//! Mutation queue draining and background scheduling.

pub mod backoff;
mod engine;
mod scheduler;

use tokio::sync::watch;

pub use backoff::BackoffPolicy;
pub use engine::{DrainReport, SettledEntry, SkipReason, SyncEngine};
pub use scheduler::{BackgroundLoop, DrainTask};

/// Resolves once `true` is published on the shutdown channel.
///
/// A dropped sender never resolves; the owner of the loop went away without
/// asking for shutdown, so the caller keeps running until its own end.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
