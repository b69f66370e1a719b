//! fieldwatch-core - Offline-first sync core for Fieldwatch
//!
//! This crate contains the domain models, the SQLite-backed local store with
//! its mutation and recognition queues, and the engines that drain those
//! queues against a remote backend. The CLI and app shells drive it through
//! [`SyncRuntime`] and [`LocalStore`].

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod network;
pub mod recognition;
pub mod runtime;
pub mod services;
pub mod state;
pub mod sync;
mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use gateway::{FatalKind, HttpRemoteGateway, Outcome, RemoteGateway};
pub use models::{EntityType, FailureKind, MutationId, RecognitionId, RecordId, SyncRecord};
pub use network::NetworkMonitor;
pub use recognition::{RecognitionProcessor, RecognitionReport};
pub use runtime::SyncRuntime;
pub use services::LocalStore;
pub use state::{SyncSnapshot, SyncState, SyncStateHandle};
pub use sync::{BackoffPolicy, DrainReport, SyncEngine};
