//! Async service handles shared across the engines and the CLI

mod local_store;

pub use local_store::{LocalStore, StaleRecovery};
