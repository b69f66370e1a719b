pub mod common;
pub mod config;
pub mod queue;
pub mod recognition;
pub mod record;
pub mod sync;
