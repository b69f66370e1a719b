//! Data models for Fieldwatch

mod failure;
mod field;
mod mutation;
mod recognition;
mod record;

pub use failure::FailureKind;
pub use field::{Activity, Fazenda, Praga, Scout, Severity, Talhao};
pub use mutation::{MutationEntry, MutationId, MutationOperation, MutationStatus};
pub use recognition::{RecognitionId, RecognitionJob, RecognitionStatus};
pub use record::{EntityType, RecordId, RecordMeta, SyncRecord};

pub(crate) use record::META_COLUMNS;
