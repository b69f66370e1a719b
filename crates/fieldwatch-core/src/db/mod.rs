//! Database layer for Fieldwatch

mod connection;
mod migrations;
mod mutation_queue;
mod recognition_queue;
mod record_repository;
mod sync_meta_repository;

use std::str::FromStr;

pub use connection::Database;
pub use mutation_queue::{FailDisposition, MutationCounts, MutationQueue};
pub use recognition_queue::{RecognitionCounts, RecognitionQueue};
pub use record_repository::{
    is_entity_synced, mark_entity_synced, RecordRepository, SqliteRecordRepository,
};
pub use sync_meta_repository::{SqliteSyncMetaRepository, SyncMetaRepository};

/// Read a TEXT column through the type's `FromStr` implementation
pub(crate) fn parse_text_column<T>(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(index)?;
    raw.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
    })
}

/// Nullable variant of [`parse_text_column`]
pub(crate) fn parse_optional_text_column<T>(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        raw.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })
    })
    .transpose()
}
