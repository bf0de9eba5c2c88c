//! Error types for token scan index reads.

use crate::types::EntityId;
use std::io;
use thiserror::Error;

/// Result type alias using [`TokenIndexError`].
pub type Result<T> = std::result::Result<T, TokenIndexError>;

/// Read-path failures of the scan index.
///
/// Storage failures are wrapped, never swallowed: callers must see index
/// reads as no more reliable than the store beneath them. Retrying, if any,
/// belongs to the store layer. Cursor misuse (accessors on a closed cursor,
/// double initialization) is a programming error and panics instead.
#[derive(Error, Debug)]
pub enum TokenIndexError {
    /// Seek or range read against the backing store failed.
    #[error("token index read failed: {0}")]
    Read(#[source] io::Error),

    /// Entity record load during a per-entity admission check failed.
    #[error("entity lookup failed for entity {entity}: {source}")]
    Lookup {
        entity: EntityId,
        #[source]
        source: io::Error,
    },
}
