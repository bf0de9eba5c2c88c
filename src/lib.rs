//! Range-bitmap token scan index: read path and cursor machinery.
//!
//! A secondary index answering "which entity IDs currently carry this
//! token?" as a sorted stream, without scanning the primary store. Entity
//! membership is persisted as fixed-width occupancy bitmaps keyed by
//! `(token, range)`; this crate owns the decode path, the seek-based scan
//! reader, the transaction-overlay merge, security-filtered iteration, and
//! the pooled scan cursors consumed by the query layer.
//!
//! The backing sorted tree, the primary entity store, and policy
//! evaluation are external collaborators, consumed through the
//! [`RangeStore`], [`EntityLookup`], and [`AccessMode`] contracts.

pub mod cursor;
pub mod error;
pub mod overlay;
pub mod range;
pub mod reader;
pub mod security;
pub mod store;
pub mod types;

// ── Read-side surface ────────────────────────────────────────────────────────
pub use cursor::{CursorPool, ScanCursor};
pub use reader::{TokenScan, TokenScanReader};

// ── Encoding ─────────────────────────────────────────────────────────────────
pub use range::{base_of, offset_of, range_of, RangeBitmap, RangeIds, RangeKey, RANGE_SIZE};

// ── Collaborator contracts ───────────────────────────────────────────────────
pub use overlay::{TokenOverlay, TxTokenState};
pub use security::{AccessMode, Admission, EntityLookup, FullAccess, TraversalFilter};
pub use store::{MemoryRangeStore, RangeEntry, RangeSeeker, RangeStore};

// ── Core types ───────────────────────────────────────────────────────────────
pub use error::{Result, TokenIndexError};
pub use types::{EntityId, TokenId, TokenSet};
