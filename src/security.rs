//! Per-entity admission checks layered on the merged scan.
//!
//! The capability check resolves to one of two variants at scan start: a
//! scan whose access mode grants blanket traversal for every scanned token
//! never pays a per-candidate check, and the blanket question itself is
//! asked exactly once per scan — it cannot change mid-scan.
//!
//! The occupancy bitmap proves membership of the scanned token only, not
//! an entity's full token set. When a per-candidate decision needs the
//! full set, the entity's record is loaded through [`EntityLookup`] into a
//! scratch buffer that is cleared before every use, so one candidate's
//! record never leaks into the next decision.

use crate::error::{Result, TokenIndexError};
use crate::types::{EntityId, TokenId, TokenSet};
use std::io;
use std::sync::Arc;
use tracing::trace;

/// Caller's access mode, consumed as yes/no capability checks. Policy
/// evaluation itself lives elsewhere.
pub trait AccessMode: Send + Sync {
    /// Blanket grant: every entity carrying `token` may be traversed.
    fn allows_traverse_all_with_token(&self, token: TokenId) -> bool;

    /// Given an entity's full token set, may the entity be traversed?
    fn allows_traverse_entity(&self, tokens: &[TokenId]) -> bool;
}

/// Unrestricted access: every check passes. Use when no security filtering
/// applies to the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullAccess;

impl AccessMode for FullAccess {
    fn allows_traverse_all_with_token(&self, _token: TokenId) -> bool {
        true
    }

    fn allows_traverse_entity(&self, _tokens: &[TokenId]) -> bool {
        true
    }
}

/// Primary-store record load, the slow-path fallback when the index alone
/// cannot supply an entity's full token set.
pub trait EntityLookup: Send + Sync {
    /// Load `entity`'s current token set into `out` (already cleared by
    /// the caller). Returns `false` when the entity no longer exists.
    fn entity_tokens(&self, entity: EntityId, out: &mut TokenSet) -> io::Result<bool>;
}

/// Admission decision for one candidate.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// Admitted without a record load; the producer's token set stands.
    Granted,
    /// Admitted; the full token set was loaded into the scratch buffer
    /// during the check and supersedes the producer's.
    GrantedWithTokens,
    /// Rejected, or concurrently deleted. Skip: yield nothing, advance no
    /// visible state.
    Skipped,
}

/// Admission check for one scan, selected once at scan start.
pub enum TraversalFilter {
    /// Blanket traversal granted for every scanned token.
    Unrestricted,
    /// Per-candidate capability check with record-load fallback.
    PerEntity {
        access: Arc<dyn AccessMode>,
        lookup: Arc<dyn EntityLookup>,
    },
}

impl TraversalFilter {
    /// Resolve the filter for a scan over `tokens`. The blanket check runs
    /// here, once — never per candidate.
    pub fn select(
        access: Arc<dyn AccessMode>,
        lookup: Arc<dyn EntityLookup>,
        tokens: &[TokenId],
    ) -> Self {
        let blanket = !tokens.is_empty()
            && tokens
                .iter()
                .all(|&token| access.allows_traverse_all_with_token(token));
        if blanket {
            TraversalFilter::Unrestricted
        } else {
            TraversalFilter::PerEntity { access, lookup }
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, TraversalFilter::Unrestricted)
    }

    /// Decide admission for `entity`. `known` is the candidate's full
    /// token set when the producer has it; `None` forces the record-load
    /// fallback. `scratch` is the reusable load buffer.
    pub fn admit(
        &self,
        entity: EntityId,
        known: Option<&TokenSet>,
        scratch: &mut TokenSet,
    ) -> Result<Admission> {
        let (access, lookup) = match self {
            TraversalFilter::Unrestricted => return Ok(Admission::Granted),
            TraversalFilter::PerEntity { access, lookup } => (access, lookup),
        };

        if let Some(tokens) = known {
            return Ok(if access.allows_traverse_entity(tokens.as_slice()) {
                Admission::Granted
            } else {
                Admission::Skipped
            });
        }

        scratch.clear();
        let found = lookup
            .entity_tokens(entity, scratch)
            .map_err(|source| TokenIndexError::Lookup { entity, source })?;
        if !found {
            // Stale index entry; the live entity is authoritative.
            trace!(entity, "entity vanished during scan, skipping");
            return Ok(Admission::Skipped);
        }
        Ok(if access.allows_traverse_entity(scratch.as_slice()) {
            Admission::GrantedWithTokens
        } else {
            Admission::Skipped
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
