//! Transaction overlay: read-your-own-writes merge for token scans.
//!
//! A scan opened inside a transaction must see the entities that
//! transaction has added to the scanned token(s) and must not see the ones
//! it has removed, before any of it reaches the range index. The overlay
//! holds read-only snapshots of the transaction's change sets; it never
//! mutates transaction state, and a scan reading it is only valid while
//! the owning transaction stays unmodified.
//!
//! Ordering policy: transaction-added IDs surface first (ascending among
//! themselves, deduplicated), then the base scan. The combined stream is
//! complete and duplicate-free but not globally sorted across the two
//! segments; consumers above the cursor layer treat post-overlay streams
//! as unordered-but-complete.

use crate::types::{EntityId, TokenId};
use rustc_hash::FxHashSet;

/// Uncommitted token membership changes of the active transaction.
pub trait TxTokenState {
    /// Entity IDs the transaction added to `token`. Any order, duplicates
    /// tolerated — the overlay re-sorts and deduplicates.
    fn added_entity_ids(&self, token: TokenId) -> Vec<EntityId>;

    /// Entity IDs the transaction removed, across all tokens.
    fn removed_entity_ids(&self) -> FxHashSet<EntityId>;
}

/// Added/removed overlay applied on top of a base scan.
#[derive(Debug, Default)]
pub struct TokenOverlay {
    /// Ascending, deduplicated, with removed IDs already excluded.
    added: Vec<EntityId>,
    next_added: usize,
    /// Same contents as `added`, for O(1) suppression of base duplicates.
    added_set: FxHashSet<EntityId>,
    removed: FxHashSet<EntityId>,
}

impl TokenOverlay {
    /// Overlay with no transaction changes: passes the base through.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from pre-split sets, for callers that already computed the
    /// token's transaction-local delta.
    pub fn from_sets(
        added: impl IntoIterator<Item = EntityId>,
        removed: FxHashSet<EntityId>,
    ) -> Self {
        let mut added: Vec<EntityId> = added
            .into_iter()
            .filter(|id| !removed.contains(id))
            .collect();
        added.sort_unstable();
        added.dedup();
        let added_set = added.iter().copied().collect();
        Self {
            added,
            next_added: 0,
            added_set,
            removed,
        }
    }

    /// Build from the transaction's change state for one token.
    pub fn for_token(tx: &dyn TxTokenState, token: TokenId) -> Self {
        Self::from_sets(tx.added_entity_ids(token), tx.removed_entity_ids())
    }

    /// Union of several tokens' deltas, for multi-token scans.
    pub fn for_tokens(tx: &dyn TxTokenState, tokens: &[TokenId]) -> Self {
        let removed = tx.removed_entity_ids();
        let added: Vec<EntityId> = tokens
            .iter()
            .flat_map(|&token| tx.added_entity_ids(token))
            .collect();
        Self::from_sets(added, removed)
    }

    /// Next transaction-added ID. Drained before the base scan is pulled.
    pub fn next_added(&mut self) -> Option<EntityId> {
        let id = self.added.get(self.next_added).copied()?;
        self.next_added += 1;
        Some(id)
    }

    /// Whether a base-scan ID must be suppressed: removed by the
    /// transaction, or already surfaced through the added segment.
    #[inline]
    pub fn suppresses(&self, id: EntityId) -> bool {
        self.removed.contains(&id) || self.added_set.contains(&id)
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(ids: &[EntityId]) -> FxHashSet<EntityId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_none_passes_everything_through() {
        let mut overlay = TokenOverlay::none();
        assert!(overlay.next_added().is_none());
        assert!(!overlay.suppresses(42));
        assert!(!overlay.has_changes());
    }

    #[test]
    fn test_added_drained_ascending_and_deduped() {
        let mut overlay = TokenOverlay::from_sets([9, 3, 9, 7], removed(&[]));
        let mut out = Vec::new();
        while let Some(id) = overlay.next_added() {
            out.push(id);
        }
        assert_eq!(out, vec![3, 7, 9]);
    }

    #[test]
    fn test_removed_suppresses_base_ids() {
        let overlay = TokenOverlay::from_sets([], removed(&[5, 8]));
        assert!(overlay.suppresses(5));
        assert!(overlay.suppresses(8));
        assert!(!overlay.suppresses(6));
    }

    #[test]
    fn test_added_id_in_base_surfaces_once() {
        // 7 is both tx-added and present in the base scan: the added
        // segment yields it, the base occurrence is suppressed.
        let mut overlay = TokenOverlay::from_sets([7], removed(&[]));
        assert_eq!(overlay.next_added(), Some(7));
        assert!(overlay.suppresses(7));
    }

    #[test]
    fn test_added_and_removed_in_same_tx_never_surfaces() {
        let mut overlay = TokenOverlay::from_sets([4, 6], removed(&[6]));
        assert_eq!(overlay.next_added(), Some(4));
        assert_eq!(overlay.next_added(), None);
        assert!(overlay.suppresses(6));
    }

    struct FakeTx;

    impl TxTokenState for FakeTx {
        fn added_entity_ids(&self, token: TokenId) -> Vec<EntityId> {
            match token {
                1 => vec![10, 30],
                2 => vec![20, 30],
                _ => vec![],
            }
        }

        fn removed_entity_ids(&self) -> FxHashSet<EntityId> {
            [99u64].into_iter().collect()
        }
    }

    #[test]
    fn test_for_token_pulls_single_delta() {
        let mut overlay = TokenOverlay::for_token(&FakeTx, 1);
        assert_eq!(overlay.next_added(), Some(10));
        assert_eq!(overlay.next_added(), Some(30));
        assert_eq!(overlay.next_added(), None);
        assert!(overlay.suppresses(99));
    }

    #[test]
    fn test_for_tokens_unions_deltas() {
        let mut overlay = TokenOverlay::for_tokens(&FakeTx, &[1, 2]);
        let mut out = Vec::new();
        while let Some(id) = overlay.next_added() {
            out.push(id);
        }
        // 30 appears in both tokens' deltas but surfaces once
        assert_eq!(out, vec![10, 20, 30]);
    }
}
