//! Identifier types shared across the scan index.

/// Token (label) identifier. Assigned by the token store, not owned here.
pub type TokenId = u32;

/// Entity identifier in the primary store's ID space.
pub type EntityId = u64;

/// Set of token IDs attached to one entity.
///
/// Kept sorted ascending. Entities carry a handful of tokens in practice,
/// so this is a plain `Vec` with binary-search membership. Instances held
/// by pooled cursors are cleared and refilled rather than reallocated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    tokens: Vec<TokenId>,
}

impl TokenSet {
    /// Empty token set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary tokens; sorts and deduplicates.
    pub fn from_tokens(tokens: impl IntoIterator<Item = TokenId>) -> Self {
        let mut tokens: Vec<TokenId> = tokens.into_iter().collect();
        tokens.sort_unstable();
        tokens.dedup();
        Self { tokens }
    }

    /// Insert one token, keeping the set sorted. Duplicates are ignored.
    pub fn insert(&mut self, token: TokenId) {
        if let Err(pos) = self.tokens.binary_search(&token) {
            self.tokens.insert(pos, token);
        }
    }

    #[inline]
    pub fn contains(&self, token: TokenId) -> bool {
        self.tokens.binary_search(&token).is_ok()
    }

    #[inline]
    pub fn as_slice(&self) -> &[TokenId] {
        &self.tokens
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Clear in place, retaining capacity for pooled reuse.
    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    /// Replace contents with `other`'s, reusing this set's allocation.
    pub fn copy_from(&mut self, other: &TokenSet) {
        self.tokens.clear();
        self.tokens.extend_from_slice(&other.tokens);
    }

    pub fn iter(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.tokens.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_sorts_and_dedups() {
        let set = TokenSet::from_tokens([7, 2, 7, 4]);
        assert_eq!(set.as_slice(), &[2, 4, 7]);
    }

    #[test]
    fn test_insert_keeps_sorted() {
        let mut set = TokenSet::new();
        set.insert(5);
        set.insert(1);
        set.insert(5);
        set.insert(3);
        assert_eq!(set.as_slice(), &[1, 3, 5]);
        assert!(set.contains(3));
        assert!(!set.contains(4));
    }

    #[test]
    fn test_copy_from_replaces_contents() {
        let mut dst = TokenSet::from_tokens([9, 10]);
        let src = TokenSet::from_tokens([1, 2, 3]);
        dst.copy_from(&src);
        assert_eq!(dst.as_slice(), &[1, 2, 3]);
    }
}
