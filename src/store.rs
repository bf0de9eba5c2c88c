//! Seek contract against the backing range store, plus an in-memory
//! implementation.
//!
//! The sorted persistent tree is an external collaborator: the scan index
//! only needs an ordered forward seek over a key interval. Insertion, page
//! splits, durability and checkpointing all live behind [`RangeStore`].
//! [`MemoryRangeStore`] implements the same contract on a `BTreeMap` for
//! tests and embedded use.

use crate::range::{offset_of, range_of, RangeBitmap, RangeKey};
use crate::types::{EntityId, TokenId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;

/// One `(key, bitmap)` pair returned by a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub key: RangeKey,
    pub bits: RangeBitmap,
}

/// Forward cursor over a key interval, yielding entries in strictly
/// ascending key order. Dropping the seeker releases whatever store
/// resource backs it.
pub trait RangeSeeker: Send {
    /// Next entry, or `None` once the interval is exhausted. I/O and
    /// corruption failures surface here and are propagated by the reader,
    /// never retried at this layer.
    fn next(&mut self) -> io::Result<Option<RangeEntry>>;
}

/// Ordered range store: the single contract the scan index consumes.
pub trait RangeStore: Send + Sync {
    /// Open a forward cursor over `[low, high]` (both bounds inclusive).
    fn seek(&self, low: RangeKey, high: RangeKey) -> io::Result<Box<dyn RangeSeeker>>;
}

// ============================================================================
// MemoryRangeStore
// ============================================================================

/// In-memory range store backed by a `BTreeMap`.
///
/// A seek snapshots the requested interval under the read lock, so open
/// seekers are unaffected by later writes. Write helpers exist for tests
/// and for embedders that populate the index out of band; the index build
/// pipeline proper is out of scope here.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    ranges: RwLock<BTreeMap<RangeKey, RangeBitmap>>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one range's bitmap outright. An empty bitmap removes the key,
    /// keeping the keyspace dense.
    pub fn put(&self, key: RangeKey, bits: RangeBitmap) {
        let mut ranges = self.ranges.write();
        if bits.is_empty() {
            ranges.remove(&key);
        } else {
            ranges.insert(key, bits);
        }
    }

    /// Set the presence bit for `(token, entity)`.
    pub fn set_bit(&self, token: TokenId, entity: EntityId) {
        let key = RangeKey::new(token, range_of(entity));
        let mut ranges = self.ranges.write();
        ranges.entry(key).or_default().set(offset_of(entity));
    }

    /// Clear the presence bit for `(token, entity)`.
    pub fn unset_bit(&self, token: TokenId, entity: EntityId) {
        let key = RangeKey::new(token, range_of(entity));
        let mut ranges = self.ranges.write();
        if let Some(bits) = ranges.get_mut(&key) {
            bits.unset(offset_of(entity));
            if bits.is_empty() {
                ranges.remove(&key);
            }
        }
    }

    /// Number of non-empty ranges across all tokens.
    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }
}

impl RangeStore for MemoryRangeStore {
    fn seek(&self, low: RangeKey, high: RangeKey) -> io::Result<Box<dyn RangeSeeker>> {
        let entries: Vec<RangeEntry> = self
            .ranges
            .read()
            .range(low..=high)
            .map(|(&key, &bits)| RangeEntry { key, bits })
            .collect();
        Ok(Box::new(MemorySeeker {
            entries: entries.into_iter(),
        }))
    }
}

struct MemorySeeker {
    entries: std::vec::IntoIter<RangeEntry>,
}

impl RangeSeeker for MemorySeeker {
    fn next(&mut self) -> io::Result<Option<RangeEntry>> {
        Ok(self.entries.next())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut seeker: Box<dyn RangeSeeker>) -> Vec<RangeEntry> {
        let mut out = Vec::new();
        while let Some(entry) = seeker.next().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_seek_interval_in_key_order() {
        let store = MemoryRangeStore::new();
        store.put(RangeKey::new(1, 3), RangeBitmap(0b100));
        store.put(RangeKey::new(1, 0), RangeBitmap(0b1));
        store.put(RangeKey::new(2, 0), RangeBitmap(0b10));
        store.put(RangeKey::new(0, 9), RangeBitmap(0b1));

        let entries = drain(
            store
                .seek(RangeKey::token_floor(1), RangeKey::token_ceiling(1))
                .unwrap(),
        );
        let keys: Vec<RangeKey> = entries.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![RangeKey::new(1, 0), RangeKey::new(1, 3)]);
    }

    #[test]
    fn test_set_and_unset_bit() {
        let store = MemoryRangeStore::new();
        store.set_bit(7, 130); // range 2, offset 2
        store.set_bit(7, 131);
        assert_eq!(store.range_count(), 1);

        let entries = drain(
            store
                .seek(RangeKey::token_floor(7), RangeKey::token_ceiling(7))
                .unwrap(),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, RangeKey::new(7, 2));
        let ids: Vec<EntityId> = entries[0].bits.ids(128).collect();
        assert_eq!(ids, vec![130, 131]);

        store.unset_bit(7, 130);
        store.unset_bit(7, 131);
        // last bit gone removes the range entirely
        assert_eq!(store.range_count(), 0);
    }

    #[test]
    fn test_seek_snapshot_unaffected_by_writes() {
        let store = MemoryRangeStore::new();
        store.set_bit(1, 5);
        let seeker = store
            .seek(RangeKey::token_floor(1), RangeKey::token_ceiling(1))
            .unwrap();
        store.set_bit(1, 200);

        let entries = drain(seeker);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.range, 0);
    }
}
