//! Token scan reader: seek-based enumeration of entity IDs per token.
//!
//! Opens one forward seek per scanned token, decodes occupancy bitmaps in
//! key order, and k-way merges multiple tokens into one ascending,
//! duplicate-free stream. Every scan handed out owns its low-level seekers;
//! the reader registers all live scans so closing the reader promptly
//! releases every seeker, while a scan that exhausts naturally releases its
//! own immediately without waiting for an explicit close.
//!
//! Lock discipline: the registry map lock is always acquired before a
//! scan's slot lock, and a slot lock is never held across a map
//! acquisition. Individual scans are single-threaded; the registry supports
//! concurrent open/close from multiple threads.

use crate::error::{Result, TokenIndexError};
use crate::range::{base_of, offset_of, range_of, RangeKey};
use crate::store::{RangeSeeker, RangeStore};
use crate::types::{EntityId, TokenId, TokenSet};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

type ScanId = u64;

/// Seekers of one live scan, one slot per scanned token.
///
/// Slots flip to `None` as individual seekers exhaust — dropping a seeker
/// is what releases its store resource. The reader's close path empties
/// every slot it can still reach.
struct SeekerSlots {
    seekers: Vec<Option<Box<dyn RangeSeeker>>>,
}

/// Registry entry for one live scan: the seeker slots plus a closed flag
/// the scan polls without taking the slot lock.
struct ScanHandle {
    slots: Arc<Mutex<SeekerSlots>>,
    closed: Arc<AtomicBool>,
}

struct ReaderShared {
    store: Arc<dyn RangeStore>,
    open: RwLock<FxHashMap<ScanId, ScanHandle>>,
    next_scan_id: AtomicU64,
    closed: AtomicBool,
}

// ============================================================================
// TokenScanReader
// ============================================================================

/// Read handle over the range store for token membership scans.
///
/// Scans opened from one reader are independent: opening a second scan
/// never closes or perturbs a still-open first one. Closing the reader (or
/// dropping it) closes every scan not yet exhausted.
pub struct TokenScanReader {
    shared: Arc<ReaderShared>,
}

impl TokenScanReader {
    pub fn new(store: Arc<dyn RangeStore>) -> Self {
        Self {
            shared: Arc::new(ReaderShared {
                store,
                open: RwLock::new(FxHashMap::default()),
                next_scan_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// All entity IDs carrying `token`, ascending.
    ///
    /// One seek over `[(token, 0), (token, MAX)]`; decoded ranges
    /// concatenate in key order, which preserves global ascending order.
    pub fn entities_with_token(&self, token: TokenId) -> Result<TokenScan> {
        self.open_scan(None, &[token])
    }

    /// Entity IDs carrying at least one of `tokens`, ascending and
    /// deduplicated across tokens.
    ///
    /// With `from_id = Some(f)` the scan resumes after `f`: IDs at or below
    /// `f` are masked out of the single range covering it, subsequent
    /// ranges are unfiltered, and ranges below it are never seeked at all.
    pub fn entities_with_any_of_tokens(
        &self,
        from_id: Option<EntityId>,
        tokens: &[TokenId],
    ) -> Result<TokenScan> {
        self.open_scan(from_id, tokens)
    }

    fn open_scan(&self, from_id: Option<EntityId>, tokens: &[TokenId]) -> Result<TokenScan> {
        assert!(
            !self.shared.closed.load(Ordering::Acquire),
            "scan opened on a closed token scan reader"
        );
        let first_range = from_id.map(range_of).unwrap_or(0);

        let mut seekers = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let low = RangeKey::new(token, first_range);
            let high = RangeKey::token_ceiling(token);
            let seeker = self
                .shared
                .store
                .seek(low, high)
                .map_err(TokenIndexError::Read)?;
            seekers.push(Some(seeker));
        }

        let id = self.shared.next_scan_id.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::new(Mutex::new(SeekerSlots { seekers }));
        let closed_flag = Arc::new(AtomicBool::new(false));
        {
            // Re-check under the registry lock: a concurrent reader close
            // must either drain this entry or reject the open outright.
            let mut open = self.shared.open.write();
            assert!(
                !self.shared.closed.load(Ordering::Acquire),
                "scan opened on a closed token scan reader"
            );
            open.insert(
                id,
                ScanHandle {
                    slots: Arc::clone(&slots),
                    closed: Arc::clone(&closed_flag),
                },
            );
        }
        trace!(scan = id, tokens = tokens.len(), ?from_id, "token scan opened");

        Ok(TokenScan {
            shared: Arc::clone(&self.shared),
            id,
            slots,
            closed_flag,
            sources: tokens.iter().map(|&t| ScanSource::new(t)).collect(),
            scanned: TokenSet::from_tokens(tokens.iter().copied()),
            from_id,
            current: 0,
            matched: TokenSet::new(),
            started: false,
            released: false,
        })
    }

    /// Number of live (not yet exhausted or closed) scans.
    pub fn open_scan_count(&self) -> usize {
        self.shared.open.read().len()
    }

    /// Close the reader, releasing every scan not yet exhausted. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<(ScanId, ScanHandle)> = self.shared.open.write().drain().collect();
        for (id, handle) in drained {
            handle.closed.store(true, Ordering::Release);
            let mut slots = handle.slots.lock();
            for seeker in slots.seekers.iter_mut() {
                *seeker = None;
            }
            trace!(scan = id, "scan released by reader close");
        }
        debug!("token scan reader closed");
    }
}

impl Drop for TokenScanReader {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// TokenScan
// ============================================================================

/// Per-token merge source: the bitmap currently being drained.
struct ScanSource {
    token: TokenId,
    bits: u64,
    base: EntityId,
    done: bool,
}

impl ScanSource {
    fn new(token: TokenId) -> Self {
        Self {
            token,
            bits: 0,
            base: 0,
            done: false,
        }
    }

    /// Lowest undrained ID, if any bits remain.
    #[inline]
    fn head(&self) -> Option<EntityId> {
        if self.bits == 0 {
            None
        } else {
            Some(self.base + self.bits.trailing_zeros() as u64)
        }
    }
}

/// Closable ascending sequence of entity IDs for one or more tokens.
///
/// Owns one low-level seeker per scanned token, registered with the
/// originating reader. Exhaustion self-closes immediately; explicit
/// [`close`](TokenScan::close) and `Drop` are idempotent. A single scan is
/// not safe to advance from two threads.
pub struct TokenScan {
    shared: Arc<ReaderShared>,
    id: ScanId,
    slots: Arc<Mutex<SeekerSlots>>,
    closed_flag: Arc<AtomicBool>,
    sources: Vec<ScanSource>,
    scanned: TokenSet,
    from_id: Option<EntityId>,
    current: EntityId,
    matched: TokenSet,
    started: bool,
    released: bool,
}

impl TokenScan {
    /// Move to the next entity ID. Returns `false` once exhausted (or after
    /// close), at which point the underlying seekers are already released.
    pub fn advance(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        if self.closed_flag.load(Ordering::Acquire) {
            // The reader closed this scan out from under us: stop serving
            // even IDs already decoded into the local bitmap.
            self.release();
            return Ok(false);
        }

        for idx in 0..self.sources.len() {
            if self.sources[idx].bits == 0 && !self.sources[idx].done {
                self.refill(idx)?;
            }
        }

        let mut min: Option<EntityId> = None;
        for source in &self.sources {
            if let Some(head) = source.head() {
                min = Some(min.map_or(head, |m| m.min(head)));
            }
        }
        let Some(id) = min else {
            // Natural exhaustion: release now, not at close time.
            self.release();
            return Ok(false);
        };

        // Consume the winning ID from every source that carries it, so an
        // entity matching several tokens surfaces exactly once.
        self.matched.clear();
        for source in &mut self.sources {
            if source.head() == Some(id) {
                source.bits &= source.bits - 1;
                self.matched.insert(source.token);
            }
        }

        self.current = id;
        self.started = true;
        Ok(true)
    }

    /// Pull ranges for one source until a non-empty bitmap or exhaustion.
    fn refill(&mut self, idx: usize) -> Result<()> {
        let mut slots = self.slots.lock();
        loop {
            let Some(seeker) = slots.seekers[idx].as_mut() else {
                // Already exhausted, or the reader closed this scan.
                self.sources[idx].done = true;
                self.sources[idx].bits = 0;
                return Ok(());
            };
            match seeker.next().map_err(TokenIndexError::Read)? {
                Some(entry) => {
                    debug_assert_eq!(
                        entry.key.token, self.sources[idx].token,
                        "seek yielded a foreign token's range"
                    );
                    let mut bits = entry.bits;
                    if let Some(from) = self.from_id {
                        if entry.key.range == range_of(from) {
                            bits = bits.retain_above(offset_of(from));
                        }
                    }
                    if bits.is_empty() {
                        continue;
                    }
                    let source = &mut self.sources[idx];
                    source.bits = bits.as_u64();
                    source.base = base_of(entry.key.range);
                    return Ok(());
                }
                None => {
                    // Drop the seeker now rather than at scan close.
                    slots.seekers[idx] = None;
                    self.sources[idx].done = true;
                    self.sources[idx].bits = 0;
                    trace!(scan = self.id, token = self.sources[idx].token, "seeker exhausted");
                    return Ok(());
                }
            }
        }
    }

    /// Current entity ID. Only valid after a successful [`advance`](Self::advance).
    pub fn entity_id(&self) -> EntityId {
        assert!(self.started, "entity_id() before a successful advance()");
        self.current
    }

    /// Scanned tokens the current entity matched (subset of
    /// [`scanned_tokens`](Self::scanned_tokens)).
    pub fn tokens(&self) -> &TokenSet {
        assert!(self.started, "tokens() before a successful advance()");
        &self.matched
    }

    /// The full set of tokens this scan was opened over.
    pub fn scanned_tokens(&self) -> &TokenSet {
        &self.scanned
    }

    /// Whether the scan has released its seekers (closed or exhausted).
    pub fn is_closed(&self) -> bool {
        self.released
    }

    /// Release seekers and deregister from the reader. Idempotent.
    pub fn close(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.closed_flag.store(true, Ordering::Release);
        {
            let mut slots = self.slots.lock();
            for seeker in slots.seekers.iter_mut() {
                *seeker = None;
            }
        }
        // Slot lock dropped before touching the registry: the map lock
        // always orders before slot locks.
        self.shared.open.write().remove(&self.id);
        trace!(scan = self.id, "token scan released");
    }
}

impl Drop for TokenScan {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tests
// ============================================================================
