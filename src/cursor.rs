//! Pooled scan cursors: the externally consumed iterator objects.
//!
//! A cursor wraps the reader-level scan, the transaction overlay, and the
//! security filter into one advance/accessor surface. Cursors are recycled
//! through an arena-style pool: the pool owns idle cursor cores, a
//! checked-out [`ScanCursor`] guard owns exactly one core, and release
//! resets the core before its slot becomes reusable — no state leaks
//! across unrelated queries.
//!
//! State machine per cursor: Idle (in pool) → Initialized → Iterating →
//! Closed (reset, slot returned) → Initialized again on reuse. `close` is
//! idempotent and also runs on `Drop`, so a failure mid-scan cannot leak a
//! pool slot. Accessors before the first successful `advance`, or after
//! close, fail fast with a panic; so does double initialization.

use crate::error::Result;
use crate::overlay::TokenOverlay;
use crate::reader::TokenScan;
use crate::security::{Admission, TraversalFilter};
use crate::types::{EntityId, TokenSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

// ============================================================================
// CursorCore
// ============================================================================

/// Reusable cursor state. Owned by the pool while idle, by a `ScanCursor`
/// guard while checked out.
#[derive(Default)]
struct CursorCore {
    scan: Option<TokenScan>,
    overlay: TokenOverlay,
    filter: Option<TraversalFilter>,
    /// Tokens the scan was opened over; exposed for admitted
    /// transaction-added candidates, whose membership comes from the
    /// overlay rather than a decoded range.
    scanned: TokenSet,
    current: Option<EntityId>,
    tokens: TokenSet,
    scratch: TokenSet,
}

impl CursorCore {
    fn initialize(&mut self, scan: TokenScan, overlay: TokenOverlay, filter: TraversalFilter) {
        assert!(
            self.scan.is_none() && self.filter.is_none(),
            "initialize on a scan cursor that is already initialized"
        );
        self.scanned.copy_from(scan.scanned_tokens());
        self.scan = Some(scan);
        self.overlay = overlay;
        self.filter = Some(filter);
        self.current = None;
        self.tokens.clear();
    }

    fn advance(&mut self) -> Result<bool> {
        assert!(
            self.scan.is_some() && self.filter.is_some(),
            "advance on a scan cursor that was never initialized"
        );
        loop {
            // Transaction-added IDs surface before the base scan.
            if let Some(id) = self.overlay.next_added() {
                let filter = self.filter.as_ref().expect("filter wired at initialize");
                match filter.admit(id, None, &mut self.scratch)? {
                    Admission::Granted => {
                        self.current = Some(id);
                        self.tokens.copy_from(&self.scanned);
                        return Ok(true);
                    }
                    Admission::GrantedWithTokens => {
                        self.current = Some(id);
                        std::mem::swap(&mut self.tokens, &mut self.scratch);
                        return Ok(true);
                    }
                    Admission::Skipped => continue,
                }
            }

            let scan = self.scan.as_mut().expect("scan wired at initialize");
            if !scan.advance()? {
                return Ok(false);
            }
            let id = scan.entity_id();
            if self.overlay.suppresses(id) {
                continue;
            }
            // The bitmap index cannot supply an entity's full token set, so
            // per-entity admission always goes through the record load.
            let filter = self.filter.as_ref().expect("filter wired at initialize");
            match filter.admit(id, None, &mut self.scratch)? {
                Admission::Granted => {
                    self.current = Some(id);
                    let matched = scan.tokens();
                    self.tokens.copy_from(matched);
                    return Ok(true);
                }
                Admission::GrantedWithTokens => {
                    self.current = Some(id);
                    std::mem::swap(&mut self.tokens, &mut self.scratch);
                    return Ok(true);
                }
                Admission::Skipped => continue,
            }
        }
    }

    fn entity_id(&self) -> EntityId {
        self.current
            .expect("entity_id() before a successful advance()")
    }

    fn tokens(&self) -> &TokenSet {
        assert!(
            self.current.is_some(),
            "tokens() before a successful advance()"
        );
        &self.tokens
    }

    /// Clear everything before the slot becomes reusable: a recycled
    /// cursor must expose no state from its previous scan.
    fn reset(&mut self) {
        if let Some(mut scan) = self.scan.take() {
            scan.close();
        }
        self.overlay = TokenOverlay::none();
        self.filter = None;
        self.scanned.clear();
        self.current = None;
        self.tokens.clear();
        self.scratch.clear();
    }
}

// ============================================================================
// CursorPool
// ============================================================================

enum Slot {
    Idle(Box<CursorCore>),
    CheckedOut,
}

struct PoolInner {
    slots: Mutex<Vec<Slot>>,
}

/// Arena-style pool of cursor cores. Cheap to clone (`Arc`-wrapped); all
/// clones share one arena.
///
/// The pool owns idle slots; a checked-out guard owns its core and slot
/// handle. Safe to acquire from multiple threads; each checked-out cursor
/// is single-threaded.
#[derive(Clone)]
pub struct CursorPool {
    inner: Arc<PoolInner>,
}

impl CursorPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pool with `capacity` pre-allocated idle cores; still grows past it
    /// on demand.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot::Idle(Box::new(CursorCore::default())))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
            }),
        }
    }

    /// Check out a cursor, reusing an idle core or growing the arena.
    pub fn acquire(&self) -> ScanCursor {
        let mut slots = self.inner.slots.lock();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Idle(_)) {
                let Slot::Idle(core) = std::mem::replace(slot, Slot::CheckedOut) else {
                    unreachable!("slot matched Idle above");
                };
                trace!(slot = idx, "scan cursor checked out");
                return ScanCursor {
                    pool: self.clone(),
                    slot: idx,
                    core: Some(core),
                };
            }
        }
        let idx = slots.len();
        slots.push(Slot::CheckedOut);
        trace!(slot = idx, "scan cursor pool grown");
        ScanCursor {
            pool: self.clone(),
            slot: idx,
            core: Some(Box::new(CursorCore::default())),
        }
    }

    fn release(&self, slot: usize, core: Box<CursorCore>) {
        let mut slots = self.inner.slots.lock();
        if matches!(slots[slot], Slot::Idle(_)) {
            panic!("cursor pool slot {} released twice", slot);
        }
        slots[slot] = Slot::Idle(core);
        trace!(slot, "scan cursor returned to pool");
    }

    /// Total slots in the arena (idle + checked out).
    pub fn size(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Idle slots available for checkout.
    pub fn idle_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|slot| matches!(slot, Slot::Idle(_)))
            .count()
    }
}

impl Default for CursorPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ScanCursor
// ============================================================================

/// Checked-out scan cursor: the query layer's iterator over admitted
/// entity IDs.
pub struct ScanCursor {
    pool: CursorPool,
    slot: usize,
    core: Option<Box<CursorCore>>,
}

impl ScanCursor {
    /// Wire a reader scan, transaction overlay, and security filter into
    /// this cursor. Panics if the cursor is already initialized or closed.
    pub fn initialize(&mut self, scan: TokenScan, overlay: TokenOverlay, filter: TraversalFilter) {
        self.core
            .as_mut()
            .expect("initialize on a closed scan cursor")
            .initialize(scan, overlay, filter);
    }

    /// Move to the next admitted entity. Returns `false` once the merged,
    /// filtered sequence is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        self.core
            .as_mut()
            .expect("advance on a closed scan cursor")
            .advance()
    }

    /// Current entity ID. Only valid after a successful `advance`.
    pub fn entity_id(&self) -> EntityId {
        self.core
            .as_ref()
            .expect("entity_id on a closed scan cursor")
            .entity_id()
    }

    /// Current admitted token set: matched scanned tokens, the loaded full
    /// set when the security filter loaded the record, or the scanned
    /// tokens for transaction-added candidates.
    pub fn tokens(&self) -> &TokenSet {
        self.core
            .as_ref()
            .expect("tokens on a closed scan cursor")
            .tokens()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_none()
    }

    /// Reset the core and return it to the pool. Idempotent; also runs on
    /// `Drop`, even if `advance` was never called or a prior call failed.
    pub fn close(&mut self) {
        if let Some(mut core) = self.core.take() {
            core.reset();
            self.pool.release(self.slot, core);
        }
    }
}

impl Drop for ScanCursor {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
