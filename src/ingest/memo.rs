//! In-process conversion memo.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::key::CacheKey;

type Slot<D> = Arc<Mutex<Option<Arc<D>>>>;

/// Per-key memo of converted documents.
///
/// Each key owns a slot with its own lock. The first caller for a key runs
/// the initializer while holding that slot, so a concurrent caller with the
/// same key waits and then receives the same `Arc`; callers with other keys
/// are not blocked.
pub struct ConversionMemo<D> {
    slots: Mutex<FxHashMap<CacheKey, Slot<D>>>,
}

impl<D> ConversionMemo<D> {
    /// Empty memo.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Memoized document for `key`, if one was produced.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<D>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.lock().clone()
    }

    /// Memoized document for `key`, or the result of `init`.
    ///
    /// Returns the document and whether `init` produced it. A failing
    /// `init` leaves the slot empty so a later call may try again.
    pub fn get_or_try_init<E>(&self, key: CacheKey, init: impl FnOnce() -> Result<D, E>) -> Result<(Arc<D>, bool), E> {
        let slot = self.slots.lock().entry(key).or_default().clone();

        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok((Arc::clone(existing), false));
        }
        let value = Arc::new(init()?);
        *guard = Some(Arc::clone(&value));
        Ok((value, true))
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.lock().is_some()).count()
    }

    /// Whether no entry is populated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl<D> Default for ConversionMemo<D> {
    fn default() -> Self {
        Self::new()
    }
}
