//! Per-feed item cache: last fetched item list, last error, loading flag.
//!
//! Each feed gets its own slot behind its own mutex, so refresh tasks for
//! different feeds never wait on each other. A slot exists only between
//! [`ItemCache::insert`] and [`ItemCache::remove`]; writes aimed at a missing
//! slot are discarded and reported as `false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::feed::FeedItem;
use crate::registry::FeedId;

#[derive(Debug, Default)]
struct FeedSlot {
    items: Option<Arc<Vec<FeedItem>>>,
    error: Option<String>,
    loading: bool,
}

#[derive(Debug, Default)]
pub struct ItemCache {
    slots: RwLock<HashMap<FeedId, Arc<Mutex<FeedSlot>>>>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty slot for a feed. An existing slot is left as is.
    pub fn insert(&self, feed_id: FeedId) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(feed_id)
            .or_default();
    }

    /// Drop the slot; any in-flight refresh for this feed can no longer write.
    pub fn remove(&self, feed_id: FeedId) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&feed_id)
            .is_some()
    }

    pub fn contains(&self, feed_id: FeedId) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&feed_id)
    }

    /// Store a fresh item list and clear the feed's error.
    pub fn store_items(&self, feed_id: FeedId, items: Vec<FeedItem>) -> bool {
        self.with_slot(feed_id, |slot| {
            slot.items = Some(Arc::new(items));
            slot.error = None;
        })
    }

    /// Record a failure. The previous item list stays in place.
    pub fn store_error(&self, feed_id: FeedId, error: String) -> bool {
        self.with_slot(feed_id, |slot| slot.error = Some(error))
    }

    pub fn set_loading(&self, feed_id: FeedId, loading: bool) -> bool {
        self.with_slot(feed_id, |slot| slot.loading = loading)
    }

    /// Last fetched items, `None` until the first successful refresh.
    pub fn items(&self, feed_id: FeedId) -> Option<Arc<Vec<FeedItem>>> {
        self.read_slot(feed_id, |slot| slot.items.clone()).flatten()
    }

    pub fn error(&self, feed_id: FeedId) -> Option<String> {
        self.read_slot(feed_id, |slot| slot.error.clone()).flatten()
    }

    pub fn is_loading(&self, feed_id: FeedId) -> bool {
        self.read_slot(feed_id, |slot| slot.loading).unwrap_or(false)
    }

    /// Feeds whose cached list contains `link`.
    pub fn feeds_containing(&self, link: &str) -> Vec<FeedId> {
        let slots: Vec<(FeedId, Arc<Mutex<FeedSlot>>)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        slots
            .into_iter()
            .filter(|(_, slot)| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .items
                    .as_ref()
                    .is_some_and(|items| items.iter().any(|i| i.link == link))
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn slot(&self, feed_id: FeedId) -> Option<Arc<Mutex<FeedSlot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&feed_id)
            .cloned()
    }

    fn with_slot(&self, feed_id: FeedId, f: impl FnOnce(&mut FeedSlot)) -> bool {
        // Hold the outer read lock so a concurrent remove() cannot slip in
        // between the lookup and the write.
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get(&feed_id) else {
            return false;
        };
        f(&mut slot.lock().unwrap_or_else(PoisonError::into_inner));
        true
    }

    fn read_slot<R>(&self, feed_id: FeedId, f: impl FnOnce(&FeedSlot) -> R) -> Option<R> {
        let slot = self.slot(feed_id)?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&guard))
    }
}
