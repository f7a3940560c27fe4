//! Read-state tracking and derived unread counts.
//!
//! The only owned state is the set of links the user has read. Counts are
//! never stored: every query derives them from that set and the item cache,
//! so they cannot drift from either.
//!
//! The one exception is a feed restored from a snapshot that has not been
//! fetched yet: it has no item list to derive from, so the count saved with
//! the snapshot is reported until the first list arrives or until anything is
//! marked read, whichever comes first.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::cache::ItemCache;
use crate::feed::FeedItem;
use crate::registry::{FeedId, FolderId, SourceRegistry};

#[derive(Debug, Default)]
pub struct UnreadTracker {
    read: RwLock<HashSet<String>>,
    seeds: Mutex<HashMap<FeedId, usize>>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore read links and the last persisted per-feed counts.
    pub fn restore(
        read_links: impl IntoIterator<Item = String>,
        seeds: HashMap<FeedId, usize>,
    ) -> Self {
        Self {
            read: RwLock::new(read_links.into_iter().collect()),
            seeds: Mutex::new(seeds),
        }
    }

    /// Mark a link read. Idempotent; returns `true` the first time.
    ///
    /// A new read link drops every persisted count, so all feeds fall back to
    /// the derivation from their cached items (zero for feeds never fetched).
    pub fn mark_read(&self, link: &str) -> bool {
        let inserted = self
            .read
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(link.to_owned());
        if inserted {
            self.seeds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        inserted
    }

    pub fn is_read(&self, link: &str) -> bool {
        self.read
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(link)
    }

    /// A fresh item list replaces any persisted count for this feed.
    pub fn items_arrived(&self, feed_id: FeedId) {
        self.seeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&feed_id);
    }

    /// Forget everything held for a removed feed.
    pub fn forget(&self, feed_id: FeedId) {
        self.items_arrived(feed_id);
    }

    /// Items in `items` whose link has not been read.
    pub fn count_unread(&self, items: &[FeedItem]) -> usize {
        let read = self.read.read().unwrap_or_else(PoisonError::into_inner);
        items.iter().filter(|i| !read.contains(&i.link)).count()
    }

    pub fn count_for_feed(&self, cache: &ItemCache, feed_id: FeedId) -> usize {
        match cache.items(feed_id) {
            Some(items) => self.count_unread(&items),
            None => self
                .seeds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&feed_id)
                .copied()
                .unwrap_or(0),
        }
    }

    /// Sum over the feeds currently in `folder_id`.
    pub fn count_for_folder(
        &self,
        registry: &SourceRegistry,
        cache: &ItemCache,
        folder_id: FolderId,
    ) -> usize {
        registry
            .feeds_in(Some(folder_id))
            .iter()
            .map(|f| self.count_for_feed(cache, f.id))
            .sum()
    }

    /// Per-feed counts for every registered feed.
    pub fn counts(&self, registry: &SourceRegistry, cache: &ItemCache) -> HashMap<FeedId, usize> {
        registry
            .feeds()
            .map(|f| (f.id, self.count_for_feed(cache, f.id)))
            .collect()
    }

    /// Read links, sorted for stable snapshots.
    pub fn read_links(&self) -> Vec<String> {
        let mut links: Vec<String> = self
            .read
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        links.sort();
        links
    }
}
