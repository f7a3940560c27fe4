use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::cache::ItemCache;
use crate::config::Config;
use crate::feed::{FeedItem, FeedSource, RefreshError, RefreshEvent, RefreshScheduler};
use crate::registry::{
    Direction, Feed, FeedId, Folder, FolderId, RegistryError, SourceRegistry, ValidationError,
};
use crate::storage::snapshot::{to_json, EXPANDED_KEY, SELECTED_KEY};
use crate::storage::{load_snapshot, save_snapshot, DatabaseError, Snapshot, SnapshotStore};
use crate::unread::UnreadTracker;

// ============================================================================
// Query Types
// ============================================================================

/// Which feeds a list query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFilter {
    /// Every feed, "no folder" group first, then folder by folder.
    All,
    Unfiled,
    Folder(FolderId),
}

/// Display-ready view of one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub feed: Feed,
    pub unread: usize,
    pub loading: bool,
    pub error: Option<String>,
}

// ============================================================================
// App
// ============================================================================

/// Commands and queries over the feed hierarchy, read state and refresh loop.
///
/// Structural commands run one at a time under the registry mutex. Refresh
/// tasks never take that mutex; they only write their own feed's cache slot.
/// Every command that changes state persists a snapshot before returning;
/// a failed save is logged and does not undo the command.
pub struct App {
    registry: Mutex<SourceRegistry>,
    tracker: Arc<UnreadTracker>,
    cache: Arc<ItemCache>,
    scheduler: RefreshScheduler,
    store: Arc<dyn SnapshotStore>,
    // Serialises capture+save so an older snapshot never lands after a newer one
    save_lock: tokio::sync::Mutex<()>,
}

impl App {
    /// Restore state from `store` and prepare (but do not start) refreshing.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        source: Arc<dyn FeedSource>,
        config: &Config,
        events: Option<mpsc::Sender<RefreshEvent>>,
    ) -> Result<Self, DatabaseError> {
        let snapshot = load_snapshot(store.as_ref()).await?;
        let (registry, tracker) = snapshot.restore();

        let cache = Arc::new(ItemCache::new());
        for feed in registry.feeds() {
            cache.insert(feed.id);
        }
        let tracker = Arc::new(tracker);
        let scheduler = RefreshScheduler::new(
            source,
            Arc::clone(&cache),
            Arc::clone(&tracker),
            config.refresh_interval(),
            events,
        );

        tracing::info!(
            feeds = registry.feed_count(),
            folders = registry.folders().len(),
            "Restored state"
        );

        Ok(Self {
            registry: Mutex::new(registry),
            tracker,
            cache,
            scheduler,
            store,
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Start the periodic refresh task of every feed.
    pub fn start_refreshing(&self) {
        let feeds: Vec<Feed> = self.registry().feeds().cloned().collect();
        for feed in &feeds {
            self.scheduler.start(feed);
        }
        tracing::info!(feeds = feeds.len(), "Started refresh tasks");
    }

    /// Abort every refresh task.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    // ========================================================================
    // Feed Commands
    // ========================================================================

    /// Subscribe, select the new feed and start its refresh task.
    pub async fn add_feed(
        &self,
        source_url: &str,
        display_name: Option<&str>,
    ) -> Result<Feed, ValidationError> {
        let feed = self.registry().add_feed(source_url, display_name)?;
        self.cache.insert(feed.id);
        self.scheduler.start(&feed);
        tracing::info!(feed_id = %feed.id, url = %feed.source_url, "Feed added");
        self.persist_quietly().await;
        Ok(feed)
    }

    /// Unsubscribe, cancelling its refresh and dropping its cached items.
    pub async fn remove_feed(&self, id: FeedId) -> Option<Feed> {
        let removed = self.registry().remove_feed(id)?;
        // Slot first: a fetch completing between these two lines has nowhere to write
        self.cache.remove(id);
        self.scheduler.cancel(id);
        self.tracker.forget(id);
        tracing::info!(feed_id = %id, "Feed removed");
        self.persist_quietly().await;
        Some(removed)
    }

    pub async fn move_feed(&self, id: FeedId, direction: Direction) -> bool {
        let moved = self.registry().move_feed(id, direction);
        if moved {
            self.persist_quietly().await;
        }
        moved
    }

    /// Move a feed into `folder_id`, or out of any folder with `None`.
    pub async fn reparent_feed(&self, id: FeedId, folder_id: Option<FolderId>) -> bool {
        let moved = self.registry().reparent_feed(id, folder_id);
        if moved {
            self.persist_quietly().await;
        }
        moved
    }

    pub async fn select(&self, id: FeedId) -> Option<Feed> {
        let feed = self.registry().select(id)?;
        self.persist_key(SELECTED_KEY, &Some(id.to_string())).await;
        Some(feed)
    }

    /// Mark a link read everywhere it appears. Returns the feeds whose
    /// unread count dropped, empty if the link was already read.
    pub async fn mark_read(&self, link: &str) -> Vec<FeedId> {
        if !self.tracker.mark_read(link) {
            return Vec::new();
        }
        let affected = self.cache.feeds_containing(link);
        tracing::debug!(link = %link, feeds = affected.len(), "Marked read");
        self.persist_quietly().await;
        affected
    }

    /// Refresh one feed immediately. `None` if the feed is unknown.
    pub async fn refresh_now(&self, id: FeedId) -> Option<Result<usize, RefreshError>> {
        let feed = self.registry().feed(id).cloned()?;
        let result = self.scheduler.refresh_now(&feed).await;
        if result.is_ok() {
            self.persist_quietly().await;
        }
        Some(result)
    }

    // ========================================================================
    // Folder Commands
    // ========================================================================

    pub async fn add_folder(&self, display_name: &str) -> Result<Folder, ValidationError> {
        let folder = self.registry().add_folder(display_name)?;
        self.persist_quietly().await;
        Ok(folder)
    }

    /// Delete a folder; its feeds move to the end of "no folder".
    pub async fn remove_folder(&self, id: FolderId) -> Option<Folder> {
        let removed = self.registry().remove_folder(id)?;
        self.persist_quietly().await;
        Some(removed)
    }

    pub async fn move_folder(&self, id: FolderId, direction: Direction) -> bool {
        let moved = self.registry().move_folder(id, direction);
        if moved {
            self.persist_quietly().await;
        }
        moved
    }

    /// Returns the new expanded state, `None` for an unknown folder.
    pub async fn toggle_folder(&self, id: FolderId) -> Option<bool> {
        let (expanded, all) = {
            let mut registry = self.registry();
            let expanded = registry.toggle_folder(id)?;
            let all: Vec<String> = registry
                .expanded_folders()
                .iter()
                .map(ToString::to_string)
                .collect();
            (expanded, all)
        };
        self.persist_key(EXPANDED_KEY, &all).await;
        Some(expanded)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn feeds(&self, filter: FeedFilter) -> Vec<Feed> {
        let registry = self.registry();
        let feeds = match filter {
            FeedFilter::All => registry.feeds_ordered(),
            FeedFilter::Unfiled => registry.feeds_in(None),
            FeedFilter::Folder(id) => registry.feeds_in(Some(id)),
        };
        feeds.into_iter().cloned().collect()
    }

    /// Feeds with their unread count, loading flag and last error.
    pub fn feed_statuses(&self, filter: FeedFilter) -> Vec<FeedStatus> {
        self.feeds(filter)
            .into_iter()
            .map(|feed| FeedStatus {
                unread: self.tracker.count_for_feed(&self.cache, feed.id),
                loading: self.cache.is_loading(feed.id),
                error: self.cache.error(feed.id),
                feed,
            })
            .collect()
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.registry().folders().into_iter().cloned().collect()
    }

    pub fn feed(&self, id: FeedId) -> Option<Feed> {
        self.registry().feed(id).cloned()
    }

    pub fn folder(&self, id: FolderId) -> Option<Folder> {
        self.registry().folder(id).cloned()
    }

    pub fn selected(&self) -> Option<Feed> {
        self.registry().selected().cloned()
    }

    /// Current item list of the selected feed, if it has been fetched.
    pub fn selected_items(&self) -> Option<Arc<Vec<FeedItem>>> {
        let id = self.registry().selected()?.id;
        self.cache.items(id)
    }

    pub fn items(&self, id: FeedId) -> Option<Arc<Vec<FeedItem>>> {
        self.cache.items(id)
    }

    pub fn unread_count(&self, id: FeedId) -> usize {
        self.tracker.count_for_feed(&self.cache, id)
    }

    pub fn folder_unread_count(&self, id: FolderId) -> usize {
        let registry = self.registry();
        self.tracker.count_for_folder(&registry, &self.cache, id)
    }

    pub fn is_read(&self, link: &str) -> bool {
        self.tracker.is_read(link)
    }

    pub fn is_loading(&self, id: FeedId) -> bool {
        self.cache.is_loading(id)
    }

    pub fn last_error(&self, id: FeedId) -> Option<String> {
        self.cache.error(id)
    }

    pub fn is_expanded(&self, id: FolderId) -> bool {
        self.registry().is_expanded(id)
    }

    pub fn is_scheduled(&self, id: FeedId) -> bool {
        self.scheduler.is_scheduled(id)
    }

    /// Dense-index invariant holds for every sibling group.
    pub fn is_consistent(&self) -> bool {
        self.registry().is_consistent()
    }

    pub fn resolve_feed(&self, needle: &str) -> Result<FeedId, RegistryError> {
        self.registry().resolve_feed(needle)
    }

    pub fn resolve_folder(&self, needle: &str) -> Result<FolderId, RegistryError> {
        self.registry().resolve_folder(needle)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Capture and save the full snapshot.
    pub async fn persist(&self) -> Result<(), DatabaseError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = {
            let registry = self.registry();
            Snapshot::capture(&registry, &self.tracker, &self.cache)
        };
        save_snapshot(self.store.as_ref(), &snapshot).await
    }

    async fn persist_quietly(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "Failed to persist snapshot");
        }
    }

    async fn persist_key<T: serde::Serialize>(&self, key: &'static str, value: &T) {
        let result = match to_json(key, value) {
            Ok(json) => {
                let _guard = self.save_lock.lock().await;
                self.store.persist(key, &json).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Failed to persist snapshot entry");
        }
    }

    fn registry(&self) -> MutexGuard<'_, SourceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
