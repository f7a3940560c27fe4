use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::ItemCache;
use crate::feed::fetcher::{FeedSource, FetchError};
use crate::feed::parser::{parse_items, FormatError};
use crate::registry::{Feed, FeedId};
use crate::unread::UnreadTracker;

/// Default refresh period per feed.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Final outcome of a failed refresh, stored as the feed's error string.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Direct fetch failed and so did the single proxy fallback.
    #[error("{direct} (proxy fallback: {fallback})")]
    Transport {
        direct: FetchError,
        fallback: FetchError,
    },
    /// Content arrived but is not a feed; retrying would not help.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The feed was removed while its fetch was in flight.
    #[error("Feed was removed during refresh")]
    Removed,
}

/// Progress of one refresh cycle, published for whoever listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Started {
        feed_id: FeedId,
    },
    Succeeded {
        feed_id: FeedId,
        items: usize,
        skipped: usize,
        via_proxy: bool,
    },
    Failed {
        feed_id: FeedId,
        error: String,
    },
}

/// Shared by every refresh task. Writes only to the refreshed feed's cache slot.
struct Worker {
    source: Arc<dyn FeedSource>,
    cache: Arc<ItemCache>,
    tracker: Arc<UnreadTracker>,
    events: Option<mpsc::Sender<RefreshEvent>>,
}

impl Worker {
    async fn refresh(&self, feed_id: FeedId, url: &str) -> Result<usize, RefreshError> {
        if !self.cache.set_loading(feed_id, true) {
            return Err(RefreshError::Removed);
        }
        self.emit(RefreshEvent::Started { feed_id }).await;

        let result = self.fetch_and_parse(feed_id, url).await;

        let event = match result {
            Ok((items, skipped, via_proxy)) => {
                let count = items.len();
                if !self.cache.store_items(feed_id, items) {
                    tracing::debug!(feed_id = %feed_id, "Feed removed mid-refresh, discarding items");
                    return Err(RefreshError::Removed);
                }
                self.tracker.items_arrived(feed_id);
                self.cache.set_loading(feed_id, false);
                tracing::info!(feed_id = %feed_id, items = count, skipped, via_proxy, "Feed refreshed");
                self.emit(RefreshEvent::Succeeded {
                    feed_id,
                    items: count,
                    skipped,
                    via_proxy,
                })
                .await;
                return Ok(count);
            }
            Err(e) => e,
        };

        let message = event.to_string();
        if !self.cache.store_error(feed_id, message.clone()) {
            return Err(RefreshError::Removed);
        }
        self.cache.set_loading(feed_id, false);
        tracing::warn!(feed_id = %feed_id, url = %url, error = %message, "Feed refresh failed");
        self.emit(RefreshEvent::Failed {
            feed_id,
            error: message,
        })
        .await;
        Err(event)
    }

    async fn fetch_and_parse(
        &self,
        feed_id: FeedId,
        url: &str,
    ) -> Result<(Vec<crate::feed::FeedItem>, usize, bool), RefreshError> {
        let (raw, via_proxy) = match self.source.fetch_raw(url).await {
            Ok(raw) => (raw, false),
            Err(direct) => {
                tracing::warn!(feed_id = %feed_id, url = %url, error = %direct, "Direct fetch failed, trying proxy");
                match self.source.fetch_via_proxy(url).await {
                    Ok(raw) => (raw, true),
                    Err(fallback) => return Err(RefreshError::Transport { direct, fallback }),
                }
            }
        };

        let parsed = parse_items(&raw)?;
        if parsed.skipped > 0 {
            tracing::warn!(feed_id = %feed_id, skipped = parsed.skipped, "Items without a link skipped");
        }
        Ok((parsed.items, parsed.skipped, via_proxy))
    }

    async fn emit(&self, event: RefreshEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.send(event).await {
                tracing::debug!(error = %e, "Refresh event receiver dropped");
            }
        }
    }
}

/// Owns one recurring refresh task per feed.
///
/// Each task fetches immediately, then once per interval, until it is
/// cancelled. Starting a feed that already has a task replaces that task,
/// so there is never more than one per feed id. Dropping the scheduler
/// aborts every task.
pub struct RefreshScheduler {
    worker: Arc<Worker>,
    interval: Duration,
    tasks: Mutex<HashMap<FeedId, JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// `interval` of zero disables the periodic loop; tasks then fetch once.
    pub fn new(
        source: Arc<dyn FeedSource>,
        cache: Arc<ItemCache>,
        tracker: Arc<UnreadTracker>,
        interval: Duration,
        events: Option<mpsc::Sender<RefreshEvent>>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                source,
                cache,
                tracker,
                events,
            }),
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the refresh loop for `feed`. Must be called inside a tokio runtime.
    pub fn start(&self, feed: &Feed) {
        let worker = Arc::clone(&self.worker);
        let feed_id = feed.id;
        let url = feed.source_url.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            if period.is_zero() {
                let _ = worker.refresh(feed_id, &url).await;
                return;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(RefreshError::Removed) = worker.refresh(feed_id, &url).await {
                    break;
                }
            }
        });

        let previous = self.lock_tasks().insert(feed_id, handle);
        if let Some(previous) = previous {
            previous.abort();
            tracing::debug!(feed_id = %feed_id, "Replaced existing refresh task");
        }
    }

    /// Abort and forget the task for `feed_id`. Returns `false` if there was none.
    pub fn cancel(&self, feed_id: FeedId) -> bool {
        match self.lock_tasks().remove(&feed_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Run one refresh cycle now, outside the periodic loop.
    pub async fn refresh_now(&self, feed: &Feed) -> Result<usize, RefreshError> {
        self.worker.refresh(feed.id, &feed.source_url).await
    }

    pub fn is_scheduled(&self, feed_id: FeedId) -> bool {
        self.lock_tasks().contains_key(&feed_id)
    }

    pub fn task_count(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn shutdown(&self) {
        for (_, handle) in self.lock_tasks().drain() {
            handle.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<FeedId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn rss(links: &[&str]) -> Vec<u8> {
        let items: String = links
            .iter()
            .map(|l| format!("<item><title>{l}</title><link>{l}</link></item>"))
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{items}</channel></rss>"#)
            .into_bytes()
    }

    /// Scripted source: `None` bodies fail with a timeout.
    #[derive(Default)]
    struct MockSource {
        direct: Mutex<Option<Vec<u8>>>,
        proxy: Mutex<Option<Vec<u8>>>,
        direct_calls: AtomicUsize,
        proxy_calls: AtomicUsize,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl MockSource {
        fn serving(body: Vec<u8>) -> Self {
            let source = Self::default();
            source.set_direct(Some(body));
            source
        }
        fn set_direct(&self, body: Option<Vec<u8>>) {
            *self.direct.lock().unwrap() = body;
        }
        fn set_proxy(&self, body: Option<Vec<u8>>) {
            *self.proxy.lock().unwrap() = body;
        }
    }

    #[async_trait]
    impl FeedSource for MockSource {
        async fn fetch_raw(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.direct_calls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            self.direct.lock().unwrap().clone().ok_or(FetchError::Timeout)
        }

        async fn fetch_via_proxy(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.proxy_calls.fetch_add(1, Ordering::SeqCst);
            self.proxy.lock().unwrap().clone().ok_or(FetchError::NoProxy)
        }
    }

    struct Harness {
        source: Arc<MockSource>,
        cache: Arc<ItemCache>,
        tracker: Arc<UnreadTracker>,
        scheduler: RefreshScheduler,
    }

    fn harness(source: MockSource, interval: Duration) -> Harness {
        let source = Arc::new(source);
        let cache = Arc::new(ItemCache::new());
        let tracker = Arc::new(UnreadTracker::new());
        let scheduler = RefreshScheduler::new(
            source.clone(),
            cache.clone(),
            tracker.clone(),
            interval,
            None,
        );
        Harness {
            source,
            cache,
            tracker,
            scheduler,
        }
    }

    fn feed(url: &str) -> Feed {
        Feed {
            id: FeedId::new(),
            source_url: url.to_string(),
            display_name: "Test".to_string(),
            folder_id: None,
            sibling_index: 0,
        }
    }

    #[tokio::test]
    async fn test_refresh_success_stores_items() {
        let h = harness(MockSource::serving(rss(&["a", "b"])), DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");
        h.cache.insert(f.id);
        h.cache.store_error(f.id, "old".into());

        assert_eq!(h.scheduler.refresh_now(&f).await.unwrap(), 2);
        assert_eq!(h.cache.items(f.id).unwrap().len(), 2);
        assert!(h.cache.error(f.id).is_none());
        assert!(!h.cache.is_loading(f.id));
        assert_eq!(h.tracker.count_for_feed(&h.cache, f.id), 2);
        assert_eq!(h.source.proxy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unread_scenario_across_refreshes() {
        let h = harness(MockSource::serving(rss(&["a", "b"])), DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");
        h.cache.insert(f.id);

        h.scheduler.refresh_now(&f).await.unwrap();
        assert_eq!(h.tracker.count_for_feed(&h.cache, f.id), 2);
        h.tracker.mark_read("a");
        assert_eq!(h.tracker.count_for_feed(&h.cache, f.id), 1);

        h.source.set_direct(Some(rss(&["a", "b", "c"])));
        h.scheduler.refresh_now(&f).await.unwrap();
        assert_eq!(h.tracker.count_for_feed(&h.cache, f.id), 2);
    }

    #[tokio::test]
    async fn test_direct_failure_falls_back_to_proxy() {
        let source = MockSource::default();
        source.set_proxy(Some(rss(&["p"])));
        let h = harness(source, DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");
        h.cache.insert(f.id);

        assert_eq!(h.scheduler.refresh_now(&f).await.unwrap(), 1);
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.source.proxy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.cache.items(f.id).unwrap()[0], FeedItem {
            link: "p".into(),
            title: Some("p".into()),
            description: None,
            published_at: None,
        });
    }

    #[tokio::test]
    async fn test_both_paths_fail_keeps_stale_items() {
        let h = harness(MockSource::serving(rss(&["a", "b"])), DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");
        h.cache.insert(f.id);
        h.scheduler.refresh_now(&f).await.unwrap();
        h.tracker.mark_read("b");

        h.source.set_direct(None);
        let err = h.scheduler.refresh_now(&f).await.unwrap_err();
        assert!(matches!(err, RefreshError::Transport { .. }));
        assert_eq!(h.source.proxy_calls.load(Ordering::SeqCst), 1);

        let error = h.cache.error(f.id).unwrap();
        assert!(error.contains("timed out"));
        assert!(error.contains("proxy fallback"));
        assert_eq!(h.cache.items(f.id).unwrap().len(), 2);
        assert_eq!(h.tracker.count_for_feed(&h.cache, f.id), 1);
        assert!(!h.cache.is_loading(f.id));
    }

    #[tokio::test]
    async fn test_format_error_does_not_use_proxy() {
        let h = harness(
            MockSource::serving(b"<html>not a feed".to_vec()),
            DEFAULT_REFRESH_INTERVAL,
        );
        let f = feed("http://x/feed");
        h.cache.insert(f.id);

        let err = h.scheduler.refresh_now(&f).await.unwrap_err();
        assert!(matches!(err, RefreshError::Format(_)));
        assert_eq!(h.source.proxy_calls.load(Ordering::SeqCst), 0);
        assert!(h.cache.error(f.id).unwrap().contains("Unrecognized"));
    }

    #[tokio::test]
    async fn test_refresh_of_unknown_feed_is_discarded() {
        let h = harness(MockSource::serving(rss(&["a"])), DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");

        assert!(matches!(
            h.scheduler.refresh_now(&f).await,
            Err(RefreshError::Removed)
        ));
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_after_removal_does_not_resurrect() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = MockSource {
            gate: Some((entered.clone(), release.clone())),
            ..MockSource::default()
        };
        source.set_direct(Some(rss(&["a"])));
        let h = harness(source, DEFAULT_REFRESH_INTERVAL);
        let f = feed("http://x/feed");
        h.cache.insert(f.id);

        let scheduler = Arc::new(h.scheduler);
        let in_flight = {
            let scheduler = scheduler.clone();
            let f = f.clone();
            tokio::spawn(async move { scheduler.refresh_now(&f).await })
        };

        entered.notified().await;
        h.cache.remove(f.id);
        release.notify_one();

        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(RefreshError::Removed)));
        assert!(!h.cache.contains(f.id));
        assert!(h.cache.items(f.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_and_cancel() {
        let h = harness(MockSource::serving(rss(&["a"])), Duration::from_secs(300));
        let f = feed("http://x/feed");
        h.cache.insert(f.id);

        h.scheduler.start(&f);
        assert!(h.scheduler.is_scheduled(f.id));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 2);

        assert!(h.scheduler.cancel(f.id));
        assert!(!h.scheduler.cancel(f.id));
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_single_task_per_feed() {
        let h = harness(MockSource::serving(rss(&["a"])), Duration::from_secs(300));
        let f = feed("http://x/feed");
        let twin = feed("http://x/feed");
        h.cache.insert(f.id);
        h.cache.insert(twin.id);

        h.scheduler.start(&f);
        h.scheduler.start(&f);
        h.scheduler.start(&twin);
        assert_eq!(h.scheduler.task_count(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        // One immediate fetch per live task; the replaced task was aborted before running
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 2);

        h.scheduler.shutdown();
        assert_eq!(h.scheduler.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_slot_removed() {
        let h = harness(MockSource::serving(rss(&["a"])), Duration::from_secs(60));
        let f = feed("http://x/feed");
        h.cache.insert(f.id);
        h.scheduler.start(&f);
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.cache.remove(f.id);
        tokio::time::sleep(Duration::from_secs(600)).await;
        // The tick after removal finds no slot and ends the loop without fetching
        assert_eq!(h.source.direct_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_published() {
        let (tx, mut rx) = mpsc::channel(8);
        let source = Arc::new(MockSource::serving(rss(&["a"])));
        let cache = Arc::new(ItemCache::new());
        let scheduler = RefreshScheduler::new(
            source,
            cache.clone(),
            Arc::new(UnreadTracker::new()),
            DEFAULT_REFRESH_INTERVAL,
            Some(tx),
        );
        let f = feed("http://x/feed");
        cache.insert(f.id);

        scheduler.refresh_now(&f).await.unwrap();
        assert_eq!(rx.recv().await, Some(RefreshEvent::Started { feed_id: f.id }));
        assert_eq!(
            rx.recv().await,
            Some(RefreshEvent::Succeeded {
                feed_id: f.id,
                items: 1,
                skipped: 0,
                via_proxy: false,
            })
        );
    }
}
