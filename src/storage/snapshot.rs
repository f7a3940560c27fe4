//! Snapshot encoding and tolerant restore.
//!
//! A snapshot is spread over a few keys, each holding one JSON value:
//!
//! | key               | value                                              |
//! |-------------------|----------------------------------------------------|
//! | `rssFeeds`        | `[{id, url, name, folderId?, index}]`              |
//! | `rssFolders`      | `[{id, name, index}]`                              |
//! | `readItems`       | `["link", ...]`                                    |
//! | `unreadCounts`    | `{"<feed id>": n}`                                 |
//! | `expandedFolders` | `["<folder id>", ...]`                             |
//! | `selectedFeed`    | `"<feed id>"` or `null`                            |
//!
//! Restoring never fails on content. A key holding malformed JSON is treated
//! as absent, a malformed entry inside a list is dropped, and older snapshots
//! without `index` fields get their stored position instead. Ids that are
//! missing, unparseable or duplicated are replaced with fresh ones; references
//! written with the old id still resolve within the same snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{DatabaseError, SnapshotStore};
use crate::cache::ItemCache;
use crate::registry::{clean_name, Feed, FeedId, Folder, FolderId, SourceRegistry};
use crate::unread::UnreadTracker;

pub const FEEDS_KEY: &str = "rssFeeds";
pub const FOLDERS_KEY: &str = "rssFolders";
pub const READ_ITEMS_KEY: &str = "readItems";
pub const UNREAD_COUNTS_KEY: &str = "unreadCounts";
pub const EXPANDED_KEY: &str = "expandedFolders";
pub const SELECTED_KEY: &str = "selectedFeed";

const ALL_KEYS: [&str; 6] = [
    FEEDS_KEY,
    FOLDERS_KEY,
    READ_ITEMS_KEY,
    UNREAD_COUNTS_KEY,
    EXPANDED_KEY,
    SELECTED_KEY,
];

/// Everything needed to rebuild the registry and read state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub folders: Vec<Folder>,
    pub feeds: Vec<Feed>,
    pub read_links: Vec<String>,
    pub unread_counts: HashMap<FeedId, usize>,
    pub expanded: Vec<FolderId>,
    pub selected: Option<FeedId>,
}

// ============================================================================
// Stored record shapes
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedRecord<'a> {
    id: String,
    url: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<String>,
    index: usize,
}

#[derive(Serialize)]
struct FolderRecord<'a> {
    id: String,
    name: &'a str,
    index: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredFeed {
    #[serde(default)]
    id: Option<Value>,
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    folder_id: Option<Value>,
    #[serde(default)]
    index: Option<Value>,
}

#[derive(Deserialize)]
struct StoredFolder {
    #[serde(default)]
    id: Option<Value>,
    name: String,
    #[serde(default)]
    index: Option<Value>,
}

// ============================================================================
// Capture / encode
// ============================================================================

impl Snapshot {
    /// Copy the current state. Counts are the derived values at this moment.
    pub fn capture(registry: &SourceRegistry, tracker: &UnreadTracker, cache: &ItemCache) -> Self {
        Self {
            folders: registry.folders().into_iter().cloned().collect(),
            feeds: registry.feeds_ordered().into_iter().cloned().collect(),
            read_links: tracker.read_links(),
            unread_counts: tracker.counts(registry, cache),
            expanded: registry.expanded_folders(),
            selected: registry.selected().map(|f| f.id),
        }
    }

    /// One `(key, json)` pair per stored key.
    pub fn encode(&self) -> Result<Vec<(&'static str, String)>, DatabaseError> {
        let feeds: Vec<FeedRecord<'_>> = self
            .feeds
            .iter()
            .map(|f| FeedRecord {
                id: f.id.to_string(),
                url: &f.source_url,
                name: &f.display_name,
                folder_id: f.folder_id.map(|id| id.to_string()),
                index: f.sibling_index,
            })
            .collect();
        let folders: Vec<FolderRecord<'_>> = self
            .folders
            .iter()
            .map(|f| FolderRecord {
                id: f.id.to_string(),
                name: &f.display_name,
                index: f.sibling_index,
            })
            .collect();
        // BTreeMap keeps the stored object stable between saves
        let counts: std::collections::BTreeMap<String, usize> = self
            .unread_counts
            .iter()
            .map(|(id, n)| (id.to_string(), *n))
            .collect();
        let expanded: Vec<String> = self.expanded.iter().map(ToString::to_string).collect();
        let selected = self.selected.map(|id| id.to_string());

        Ok(vec![
            (FEEDS_KEY, to_json(FEEDS_KEY, &feeds)?),
            (FOLDERS_KEY, to_json(FOLDERS_KEY, &folders)?),
            (READ_ITEMS_KEY, to_json(READ_ITEMS_KEY, &self.read_links)?),
            (UNREAD_COUNTS_KEY, to_json(UNREAD_COUNTS_KEY, &counts)?),
            (EXPANDED_KEY, to_json(EXPANDED_KEY, &expanded)?),
            (SELECTED_KEY, to_json(SELECTED_KEY, &selected)?),
        ])
    }

    /// Rebuild live state from this snapshot.
    pub fn restore(self) -> (SourceRegistry, UnreadTracker) {
        let registry = SourceRegistry::from_parts(
            self.folders,
            self.feeds,
            self.expanded,
            self.selected,
        );
        let seeds = self
            .unread_counts
            .into_iter()
            .filter(|(id, _)| registry.feed(*id).is_some())
            .collect();
        let tracker = UnreadTracker::restore(self.read_links, seeds);
        (registry, tracker)
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(
    key: &'static str,
    value: &T,
) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::Encode { key, source })
}

// ============================================================================
// Decode
// ============================================================================

/// Stored ids mapped to the ids used after restore.
#[derive(Default)]
struct IdTable {
    by_key: HashMap<String, Uuid>,
    used: HashSet<Uuid>,
}

impl IdTable {
    fn assign(&mut self, raw: Option<&Value>) -> Uuid {
        let key = raw.and_then(id_key);
        let id = key
            .as_deref()
            .and_then(|k| Uuid::parse_str(k).ok())
            .filter(|id| !self.used.contains(id))
            .unwrap_or_else(Uuid::new_v4);
        self.used.insert(id);
        if let Some(key) = key {
            self.by_key.entry(key).or_insert(id);
        }
        id
    }

    fn lookup(&self, raw: &Value) -> Option<Uuid> {
        id_key(raw).and_then(|k| self.by_key.get(&k).copied())
    }
}

fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_ascii_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn stored_index(raw: Option<&Value>, position: usize) -> usize {
    raw.and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .unwrap_or(position)
}

fn parse_key(entries: &HashMap<String, String>, key: &str) -> Option<Value> {
    let raw = entries.get(key)?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Malformed stored value, ignoring");
            None
        }
    }
}

fn parse_list(entries: &HashMap<String, String>, key: &str) -> Vec<Value> {
    match parse_key(entries, key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            tracing::warn!(key = %key, "Stored value is not a list, ignoring");
            Vec::new()
        }
    }
}

impl Snapshot {
    /// Decode raw stored values. Never fails; see the module docs for the rules.
    pub fn decode(entries: &HashMap<String, String>) -> Self {
        let mut folder_ids = IdTable::default();
        let mut folders = Vec::new();
        for (position, value) in parse_list(entries, FOLDERS_KEY).into_iter().enumerate() {
            let stored: StoredFolder = match serde_json::from_value(value) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(position, error = %e, "Dropping malformed stored folder");
                    continue;
                }
            };
            let name = clean_name(&stored.name);
            if name.is_empty() {
                tracing::warn!(position, "Dropping stored folder with empty name");
                continue;
            }
            folders.push(Folder {
                id: FolderId::from(folder_ids.assign(stored.id.as_ref())),
                display_name: name,
                sibling_index: stored_index(stored.index.as_ref(), position),
            });
        }

        let mut feed_ids = IdTable::default();
        let mut feeds = Vec::new();
        for (position, value) in parse_list(entries, FEEDS_KEY).into_iter().enumerate() {
            let stored: StoredFeed = match serde_json::from_value(value) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(position, error = %e, "Dropping malformed stored feed");
                    continue;
                }
            };
            let url = stored.url.trim();
            if url.is_empty() {
                tracing::warn!(position, "Dropping stored feed with empty URL");
                continue;
            }
            let name = stored
                .name
                .as_deref()
                .map(clean_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Feed {}", feeds.len() + 1));
            // An id that matches no stored folder becomes "no folder" in from_parts
            let folder_id = match stored.folder_id.as_ref() {
                None | Some(Value::Null) => None,
                Some(raw) => Some(FolderId::from(
                    folder_ids.lookup(raw).unwrap_or_else(Uuid::new_v4),
                )),
            };
            feeds.push(Feed {
                id: FeedId::from(feed_ids.assign(stored.id.as_ref())),
                source_url: url.to_string(),
                display_name: name,
                folder_id,
                sibling_index: stored_index(stored.index.as_ref(), position),
            });
        }

        let read_links = parse_list(entries, READ_ITEMS_KEY)
            .into_iter()
            .filter_map(|v| match v {
                Value::String(link) if !link.is_empty() => Some(link),
                _ => None,
            })
            .collect();

        let unread_counts = match parse_key(entries, UNREAD_COUNTS_KEY) {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(key, n)| {
                    let id = feed_ids.lookup(&Value::String(key))?;
                    let n = usize::try_from(n.as_u64()?).ok()?;
                    Some((FeedId::from(id), n))
                })
                .collect(),
            _ => HashMap::new(),
        };

        let expanded = parse_list(entries, EXPANDED_KEY)
            .iter()
            .filter_map(|v| folder_ids.lookup(v).map(FolderId::from))
            .collect();

        let selected = parse_key(entries, SELECTED_KEY)
            .and_then(|v| feed_ids.lookup(&v))
            .map(FeedId::from);

        Self {
            folders,
            feeds,
            read_links,
            unread_counts,
            expanded,
            selected,
        }
    }
}

// ============================================================================
// Store round trip
// ============================================================================

/// Persist every snapshot key in one transaction.
pub async fn save_snapshot(
    store: &dyn SnapshotStore,
    snapshot: &Snapshot,
) -> Result<(), DatabaseError> {
    let entries = snapshot.encode()?;
    store.persist_all(&entries).await?;
    tracing::debug!(
        feeds = snapshot.feeds.len(),
        folders = snapshot.folders.len(),
        read = snapshot.read_links.len(),
        "Saved snapshot"
    );
    Ok(())
}

/// Read every snapshot key. Only store failures are errors; content is decoded tolerantly.
pub async fn load_snapshot(store: &dyn SnapshotStore) -> Result<Snapshot, DatabaseError> {
    let mut entries = HashMap::new();
    for key in ALL_KEYS {
        if let Some(value) = store.load(key).await? {
            entries.insert(key.to_string(), value);
        }
    }
    Ok(Snapshot::decode(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use crate::storage::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entries(pairs: &[(&str, Value)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names_in(registry: &SourceRegistry, folder: Option<FolderId>) -> Vec<String> {
        registry
            .feeds_in(folder)
            .iter()
            .map(|f| f.display_name.clone())
            .collect()
    }

    fn sample_state() -> (SourceRegistry, UnreadTracker, ItemCache) {
        let mut registry = SourceRegistry::new();
        let tech = registry.add_folder("Tech").unwrap().id;
        registry.add_folder("News").unwrap();
        let a = registry.add_feed("http://a/feed", Some("A")).unwrap().id;
        let b = registry.add_feed("http://b/feed", Some("B")).unwrap().id;
        registry.reparent_feed(a, Some(tech));
        registry.toggle_folder(tech);
        registry.select(b);

        let cache = ItemCache::new();
        let tracker = UnreadTracker::new();
        cache.insert(a);
        cache.insert(b);
        cache.store_items(a, vec![FeedItem::with_link("x"), FeedItem::with_link("y")]);
        tracker.mark_read("x");
        (registry, tracker, cache)
    }

    #[test]
    fn test_stored_layout() {
        let (registry, tracker, cache) = sample_state();
        let snapshot = Snapshot::capture(&registry, &tracker, &cache);
        let encoded: HashMap<&str, Value> = snapshot
            .encode()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k, serde_json::from_str(&v).unwrap()))
            .collect();

        let tech = registry.folders()[0].id.to_string();
        let a = registry.feeds_in(Some(registry.folders()[0].id))[0].id.to_string();
        let b = registry.feeds_in(None)[0].id.to_string();

        assert_eq!(
            encoded[FEEDS_KEY],
            json!([
                {"id": b, "url": "http://b/feed", "name": "B", "index": 0},
                {"id": a, "url": "http://a/feed", "name": "A", "folderId": tech, "index": 0},
            ])
        );
        assert_eq!(encoded[FOLDERS_KEY][0], json!({"id": tech, "name": "Tech", "index": 0}));
        assert_eq!(encoded[READ_ITEMS_KEY], json!(["x"]));
        assert_eq!(encoded[UNREAD_COUNTS_KEY], json!({ a.clone(): 1, b.clone(): 0 }));
        assert_eq!(encoded[EXPANDED_KEY], json!([tech]));
        assert_eq!(encoded[SELECTED_KEY], json!(b));
    }

    #[test]
    fn test_capture_decode_restore() {
        let (registry, tracker, cache) = sample_state();
        let snapshot = Snapshot::capture(&registry, &tracker, &cache);
        let stored: HashMap<String, String> = snapshot
            .encode()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let decoded = Snapshot::decode(&stored);
        assert_eq!(decoded, snapshot);

        let (restored, restored_tracker) = decoded.restore();
        assert!(restored.is_consistent());
        assert_eq!(restored.feeds_ordered(), registry.feeds_ordered());
        assert_eq!(restored.folders(), registry.folders());
        assert_eq!(restored.selected().map(|f| f.id), registry.selected().map(|f| f.id));
        assert!(restored.is_expanded(registry.folders()[0].id));
        assert!(restored_tracker.is_read("x"));

        // Seeds stand in until the first fetch
        let fresh_cache = ItemCache::new();
        let a = registry.feeds_in(Some(registry.folders()[0].id))[0].id;
        fresh_cache.insert(a);
        assert_eq!(restored_tracker.count_for_feed(&fresh_cache, a), 1);
    }

    #[test]
    fn test_missing_index_uses_stored_position() {
        let stored = entries(&[
            (
                FOLDERS_KEY,
                json!([{"id": "f1", "name": "One"}, {"id": "f2", "name": "Two"}]),
            ),
            (
                FEEDS_KEY,
                json!([
                    {"id": "1", "url": "http://1", "name": "first"},
                    {"id": "2", "url": "http://2", "name": "second", "folderId": "f2"},
                    {"id": "3", "url": "http://3", "name": "third"},
                ]),
            ),
        ]);

        let (registry, _) = Snapshot::decode(&stored).restore();
        assert!(registry.is_consistent());
        let folders: Vec<&str> = registry
            .folders()
            .iter()
            .map(|f| f.display_name.as_str())
            .collect();
        assert_eq!(folders, vec!["One", "Two"]);
        assert_eq!(names_in(&registry, None), vec!["first", "third"]);
        assert_eq!(names_in(&registry, Some(registry.folders()[1].id)), vec!["second"]);
        assert_eq!(registry.selected().unwrap().display_name, "first");
    }

    #[test]
    fn test_malformed_entries_dropped() {
        let stored = entries(&[
            (
                FEEDS_KEY,
                json!([
                    {"url": "http://ok", "name": "ok"},
                    {"name": "no url"},
                    42,
                    {"url": "   ", "name": "blank"},
                    {"url": "http://ok2", "index": -3},
                ]),
            ),
            (FOLDERS_KEY, json!([{"id": "x"}, {"name": "Real"}])),
            (READ_ITEMS_KEY, json!(["a", 7, null, "b"])),
        ]);

        let snapshot = Snapshot::decode(&stored);
        assert_eq!(snapshot.feeds.len(), 2);
        assert_eq!(snapshot.feeds[1].display_name, "Feed 2");
        assert_eq!(snapshot.feeds[1].sibling_index, 4);
        assert_eq!(snapshot.folders.len(), 1);
        assert_eq!(snapshot.read_links, vec!["a", "b"]);
        assert_ne!(snapshot.feeds[0].id, snapshot.feeds[1].id);

        let (registry, _) = snapshot.restore();
        assert!(registry.is_consistent());
        assert_eq!(names_in(&registry, None), vec!["ok", "Feed 2"]);
    }

    #[test]
    fn test_malformed_key_treated_as_empty() {
        let mut stored = entries(&[(READ_ITEMS_KEY, json!(["a"]))]);
        stored.insert(FEEDS_KEY.to_string(), "{not json".to_string());
        stored.insert(FOLDERS_KEY.to_string(), "{\"an\": \"object\"}".to_string());

        let snapshot = Snapshot::decode(&stored);
        assert!(snapshot.feeds.is_empty());
        assert!(snapshot.folders.is_empty());
        assert_eq!(snapshot.read_links, vec!["a"]);
    }

    #[test]
    fn test_unknown_folder_moves_feed_to_no_folder() {
        let folder = Uuid::new_v4().to_string();
        let stored = entries(&[
            (FOLDERS_KEY, json!([{"id": folder, "name": "Kept", "index": 0}])),
            (
                FEEDS_KEY,
                json!([
                    {"id": Uuid::new_v4().to_string(), "url": "http://a", "name": "lost", "folderId": "gone", "index": 0},
                    {"id": Uuid::new_v4().to_string(), "url": "http://b", "name": "loose", "index": 0},
                    {"id": Uuid::new_v4().to_string(), "url": "http://c", "name": "kept", "folderId": folder, "index": 0},
                ]),
            ),
        ]);

        let (registry, _) = Snapshot::decode(&stored).restore();
        assert!(registry.is_consistent());
        assert_eq!(names_in(&registry, None), vec!["loose", "lost"]);
        let kept_id: FolderId = folder.parse().unwrap();
        assert_eq!(names_in(&registry, Some(kept_id)), vec!["kept"]);
    }

    #[test]
    fn test_duplicate_indices_resolved_by_stored_order() {
        let stored = entries(&[(
            FEEDS_KEY,
            json!([
                {"url": "http://a", "name": "a", "index": 1},
                {"url": "http://b", "name": "b", "index": 1},
                {"url": "http://c", "name": "c", "index": 0},
            ]),
        )]);

        let (registry, _) = Snapshot::decode(&stored).restore();
        assert_eq!(names_in(&registry, None), vec!["c", "a", "b"]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_duplicate_ids_get_fresh_ones() {
        let id = Uuid::new_v4().to_string();
        let stored = entries(&[(
            FEEDS_KEY,
            json!([
                {"id": id, "url": "http://a"},
                {"id": id, "url": "http://b"},
            ]),
        )]);

        let snapshot = Snapshot::decode(&stored);
        assert_eq!(snapshot.feeds[0].id.to_string(), id);
        assert_ne!(snapshot.feeds[1].id, snapshot.feeds[0].id);
    }

    #[test]
    fn test_counts_for_unknown_feeds_dropped() {
        let id = Uuid::new_v4().to_string();
        let stored = entries(&[
            (FEEDS_KEY, json!([{"id": id, "url": "http://a"}])),
            (
                UNREAD_COUNTS_KEY,
                json!({ id.clone(): 4, "someone-else": 9, "bad": "x" }),
            ),
            (SELECTED_KEY, json!("someone-else")),
        ]);

        let snapshot = Snapshot::decode(&stored);
        assert_eq!(snapshot.unread_counts.len(), 1);
        assert_eq!(snapshot.unread_counts[&snapshot.feeds[0].id], 4);
        assert!(snapshot.selected.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_through_database() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(load_snapshot(&db).await.unwrap(), Snapshot::default());

        let (registry, tracker, cache) = sample_state();
        let snapshot = Snapshot::capture(&registry, &tracker, &cache);
        save_snapshot(&db, &snapshot).await.unwrap();

        assert_eq!(load_snapshot(&db).await.unwrap(), snapshot);
    }
}
