use super::{clean_name, Direction, Feed, FeedId, FolderId, SourceRegistry, ValidationError};

impl SourceRegistry {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a new source.
    ///
    /// The URL is trimmed and must be non-empty. A missing or blank display
    /// name defaults to `"Feed N"` where N is the feed count after insertion.
    /// The feed lands at the end of the "no folder" group and becomes the
    /// current selection.
    pub fn add_feed(
        &mut self,
        source_url: &str,
        display_name: Option<&str>,
    ) -> Result<Feed, ValidationError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let display_name = display_name
            .map(clean_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Feed {}", self.feeds.len() + 1));

        let mut feed = Feed {
            id: FeedId::new(),
            source_url: source_url.to_owned(),
            display_name,
            folder_id: None,
            sibling_index: 0,
        };
        feed.sibling_index = self.feeds.append(feed.clone());
        self.selected = Some(feed.id);

        tracing::debug!(feed_id = %feed.id, url = %feed.source_url, index = feed.sibling_index, "Feed added");
        Ok(feed)
    }

    /// Unsubscribe. Unknown ids are a no-op and return `None`.
    ///
    /// Clears the selection when it pointed at the removed feed.
    pub fn remove_feed(&mut self, id: FeedId) -> Option<Feed> {
        let Some(removed) = self.feeds.remove(id) else {
            tracing::debug!(feed_id = %id, "remove_feed: unknown feed, ignoring");
            return None;
        };
        if self.selected == Some(id) {
            self.selected = None;
        }
        Some(removed)
    }

    /// Swap a feed with its neighbour inside its current group.
    ///
    /// Returns `false` when nothing moved (unknown id or already at the edge).
    pub fn move_feed(&mut self, id: FeedId, direction: Direction) -> bool {
        let moved = self.feeds.shift(id, direction);
        if !moved {
            tracing::debug!(feed_id = %id, ?direction, "move_feed: no-op");
        }
        moved
    }

    /// Move a feed to the end of `folder_id`'s group (`None` = "no folder").
    ///
    /// No-op when the feed or the target folder is unknown. Moving into the
    /// group the feed already occupies still reindexes, sending it to the end.
    pub fn reparent_feed(&mut self, id: FeedId, folder_id: Option<FolderId>) -> bool {
        if let Some(target) = folder_id {
            if !self.folders.contains(target) {
                tracing::debug!(feed_id = %id, folder_id = %target, "reparent_feed: unknown folder, ignoring");
                return false;
            }
        }
        let moved = self.feeds.move_to_group(id, folder_id);
        if !moved {
            tracing::debug!(feed_id = %id, "reparent_feed: unknown feed, ignoring");
        }
        moved
    }

    /// Look up a feed and record it as the current selection.
    ///
    /// Unknown ids return `None` and leave the selection as it was.
    pub fn select(&mut self, id: FeedId) -> Option<Feed> {
        let feed = self.feeds.get(id).cloned()?;
        self.selected = Some(id);
        Some(feed)
    }

    pub fn selected(&self) -> Option<&Feed> {
        self.selected.and_then(|id| self.feeds.get(id))
    }

    pub fn feed(&self, id: FeedId) -> Option<&Feed> {
        self.feeds.get(id)
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Feeds of one group ordered by sibling index (`None` = "no folder").
    pub fn feeds_in(&self, folder_id: Option<FolderId>) -> Vec<&Feed> {
        self.feeds.group(folder_id)
    }

    /// Every feed: "no folder" group first, then each folder's feeds in folder order.
    pub fn feeds_ordered(&self) -> Vec<&Feed> {
        let mut out = self.feeds.group(None);
        for folder in self.folders.group(()) {
            out.extend(self.feeds.group(Some(folder.id)));
        }
        out
    }

    /// Feeds in stored (insertion) order.
    pub fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.feeds.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::registry::{Direction, FeedId, SourceRegistry, ValidationError};
    use pretty_assertions::assert_eq;

    fn names(registry: &SourceRegistry, folder: Option<crate::registry::FolderId>) -> Vec<String> {
        registry
            .feeds_in(folder)
            .iter()
            .map(|f| f.display_name.clone())
            .collect()
    }

    #[test]
    fn test_add_feed_appends_to_no_folder() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://x/feed", Some("A")).unwrap();
        let b = registry.add_feed("http://y/feed", None).unwrap();

        assert_eq!(a.sibling_index, 0);
        assert_eq!(a.folder_id, None);
        assert_eq!(b.sibling_index, 1);
        assert_eq!(b.display_name, "Feed 2");
        assert_eq!(registry.selected().map(|f| f.id), Some(b.id));
    }

    #[test]
    fn test_add_feed_rejects_blank_url() {
        let mut registry = SourceRegistry::new();
        assert_eq!(
            registry.add_feed("   ", Some("Nope")),
            Err(ValidationError::EmptyUrl)
        );
        assert_eq!(registry.feed_count(), 0);
    }

    #[test]
    fn test_add_feed_trims_url_and_cleans_name() {
        let mut registry = SourceRegistry::new();
        let feed = registry
            .add_feed("  http://x/feed  ", Some("\x1b[31m Red \x1b[0m"))
            .unwrap();
        assert_eq!(feed.source_url, "http://x/feed");
        assert_eq!(feed.display_name, "Red");

        let blank = registry.add_feed("http://y", Some("   ")).unwrap();
        assert_eq!(blank.display_name, "Feed 2");
    }

    #[test]
    fn test_duplicate_urls_are_independent_feeds() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://x/feed", None).unwrap();
        let b = registry.add_feed("http://x/feed", None).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.feed_count(), 2);
    }

    #[test]
    fn test_remove_feed_reindexes_and_clears_selection() {
        let mut registry = SourceRegistry::new();
        registry.add_feed("http://a", Some("A")).unwrap();
        let b = registry.add_feed("http://b", Some("B")).unwrap();
        let c = registry.add_feed("http://c", Some("C")).unwrap();

        registry.select(b.id).unwrap();
        assert!(registry.remove_feed(b.id).is_some());

        assert_eq!(names(&registry, None), vec!["A", "C"]);
        assert_eq!(registry.feed(c.id).unwrap().sibling_index, 1);
        assert!(registry.selected().is_none());
    }

    #[test]
    fn test_remove_unknown_feed_is_noop() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://a", Some("A")).unwrap();
        assert!(registry.remove_feed(FeedId::new()).is_none());
        assert_eq!(registry.selected().map(|f| f.id), Some(a.id));
        assert_eq!(registry.feed_count(), 1);
    }

    #[test]
    fn test_move_feed_boundaries_are_noops() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://a", Some("A")).unwrap();
        let b = registry.add_feed("http://b", Some("B")).unwrap();

        assert!(!registry.move_feed(a.id, Direction::Up));
        assert!(!registry.move_feed(b.id, Direction::Down));
        assert_eq!(names(&registry, None), vec!["A", "B"]);

        assert!(registry.move_feed(b.id, Direction::Up));
        assert_eq!(names(&registry, None), vec!["B", "A"]);
    }

    #[test]
    fn test_reparent_to_unknown_folder_is_noop() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://a", Some("A")).unwrap();
        assert!(!registry.reparent_feed(a.id, Some(crate::registry::FolderId::new())));
        assert_eq!(registry.feed(a.id).unwrap().folder_id, None);
        assert!(!registry.reparent_feed(FeedId::new(), None));
    }

    #[test]
    fn test_reparent_round_trip_preserves_relative_order() {
        let mut registry = SourceRegistry::new();
        let tech = registry.add_folder("Tech").unwrap().id;
        let news = registry.add_folder("News").unwrap().id;
        let mut in_tech = Vec::new();
        for name in ["T1", "T2", "T3"] {
            let f = registry.add_feed("http://t", Some(name)).unwrap();
            registry.reparent_feed(f.id, Some(tech));
            in_tech.push(f.id);
        }
        for name in ["N1", "N2"] {
            let f = registry.add_feed("http://n", Some(name)).unwrap();
            registry.reparent_feed(f.id, Some(news));
        }

        let moved = in_tech[1];
        registry.reparent_feed(moved, Some(news));
        registry.reparent_feed(moved, Some(tech));

        let tech_others: Vec<String> = registry
            .feeds_in(Some(tech))
            .iter()
            .filter(|f| f.id != moved)
            .map(|f| f.display_name.clone())
            .collect();
        assert_eq!(tech_others, vec!["T1", "T3"]);
        assert_eq!(names(&registry, Some(news)), vec!["N1", "N2"]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_select_unknown_keeps_selection() {
        let mut registry = SourceRegistry::new();
        let a = registry.add_feed("http://a", None).unwrap();
        assert!(registry.select(FeedId::new()).is_none());
        assert_eq!(registry.selected().map(|f| f.id), Some(a.id));
    }

    #[test]
    fn test_feeds_ordered_lists_unfiled_then_folders() {
        let mut registry = SourceRegistry::new();
        let f1 = registry.add_folder("One").unwrap().id;
        let f2 = registry.add_folder("Two").unwrap().id;
        let a = registry.add_feed("http://a", Some("A")).unwrap();
        let b = registry.add_feed("http://b", Some("B")).unwrap();
        registry.add_feed("http://c", Some("C")).unwrap();
        registry.reparent_feed(a.id, Some(f2));
        registry.reparent_feed(b.id, Some(f1));

        let order: Vec<&str> = registry
            .feeds_ordered()
            .iter()
            .map(|f| f.display_name.as_str())
            .collect();
        assert_eq!(order, vec!["C", "B", "A"]);
    }
}
