use super::{clean_name, Direction, Folder, FolderId, SourceRegistry, ValidationError};

impl SourceRegistry {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Create a folder at the end of the folder list.
    pub fn add_folder(&mut self, display_name: &str) -> Result<Folder, ValidationError> {
        let display_name = clean_name(display_name);
        if display_name.is_empty() {
            return Err(ValidationError::EmptyFolderName);
        }

        let mut folder = Folder {
            id: FolderId::new(),
            display_name,
            sibling_index: 0,
        };
        folder.sibling_index = self.folders.append(folder.clone());
        tracing::debug!(folder_id = %folder.id, index = folder.sibling_index, "Folder added");
        Ok(folder)
    }

    /// Delete a folder. Its feeds are kept and moved to the end of the
    /// "no folder" group in their previous relative order.
    pub fn remove_folder(&mut self, id: FolderId) -> Option<Folder> {
        if !self.folders.contains(id) {
            tracing::debug!(folder_id = %id, "remove_folder: unknown folder, ignoring");
            return None;
        }

        let children: Vec<_> = self.feeds.group(Some(id)).iter().map(|f| f.id).collect();
        for feed_id in &children {
            self.feeds.move_to_group(*feed_id, None);
        }
        // Both groups were reindexed per move; repeat once for the empty-folder case
        self.feeds.reindex(Some(id));
        self.feeds.reindex(None);

        self.expanded.remove(&id);
        let removed = self.folders.remove(id);
        tracing::debug!(folder_id = %id, reparented = children.len(), "Folder removed");
        removed
    }

    /// Swap a folder with its neighbour. Returns `false` when nothing moved.
    pub fn move_folder(&mut self, id: FolderId, direction: Direction) -> bool {
        let moved = self.folders.shift(id, direction);
        if !moved {
            tracing::debug!(folder_id = %id, ?direction, "move_folder: no-op");
        }
        moved
    }

    /// Flip a folder between expanded and collapsed. Returns the new state,
    /// or `None` for an unknown folder.
    pub fn toggle_folder(&mut self, id: FolderId) -> Option<bool> {
        if !self.folders.contains(id) {
            return None;
        }
        if self.expanded.remove(&id) {
            Some(false)
        } else {
            self.expanded.insert(id);
            Some(true)
        }
    }

    pub fn is_expanded(&self, id: FolderId) -> bool {
        self.expanded.contains(&id)
    }

    /// Expanded folders in folder order.
    pub fn expanded_folders(&self) -> Vec<FolderId> {
        self.folders
            .group(())
            .into_iter()
            .map(|f| f.id)
            .filter(|id| self.expanded.contains(id))
            .collect()
    }

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(id)
    }

    /// All folders ordered by sibling index.
    pub fn folders(&self) -> Vec<&Folder> {
        self.folders.group(())
    }
}
