//! Feed and folder hierarchy with stable sibling ordering.
//!
//! The registry owns every [`Feed`] and [`Folder`], the two-level hierarchy
//! between them (feeds optionally live in one flat folder), the expanded
//! state of folders and the current selection. All ordering goes through
//! [`OrderedSet`], which keeps indices dense inside each sibling group.
//!
//! - [`feeds`] - add/remove/move/reparent/select for feeds
//! - [`folders`] - add/remove/move/toggle for folders
//! - [`ordered`] - the sibling-ordering primitive

mod feeds;
mod folders;
mod ordered;

pub use ordered::{Direction, OrderedSet, Sibling};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::util::strip_control_chars;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque feed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(Uuid);

/// Opaque folder identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(Uuid);

macro_rules! opaque_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

opaque_id!(FeedId);
opaque_id!(FolderId);

// ============================================================================
// Error Types
// ============================================================================

/// Required input was empty. The command that produced it changed nothing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Feed URL cannot be empty")]
    EmptyUrl,
    #[error("Folder name cannot be empty")]
    EmptyFolderName,
}

/// Lookup failures when resolving user-supplied ids.
///
/// Structural mutations never return these; an unknown id there is a no-op.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No feed matches '{0}'")]
    FeedNotFound(String),
    #[error("No folder matches '{0}'")]
    FolderNotFound(String),
    #[error("'{0}' matches more than one entry, use a longer prefix")]
    Ambiguous(String),
}

// ============================================================================
// Entities
// ============================================================================

/// A subscribed content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: FeedId,
    pub source_url: String,
    pub display_name: String,
    /// `None` places the feed in the "no folder" group.
    pub folder_id: Option<FolderId>,
    pub sibling_index: usize,
}

impl Sibling for Feed {
    type Id = FeedId;
    type Group = Option<FolderId>;

    fn id(&self) -> FeedId {
        self.id
    }
    fn group(&self) -> Option<FolderId> {
        self.folder_id
    }
    fn set_group(&mut self, group: Option<FolderId>) {
        self.folder_id = group;
    }
    fn sibling_index(&self) -> usize {
        self.sibling_index
    }
    fn set_sibling_index(&mut self, index: usize) {
        self.sibling_index = index;
    }
}

/// A named, flat grouping of feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub display_name: String,
    pub sibling_index: usize,
}

impl Sibling for Folder {
    type Id = FolderId;
    type Group = ();

    fn id(&self) -> FolderId {
        self.id
    }
    fn group(&self) {}
    fn set_group(&mut self, _group: ()) {}
    fn sibling_index(&self) -> usize {
        self.sibling_index
    }
    fn set_sibling_index(&mut self, index: usize) {
        self.sibling_index = index;
    }
}

// ============================================================================
// SourceRegistry
// ============================================================================

/// Owner of feed/folder identity and hierarchy.
///
/// Not internally synchronised: the application wraps it in a mutex so that
/// structural mutations run one at a time.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    feeds: OrderedSet<Feed>,
    folders: OrderedSet<Folder>,
    expanded: HashSet<FolderId>,
    selected: Option<FeedId>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from previously stored entities.
    ///
    /// Feeds pointing at folders that no longer exist fall back to "no folder",
    /// then every group is normalised to dense indices (stored order breaks ties).
    pub fn from_parts(
        folders: Vec<Folder>,
        mut feeds: Vec<Feed>,
        expanded: impl IntoIterator<Item = FolderId>,
        selected: Option<FeedId>,
    ) -> Self {
        let folders = OrderedSet::from_members(folders);
        let mut orphaned = Vec::new();
        for feed in &mut feeds {
            if let Some(folder_id) = feed.folder_id {
                if !folders.contains(folder_id) {
                    // Land after every feed already in "no folder"
                    feed.folder_id = None;
                    feed.sibling_index = usize::MAX;
                    orphaned.push(feed.id);
                }
            }
        }
        if !orphaned.is_empty() {
            tracing::warn!(
                count = orphaned.len(),
                "Feeds referenced unknown folders, moved to no folder"
            );
        }

        let feeds = OrderedSet::from_members(feeds);
        let expanded = expanded
            .into_iter()
            .filter(|id| folders.contains(*id))
            .collect();
        let selected = selected
            .filter(|id| feeds.contains(*id))
            .or_else(|| feeds.iter().next().map(|f| f.id));

        Self {
            feeds,
            folders,
            expanded,
            selected,
        }
    }

    /// Every sibling group currently satisfies the dense-index invariant.
    pub fn is_consistent(&self) -> bool {
        self.feeds.is_dense() && self.folders.is_dense()
    }

    /// Resolve a full id or unique id prefix to a feed.
    pub fn resolve_feed(&self, needle: &str) -> Result<FeedId, RegistryError> {
        resolve(self.feeds.iter().map(|f| f.id), needle, |s| {
            RegistryError::FeedNotFound(s.to_string())
        })
    }

    /// Resolve a full id or unique id prefix to a folder.
    pub fn resolve_folder(&self, needle: &str) -> Result<FolderId, RegistryError> {
        resolve(self.folders.iter().map(|f| f.id), needle, |s| {
            RegistryError::FolderNotFound(s.to_string())
        })
    }
}

fn resolve<I, Id>(
    ids: I,
    needle: &str,
    not_found: impl Fn(&str) -> RegistryError,
) -> Result<Id, RegistryError>
where
    I: Iterator<Item = Id>,
    Id: fmt::Display + Copy,
{
    let needle = needle.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return Err(not_found(&needle));
    }
    let mut matches = ids.filter(|id| id.to_string().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(id),
        (Some(_), Some(_)) => Err(RegistryError::Ambiguous(needle)),
        (None, _) => Err(not_found(&needle)),
    }
}

/// Strip control characters and surrounding whitespace from a user-supplied name.
pub(crate) fn clean_name(name: &str) -> String {
    strip_control_chars(name).trim().to_owned()
}
