use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser;
use thiserror::Error;

use crate::util::strip_control_chars;

/// Content was not recognisable as an RSS or Atom document.
#[derive(Debug, Error)]
#[error("Unrecognized feed format: {0}")]
pub struct FormatError(String);

/// One entry of a fetched feed, identified by its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub link: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// Item with only a link; handy for callers that synthesise lists.
    pub fn with_link(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: None,
            description: None,
            published_at: None,
        }
    }
}

/// Items in document order plus the number of entries dropped for lacking a link.
#[derive(Debug)]
pub struct ParseResult {
    pub items: Vec<FeedItem>,
    pub skipped: usize,
}

/// The entry's identity: the first `alternate` (or rel-less) link, else any
/// non-empty link.
fn item_link(links: &[Link]) -> Option<String> {
    let usable = || links.iter().filter(|l| !l.href.trim().is_empty());
    usable()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| usable().next())
        .map(|l| l.href.trim().to_owned())
}

/// Turn raw RSS/Atom bytes into the ordered item list.
///
/// An empty channel is a valid, empty list. Entries without a usable link
/// have no identity for read tracking and are skipped.
pub fn parse_items(bytes: &[u8]) -> Result<ParseResult, FormatError> {
    let feed = parser::parse(bytes).map_err(|e| FormatError(e.to_string()))?;

    let mut skipped = 0;
    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let Some(link) = item_link(&entry.links) else {
                skipped += 1;
                return None;
            };

            let title = entry
                .title
                .map(|t| strip_control_chars(&t.content).trim().to_owned())
                .filter(|t| !t.is_empty());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));

            Some(FeedItem {
                link,
                title,
                description,
                published_at: entry.published.or(entry.updated),
            })
        })
        .collect();

    Ok(ParseResult { items, skipped })
}
