//! Fetching, parsing and periodic refresh of individual feeds.
//!
//! - [`parser`] turns raw RSS/Atom bytes into an ordered list of [`FeedItem`]s
//! - [`fetcher`] defines the [`FeedSource`] seam and its HTTP implementation,
//!   including the proxy fallback path
//! - [`scheduler`] runs one recurring refresh task per feed and writes the
//!   outcome into the item cache
//!
//! A refresh tries the direct path first. Any transport failure triggers
//! exactly one attempt through the proxy; a document that is not a feed is
//! reported as-is, since the proxy would return the same bytes.

pub mod fetcher;
pub mod parser;
pub mod scheduler;

pub use fetcher::{FeedSource, FetchError, HttpFetcher};
pub use parser::{parse_items, FeedItem, FormatError, ParseResult};
pub use scheduler::{RefreshError, RefreshEvent, RefreshScheduler, DEFAULT_REFRESH_INTERVAL};
