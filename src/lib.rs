//! Feed subscriptions organised in ordered folders, refreshed per feed in the
//! background, with read state tracked by item link.
//!
//! [`app::App`] is the entry point: it restores a saved snapshot, exposes the
//! commands and queries, and persists after every change.

pub mod app;
pub mod cache;
pub mod config;
pub mod feed;
pub mod registry;
pub mod storage;
pub mod unread;
pub mod util;
