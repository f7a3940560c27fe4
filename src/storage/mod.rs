//! Durable state: a small SQLite key-value store and the snapshot codec on top.
//!
//! The store knows nothing about feeds; it maps string keys to string values.
//! [`snapshot`] decides what goes under which key and how to read it back.

mod kv;
mod schema;
pub mod snapshot;
mod types;

use async_trait::async_trait;

pub use schema::Database;
pub use snapshot::{load_snapshot, save_snapshot, Snapshot};
pub use types::DatabaseError;

/// String-keyed snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    async fn persist(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    /// Write every entry in one transaction.
    async fn persist_all(&self, entries: &[(&str, String)]) -> Result<(), DatabaseError>;
}

#[async_trait]
impl SnapshotStore for Database {
    async fn load(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        self.get_value(key).await
    }

    async fn persist(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.set_value(key, value).await
    }

    async fn persist_all(&self, entries: &[(&str, String)]) -> Result<(), DatabaseError> {
        self.set_values(entries).await
    }
}
