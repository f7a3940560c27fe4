use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // Key-Value Operations
    // ========================================================================

    /// Get a single value by key, or `None` if the key was never written.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a value (UPSERT), refreshing its timestamp.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(UPSERT).bind(key).bind(value).execute(&self.pool).await?;
        Ok(())
    }

    /// Write several entries atomically: either all land or none do.
    pub async fn set_values(&self, entries: &[(&str, String)]) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(UPSERT)
                .bind(*key)
                .bind(value.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

const UPSERT: &str = r#"
    INSERT INTO kv_store (key, value, updated_at)
    VALUES (?, ?, datetime('now'))
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_value_missing() {
        let db = test_db().await;
        assert_eq!(db.get_value("rssFeeds").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_value_upsert() {
        let db = test_db().await;
        db.set_value("readItems", "[]").await.unwrap();
        db.set_value("readItems", "[\"a\"]").await.unwrap();

        let value = db.get_value("readItems").await.unwrap();
        assert_eq!(value.as_deref(), Some("[\"a\"]"));
    }

    #[tokio::test]
    async fn test_set_values_writes_all() {
        let db = test_db().await;
        db.set_values(&[("a", "1".to_string()), ("b", "2".to_string())])
            .await
            .unwrap();

        assert_eq!(db.get_value("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(db.get_value("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_set_value_records_timestamp() {
        let db = test_db().await;
        db.set_value("test.key", "value1").await.unwrap();

        let (updated_at,): (String,) =
            sqlx::query_as("SELECT updated_at FROM kv_store WHERE key = ?")
                .bind("test.key")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert!(!updated_at.is_empty());
    }
}
