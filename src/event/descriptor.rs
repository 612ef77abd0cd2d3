//! Event Subscription Descriptors
//!
//! `registerEvent`/`unregisterEvent` persist a named subscription in the
//! Shared Store so that (a) restarts can discover which change-streams to
//! re-establish and (b) `recreateIfExisting` has something to check against.

use sqlx::{MySqlPool, Row};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub event_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
}

pub struct DescriptorStore {
    pool: MySqlPool,
}

impl DescriptorStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_subscriptions (
                event_name VARCHAR(255) NOT NULL PRIMARY KEY,
                table_name VARCHAR(255) NOT NULL,
                columns_json TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, event_name: &str) -> Result<Option<EventDescriptor>> {
        let row = sqlx::query(
            "SELECT event_name, table_name, columns_json FROM event_subscriptions WHERE event_name = ?",
        )
        .bind(event_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => {
                let columns_json: String = row.try_get("columns_json")?;
                let columns: Vec<String> = serde_json::from_str(&columns_json)
                    .map_err(|e| crate::error::Error::Internal(e.to_string()))?;
                Some(EventDescriptor {
                    event_name: row.try_get("event_name")?,
                    table_name: row.try_get("table_name")?,
                    columns,
                })
            }
            None => None,
        })
    }

    /// Idempotent create; returns whether a new descriptor was written.
    pub async fn register(
        &self,
        event_name: &str,
        table_name: &str,
        columns: &[String],
        recreate_if_existing: bool,
        created_at: i64,
    ) -> Result<bool> {
        let existing = self.fetch(event_name).await?;
        if existing.is_some() && !recreate_if_existing {
            return Ok(false);
        }

        let columns_json = serde_json::to_string(columns)
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;

        sqlx::query(
            "REPLACE INTO event_subscriptions (event_name, table_name, columns_json, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_name)
        .bind(table_name)
        .bind(columns_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    pub async fn unregister(&self, event_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM event_subscriptions WHERE event_name = ?")
            .bind(event_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
