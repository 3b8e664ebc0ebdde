//! Durable item storage.
//!
//! The pipeline talks to storage through the [`Repository`] trait so tests
//! can swap in failing or in-memory stores. [`SqliteRepository`] is the
//! production implementation over a `sqlx` SQLite pool.
//!
//! Upserts are keyed by item id and run inside a single transaction per
//! batch: either every item in the batch lands or none does.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::config::DbConfig;
use crate::db;
use crate::migrate;
use crate::models::{Item, Verdict};

/// Row counts written by one [`Repository::upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

/// Read-back filter for [`Repository::list_items`].
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub processed: Option<bool>,
    pub passed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Row counts over the whole `items` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepoStats {
    pub total: i64,
    pub processed: i64,
    pub passed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert new items and update existing ones, all in one transaction.
    async fn upsert(&self, items: &[Item]) -> Result<UpsertOutcome>;

    /// Every stored id. Used as the durable dedup fallback.
    async fn processed_ids(&self) -> Result<HashSet<String>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Item>>;

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>>;

    async fn statistics(&self) -> Result<RepoStats>;

    async fn close(&self);
}

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database and apply migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database {}", config.path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn upsert(&self, items: &[Item]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if items.is_empty() {
            return Ok(outcome);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for item in items {
            let metadata = serde_json::to_string(&item.metadata)?;
            let filter_result = item
                .filter_result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?")
                .bind(&item.id)
                .fetch_optional(&mut *tx)
                .await?;

            if exists.is_some() {
                sqlx::query(
                    r#"
                    UPDATE items
                    SET title = ?, content = ?, metadata = ?, processed = ?, filter_result = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&item.title)
                .bind(&item.content)
                .bind(&metadata)
                .bind(item.processed as i64)
                .bind(&filter_result)
                .bind(&item.id)
                .execute(&mut *tx)
                .await?;
                outcome.updated += 1;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO items (id, title, content, metadata, processed, filter_result, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&item.id)
                .bind(&item.title)
                .bind(&item.content)
                .bind(&metadata)
                .bind(item.processed as i64)
                .bind(&filter_result)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                outcome.inserted += 1;
            }
        }

        // Dropping an uncommitted transaction rolls it back, so any `?` above
        // leaves the table untouched.
        tx.commit().await?;
        Ok(outcome)
    }

    async fn processed_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM items")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Item>> {
        let row = sqlx::query(
            "SELECT id, title, content, metadata, processed, filter_result, created_at FROM items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, metadata, processed, filter_result, created_at
            FROM items
            WHERE (?1 IS NULL OR processed = ?1)
              AND (?2 IS NULL OR json_extract(filter_result, '$.passed') = ?2)
            ORDER BY created_at DESC, id ASC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(filter.processed.map(|p| p as i64))
        .bind(filter.passed.map(|p| p as i64))
        .bind(filter.limit.unwrap_or(-1))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn statistics(&self) -> Result<RepoStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN processed = 1 THEN 1 ELSE 0 END), 0) AS processed,
                COALESCE(SUM(CASE WHEN json_extract(filter_result, '$.passed') = 1 THEN 1 ELSE 0 END), 0) AS passed,
                COALESCE(SUM(CASE WHEN json_extract(filter_result, '$.passed') = 0 THEN 1 ELSE 0 END), 0) AS failed
            FROM items
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RepoStats {
            total: row.get("total"),
            processed: row.get("processed"),
            passed: row.get("passed"),
            failed: row.get("failed"),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let metadata: String = row.get("metadata");
    let filter_result: Option<String> = row.get("filter_result");
    let processed: i64 = row.get("processed");
    let created_at: i64 = row.get("created_at");

    let metadata = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&metadata)
        .context("stored metadata is not a JSON object")?;
    let filter_result = match filter_result {
        Some(raw) => Some(
            serde_json::from_str::<Verdict>(&raw)
                .context("stored filter_result is not a valid verdict")?,
        ),
        None => None,
    };

    Ok(Item {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        metadata,
        processed: processed != 0,
        filter_result,
        created_at: DateTime::<Utc>::from_timestamp(created_at, 0),
    })
}
