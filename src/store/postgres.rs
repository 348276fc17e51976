//! PostgreSQL adapters for posts, translation links, custom fields and the
//! translation queue. The schema is created on connect.

use super::{FieldStore, GroupId, LinkStore, NewPost, Post, PostId, PostStatus, PostStore, PostUpdate};
use crate::error::StoreError;
use crate::fields::{build_tree, Field, FieldDefinition, FieldValue};
use crate::queue::{QueueItem, QueueStats, QueueStatus, QueueStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS posts (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        excerpt TEXT NOT NULL DEFAULT '',
        post_type TEXT NOT NULL,
        status TEXT NOT NULL,
        author_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS field_definitions (
        field_key TEXT PRIMARY KEY,
        field_type TEXT NOT NULL,
        label TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS post_fields (
        post_id BIGINT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        field_key TEXT NOT NULL,
        value TEXT NOT NULL,
        position INT NOT NULL,
        PRIMARY KEY (post_id, field_key)
    )",
    "CREATE SEQUENCE IF NOT EXISTS translation_group_seq",
    "CREATE TABLE IF NOT EXISTS post_languages (
        post_id BIGINT PRIMARY KEY REFERENCES posts(id) ON DELETE CASCADE,
        group_id BIGINT NOT NULL,
        language TEXT NOT NULL,
        source_language TEXT,
        UNIQUE (group_id, language)
    )",
    "CREATE TABLE IF NOT EXISTS translation_queue (
        id BIGSERIAL PRIMARY KEY,
        post_id BIGINT NOT NULL,
        target_language TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS translation_queue_status_idx
        ON translation_queue (status, created_at, id)",
    "CREATE INDEX IF NOT EXISTS translation_queue_post_idx
        ON translation_queue (post_id)",
];

const QUEUE_COLUMNS: &str =
    "id, post_id, target_language, status, error_message, created_at, started_at, completed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and make sure every table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to PostgreSQL, schema ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn define_field(&self, definition: &FieldDefinition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO field_definitions (field_key, field_type, label) VALUES ($1, $2, $3)
             ON CONFLICT (field_key) DO UPDATE SET field_type = EXCLUDED.field_type, label = EXCLUDED.label",
        )
        .bind(&definition.key)
        .bind(&definition.field_type)
        .bind(&definition.label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_definitions(&self) -> Result<HashMap<String, FieldDefinition>, StoreError> {
        let rows = sqlx::query("SELECT field_key, field_type, label FROM field_definitions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, FieldDefinition), StoreError> {
                let def = definition_from_row(row)?;
                Ok((def.key.clone(), def))
            })
            .collect()
    }
}

fn definition_from_row(row: &PgRow) -> Result<FieldDefinition, StoreError> {
    Ok(FieldDefinition {
        key: row.try_get("field_key")?,
        field_type: row.try_get("field_type")?,
        label: row.try_get("label")?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        excerpt: row.try_get("excerpt")?,
        post_type: row.try_get("post_type")?,
        status: PostStatus::parse(&status)?,
        author_id: row.try_get("author_id")?,
    })
}

fn queue_item_from_row(row: &PgRow) -> Result<QueueItem, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(QueueItem {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        target_language: row.try_get("target_language")?,
        status: QueueStatus::parse(&status)?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

// ==================== Posts ====================

#[async_trait]
impl PostStore for PgStore {
    async fn get_post(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, body, excerpt, post_type, status, author_id FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(post_from_row).transpose()
    }

    async fn create_post(&self, post: NewPost) -> Result<PostId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (title, body, excerpt, post_type, status, author_id)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.excerpt)
        .bind(&post.post_type)
        .bind(post.status.as_str())
        .bind(post.author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_post(&self, id: PostId, update: PostUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE posts SET
                title = COALESCE($2, title),
                body = COALESCE($3, body),
                excerpt = COALESCE($4, excerpt),
                status = COALESCE($5, status),
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.title)
        .bind(update.body)
        .bind(update.excerpt)
        .bind(update.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "post",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_post(&self, id: PostId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== Links ====================

#[async_trait]
impl LinkStore for PgStore {
    async fn language_of(&self, post_id: PostId) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT language FROM post_languages WHERE post_id = $1")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn translation_group(&self, post_id: PostId) -> Result<Option<GroupId>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT group_id FROM post_languages WHERE post_id = $1")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn translations(&self, group: GroupId) -> Result<BTreeMap<String, PostId>, StoreError> {
        let rows = sqlx::query("SELECT language, post_id FROM post_languages WHERE group_id = $1")
            .bind(group)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, PostId), StoreError> {
                Ok((row.try_get("language")?, row.try_get("post_id")?))
            })
            .collect()
    }

    async fn set_language_details(
        &self,
        post_id: PostId,
        group: Option<GroupId>,
        language: &str,
        source_language: Option<&str>,
    ) -> Result<GroupId, StoreError> {
        let group = match group {
            Some(group) => group,
            None => {
                sqlx::query_scalar::<_, i64>("SELECT nextval('translation_group_seq')")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        // UNIQUE (group_id, language) rejects a second translation -> Conflict
        sqlx::query(
            "INSERT INTO post_languages (post_id, group_id, language, source_language)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (post_id) DO UPDATE SET
                group_id = EXCLUDED.group_id,
                language = EXCLUDED.language,
                source_language = EXCLUDED.source_language",
        )
        .bind(post_id)
        .bind(group)
        .bind(language)
        .bind(source_language)
        .execute(&self.pool)
        .await?;
        Ok(group)
    }

    async fn remove_language_details(&self, post_id: PostId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM post_languages WHERE post_id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== Fields ====================

#[async_trait]
impl FieldStore for PgStore {
    async fn get_fields(&self, post_id: PostId) -> Result<Vec<Field>, StoreError> {
        let rows = sqlx::query(
            "SELECT field_key, value FROM post_fields WHERE post_id = $1 ORDER BY position",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut raw = Map::new();
        for row in &rows {
            let key: String = row.try_get("field_key")?;
            let encoded: String = row.try_get("value")?;
            // JSON text, not JSONB: object key order is declaration order
            let value: Value = serde_json::from_str(&encoded)
                .map_err(|e| StoreError::Malformed(format!("field '{}': {}", key, e)))?;
            raw.insert(key, value);
        }

        let definitions = self.all_definitions().await?;
        build_tree(&raw, &|key: &str| definitions.get(key).cloned())
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn get_field_definition(&self, key: &str) -> Result<Option<FieldDefinition>, StoreError> {
        let row = sqlx::query("SELECT field_key, field_type, label FROM field_definitions WHERE field_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(definition_from_row).transpose()
    }

    async fn set_field(&self, key: &str, value: &FieldValue, post_id: PostId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO post_fields (post_id, field_key, value, position)
             VALUES ($1, $2, $3,
                COALESCE((SELECT MAX(position) + 1 FROM post_fields WHERE post_id = $1), 0))
             ON CONFLICT (post_id, field_key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(post_id)
        .bind(key)
        .bind(value.to_raw().to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_fields(&self, post_id: PostId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM post_fields WHERE post_id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== Queue ====================

#[async_trait]
impl QueueStore for PgStore {
    async fn insert_pending(
        &self,
        pairs: &[(PostId, String)],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let sql = format!(
            "INSERT INTO translation_queue (post_id, target_language, status, created_at)
             VALUES ($1, $2, 'pending', $3) RETURNING {}",
            QUEUE_COLUMNS
        );

        let mut tx = self.pool.begin().await?;
        let mut items = Vec::with_capacity(pairs.len());
        for (post_id, language) in pairs {
            let row = sqlx::query(&sql)
                .bind(post_id)
                .bind(language)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
            items.push(queue_item_from_row(&row)?);
        }
        tx.commit().await?;
        Ok(items)
    }

    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM translation_queue WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC LIMIT $1",
            QUEUE_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(queue_item_from_row).collect()
    }

    async fn mark_processing(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE translation_queue SET status = 'processing', started_at = $2
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_finished(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE translation_queue SET status = $2, error_message = $3, completed_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "queue item",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM translation_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = u64::try_from(count).unwrap_or(0);
            match QueueStatus::parse(&status)? {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Completed => stats.completed = count,
                QueueStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn reset_failed(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE translation_queue SET status = 'pending', error_message = NULL, completed_at = NULL
             WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM translation_queue
             WHERE status IN ('completed', 'failed') AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reclaim_processing_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE translation_queue SET status = 'pending', started_at = NULL
             WHERE status = 'processing' AND started_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn items_for_posts(&self, post_ids: &[PostId]) -> Result<Vec<QueueItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM translation_queue WHERE post_id = ANY($1) ORDER BY created_at, id",
            QUEUE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(post_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(queue_item_from_row).collect()
    }
}
