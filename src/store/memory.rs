//! In-process adapters for every collaborator. State lives behind async
//! mutexes; ids are handed out sequentially starting at 1.

use super::{FieldStore, GroupId, LinkStore, NewPost, Post, PostId, PostStore, PostUpdate};
use crate::error::StoreError;
use crate::fields::{build_tree, Field, FieldDefinition, FieldValue};
use crate::queue::{QueueItem, QueueStats, QueueStatus, QueueStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

// ==================== Posts ====================

#[derive(Default)]
pub struct MemoryPostStore {
    inner: Mutex<PostState>,
}

#[derive(Default)]
struct PostState {
    posts: BTreeMap<PostId, Post>,
    last_id: PostId,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.posts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn get_post(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        Ok(self.inner.lock().await.posts.get(&id).cloned())
    }

    async fn create_post(&self, post: NewPost) -> Result<PostId, StoreError> {
        let mut state = self.inner.lock().await;
        state.last_id += 1;
        let id = state.last_id;
        state.posts.insert(
            id,
            Post {
                id,
                title: post.title,
                body: post.body,
                excerpt: post.excerpt,
                post_type: post.post_type,
                status: post.status,
                author_id: post.author_id,
            },
        );
        Ok(id)
    }

    async fn update_post(&self, id: PostId, update: PostUpdate) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        let post = state.posts.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "post",
            id: id.to_string(),
        })?;
        if let Some(title) = update.title {
            post.title = title;
        }
        if let Some(body) = update.body {
            post.body = body;
        }
        if let Some(excerpt) = update.excerpt {
            post.excerpt = excerpt;
        }
        if let Some(status) = update.status {
            post.status = status;
        }
        Ok(())
    }

    async fn delete_post(&self, id: PostId) -> Result<(), StoreError> {
        self.inner.lock().await.posts.remove(&id);
        Ok(())
    }
}

// ==================== Links ====================

#[derive(Default)]
pub struct MemoryLinkStore {
    inner: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    /// post -> (group, language, source language)
    posts: HashMap<PostId, (GroupId, String, Option<String>)>,
    last_group: GroupId,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn language_of(&self, post_id: PostId) -> Result<Option<String>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.posts.get(&post_id).map(|(_, lang, _)| lang.clone()))
    }

    async fn translation_group(&self, post_id: PostId) -> Result<Option<GroupId>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.posts.get(&post_id).map(|(group, _, _)| *group))
    }

    async fn translations(&self, group: GroupId) -> Result<BTreeMap<String, PostId>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .posts
            .iter()
            .filter(|(_, (g, _, _))| *g == group)
            .map(|(post_id, (_, lang, _))| (lang.clone(), *post_id))
            .collect())
    }

    async fn set_language_details(
        &self,
        post_id: PostId,
        group: Option<GroupId>,
        language: &str,
        source_language: Option<&str>,
    ) -> Result<GroupId, StoreError> {
        let mut state = self.inner.lock().await;
        let group = match group {
            Some(group) => group,
            None => {
                state.last_group += 1;
                state.last_group
            }
        };

        let taken = state
            .posts
            .iter()
            .any(|(other, (g, lang, _))| *g == group && lang == language && *other != post_id);
        if taken {
            return Err(StoreError::Conflict(format!(
                "group {} already has a '{}' translation",
                group, language
            )));
        }

        state.posts.insert(
            post_id,
            (group, language.to_string(), source_language.map(str::to_string)),
        );
        Ok(group)
    }

    async fn remove_language_details(&self, post_id: PostId) -> Result<(), StoreError> {
        self.inner.lock().await.posts.remove(&post_id);
        Ok(())
    }
}

// ==================== Fields ====================

/// Keeps raw values per post and builds the typed tree on read, the same way
/// a schema-driven store hands out fields.
#[derive(Default)]
pub struct MemoryFieldStore {
    definitions: Mutex<HashMap<String, FieldDefinition>>,
    values: Mutex<HashMap<PostId, Map<String, Value>>>,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn define(&self, definition: FieldDefinition) {
        self.definitions
            .lock()
            .await
            .insert(definition.key.clone(), definition);
    }

    pub async fn put_raw(&self, post_id: PostId, raw: Map<String, Value>) {
        self.values.lock().await.insert(post_id, raw);
    }

    pub async fn raw(&self, post_id: PostId) -> Option<Map<String, Value>> {
        self.values.lock().await.get(&post_id).cloned()
    }
}

#[async_trait]
impl FieldStore for MemoryFieldStore {
    async fn get_fields(&self, post_id: PostId) -> Result<Vec<Field>, StoreError> {
        let raw = match self.values.lock().await.get(&post_id) {
            Some(raw) => raw.clone(),
            None => return Ok(Vec::new()),
        };
        let definitions = self.definitions.lock().await;
        build_tree(&raw, &|key: &str| definitions.get(key).cloned())
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn get_field_definition(&self, key: &str) -> Result<Option<FieldDefinition>, StoreError> {
        Ok(self.definitions.lock().await.get(key).cloned())
    }

    async fn set_field(&self, key: &str, value: &FieldValue, post_id: PostId) -> Result<(), StoreError> {
        self.values
            .lock()
            .await
            .entry(post_id)
            .or_default()
            .insert(key.to_string(), value.to_raw());
        Ok(())
    }

    async fn delete_fields(&self, post_id: PostId) -> Result<(), StoreError> {
        self.values.lock().await.remove(&post_id);
        Ok(())
    }
}

// ==================== Queue ====================

#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    items: Vec<QueueItem>,
    last_id: i64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_pending(
        &self,
        pairs: &[(PostId, String)],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let mut state = self.inner.lock().await;
        let mut created = Vec::with_capacity(pairs.len());
        for (post_id, language) in pairs {
            state.last_id += 1;
            let item = QueueItem {
                id: state.last_id,
                post_id: *post_id,
                target_language: language.clone(),
                status: QueueStatus::Pending,
                error_message: None,
                created_at: now,
                started_at: None,
                completed_at: None,
            };
            state.items.push(item.clone());
            created.push(item);
        }
        Ok(created)
    }

    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let state = self.inner.lock().await;
        let mut pending: Vec<QueueItem> = state
            .items
            .iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|item| (item.created_at, item.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().await;
        match state
            .items
            .iter_mut()
            .find(|item| item.id == id && item.status == QueueStatus::Pending)
        {
            Some(item) => {
                item.status = QueueStatus::Processing;
                item.started_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_finished(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        let item = state
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "queue item",
                id: id.to_string(),
            })?;
        item.status = status;
        item.error_message = error_message.map(str::to_string);
        item.completed_at = Some(now);
        Ok(())
    }

    async fn count_by_status(&self) -> Result<QueueStats, StoreError> {
        let state = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for item in &state.items {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reset_failed(&self) -> Result<u64, StoreError> {
        let mut state = self.inner.lock().await;
        let mut reset = 0;
        for item in state
            .items
            .iter_mut()
            .filter(|item| item.status == QueueStatus::Failed)
        {
            item.status = QueueStatus::Pending;
            item.error_message = None;
            item.completed_at = None;
            reset += 1;
        }
        Ok(reset)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.inner.lock().await;
        let before = state.items.len();
        state.items.retain(|item| {
            !(item.status.is_terminal() && item.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - state.items.len()) as u64)
    }

    async fn reclaim_processing_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.inner.lock().await;
        let mut reclaimed = 0;
        for item in state.items.iter_mut().filter(|item| {
            item.status == QueueStatus::Processing && item.started_at.is_some_and(|at| at < cutoff)
        }) {
            item.status = QueueStatus::Pending;
            item.started_at = None;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn items_for_posts(&self, post_ids: &[PostId]) -> Result<Vec<QueueItem>, StoreError> {
        let wanted: HashSet<PostId> = post_ids.iter().copied().collect();
        let state = self.inner.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|item| wanted.contains(&item.post_id))
            .cloned()
            .collect())
    }
}
