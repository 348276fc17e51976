//! Collaborator boundaries: posts, multilingual links and custom fields.
//!
//! The orchestrator only talks to these traits. `memory` provides adapters
//! backed by process memory (tests, embedding); `postgres` provides the
//! adapters used by the service binary.

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use crate::fields::{Field, FieldDefinition, FieldValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PostId = i64;
pub type GroupId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Pending,
    Private,
    Publish,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Private => "private",
            PostStatus::Publish => "publish",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "draft" => Ok(PostStatus::Draft),
            "pending" => Ok(PostStatus::Pending),
            "private" => Ok(PostStatus::Private),
            "publish" => Ok(PostStatus::Publish),
            other => Err(StoreError::Backend(format!("unknown post status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub post_type: String,
    pub status: PostStatus,
    pub author_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub post_type: String,
    pub status: PostStatus,
    pub author_id: i64,
}

/// Partial update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: Option<PostStatus>,
}

/// A source post and every language version in its translation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationLink {
    pub source_post_id: PostId,
    pub group: Option<GroupId>,
    pub translations: BTreeMap<String, PostId>,
}

impl TranslationLink {
    pub fn has_language(&self, language: &str) -> bool {
        self.translations.contains_key(language)
    }
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_post(&self, id: PostId) -> Result<Option<Post>, StoreError>;
    async fn create_post(&self, post: NewPost) -> Result<PostId, StoreError>;
    async fn update_post(&self, id: PostId, update: PostUpdate) -> Result<(), StoreError>;
    async fn delete_post(&self, id: PostId) -> Result<(), StoreError>;
}

/// Multilingual relationships between posts.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn language_of(&self, post_id: PostId) -> Result<Option<String>, StoreError>;
    async fn translation_group(&self, post_id: PostId) -> Result<Option<GroupId>, StoreError>;
    async fn translations(&self, group: GroupId) -> Result<BTreeMap<String, PostId>, StoreError>;

    /// Attach `post_id` to `group` (a fresh group when `None`) as its
    /// `language` version. Returns the group id. A second post for the same
    /// (group, language) must be rejected with [`StoreError::Conflict`].
    async fn set_language_details(
        &self,
        post_id: PostId,
        group: Option<GroupId>,
        language: &str,
        source_language: Option<&str>,
    ) -> Result<GroupId, StoreError>;

    /// Detach `post_id` from its group. Unlinked posts are left as they are.
    async fn remove_language_details(&self, post_id: PostId) -> Result<(), StoreError>;
}

/// Custom-field schema and values.
#[async_trait]
pub trait FieldStore: Send + Sync {
    async fn get_fields(&self, post_id: PostId) -> Result<Vec<Field>, StoreError>;
    async fn get_field_definition(&self, key: &str) -> Result<Option<FieldDefinition>, StoreError>;
    async fn set_field(&self, key: &str, value: &FieldValue, post_id: PostId) -> Result<(), StoreError>;
    /// Remove every stored value of `post_id`.
    async fn delete_fields(&self, post_id: PostId) -> Result<(), StoreError>;
}

/// Resolve the translation link of `post_id` through the link store.
pub async fn resolve_link(links: &dyn LinkStore, post_id: PostId) -> Result<TranslationLink, StoreError> {
    let group = links.translation_group(post_id).await?;
    let translations = match group {
        Some(group) => links.translations(group).await?,
        None => BTreeMap::new(),
    };
    Ok(TranslationLink {
        source_post_id: post_id,
        group,
        translations,
    })
}
