//! Translation of one post into a set of target languages.
//!
//! Each language is handled independently and atomically: every leaf string
//! is translated before anything is written, and a write failure after the
//! draft post exists removes the draft again. Failures are reported per
//! language in the returned map and never abort sibling languages.

use crate::error::{StoreError, TranslateError};
use crate::fields::{self, is_internal_key, Extraction, Field, FieldPath, FieldValue};
use crate::store::{
    resolve_link, FieldStore, LinkStore, NewPost, Post, PostId, PostStatus, PostStore,
    TranslationLink,
};
use crate::translator::{is_valid_language_code, Translator};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TITLE_KEY: &str = "post_title";
const BODY_KEY: &str = "post_content";
const EXCERPT_KEY: &str = "post_excerpt";
const FIELDS_KEY: &str = "fields";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Used when the link store does not know the source post's language.
    pub source_language: String,
    /// Author of created drafts.
    pub author_id: i64,
    /// Upper bound for a single translate call.
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Created(PostId),
    Skipped(SkipReason),
    Failed(TranslateError),
}

pub type TranslationResults = BTreeMap<String, TranslationOutcome>;

/// Whether a post has a version in one language, and where it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageStatus {
    pub exists: bool,
    pub post_id: Option<PostId>,
    /// `None` when no version exists or the linked post is gone.
    pub status: Option<PostStatus>,
}

/// Everything about the source post needed to produce any language version.
struct Prepared {
    tree: Vec<Field>,
    extraction: Extraction,
    source_language: String,
}

pub struct Orchestrator {
    posts: Arc<dyn PostStore>,
    links: Arc<dyn LinkStore>,
    fields: Arc<dyn FieldStore>,
    translator: Arc<dyn Translator>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        posts: Arc<dyn PostStore>,
        links: Arc<dyn LinkStore>,
        fields: Arc<dyn FieldStore>,
        translator: Arc<dyn Translator>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            posts,
            links,
            fields,
            translator,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Translate `post_id` into every language of `languages`.
    ///
    /// Returns `Err` only for invalid arguments or when the source post cannot
    /// be read; everything else is reported per language.
    pub async fn translate(
        &self,
        post_id: PostId,
        languages: &BTreeSet<String>,
    ) -> Result<TranslationResults, TranslateError> {
        if languages.is_empty() {
            return Err(TranslateError::InvalidInput(
                "no target language requested".to_string(),
            ));
        }
        if let Some(bad) = languages.iter().find(|l| !is_valid_language_code(l)) {
            return Err(TranslateError::InvalidInput(format!(
                "invalid language code '{}'",
                bad
            )));
        }

        let post = self.posts.get_post(post_id).await?.ok_or_else(|| {
            TranslateError::InvalidInput(format!("post {} does not exist", post_id))
        })?;

        let prepared = self.prepare(&post).await;
        if let Err(e) = &prepared {
            warn!("Post {} cannot be prepared for translation: {}", post_id, e);
        }

        let mut results = BTreeMap::new();
        for language in languages {
            let outcome = self.translate_language(&post, &prepared, language).await;
            match &outcome {
                TranslationOutcome::Created(id) => {
                    info!("Post {} translated to {} as draft {}", post_id, language, id)
                }
                TranslationOutcome::Skipped(reason) => {
                    info!("Post {} -> {} skipped: {:?}", post_id, language, reason)
                }
                TranslationOutcome::Failed(e) => {
                    warn!("Post {} -> {} failed: {}", post_id, language, e)
                }
            }
            results.insert(language.clone(), outcome);
        }
        Ok(results)
    }

    /// Report, for each of `languages`, whether `post_id` has a version in
    /// that language. Read only.
    pub async fn translation_status(
        &self,
        post_id: PostId,
        languages: &[String],
    ) -> Result<BTreeMap<String, LanguageStatus>, TranslateError> {
        if let Some(bad) = languages.iter().find(|l| !is_valid_language_code(l)) {
            return Err(TranslateError::InvalidInput(format!(
                "invalid language code '{}'",
                bad
            )));
        }
        if self.posts.get_post(post_id).await?.is_none() {
            return Err(TranslateError::InvalidInput(format!(
                "post {} does not exist",
                post_id
            )));
        }

        let link = resolve_link(self.links.as_ref(), post_id).await?;
        let mut statuses = BTreeMap::new();
        for language in languages {
            let status = match link.translations.get(language) {
                Some(&id) => LanguageStatus {
                    exists: true,
                    post_id: Some(id),
                    status: self.posts.get_post(id).await?.map(|p| p.status),
                },
                None => LanguageStatus {
                    exists: false,
                    post_id: None,
                    status: None,
                },
            };
            statuses.insert(language.clone(), status);
        }
        Ok(statuses)
    }

    async fn prepare(&self, post: &Post) -> Result<Prepared, TranslateError> {
        let custom = self.fields.get_fields(post.id).await?;
        let tree = document_tree(post, custom);
        let extraction = fields::extract(&tree)?;
        let source_language = self
            .links
            .language_of(post.id)
            .await?
            .unwrap_or_else(|| self.settings.source_language.clone());

        debug!(
            "Post {} has {} translatable string(s), source language {}",
            post.id,
            extraction.len(),
            source_language
        );
        Ok(Prepared {
            tree,
            extraction,
            source_language,
        })
    }

    async fn translate_language(
        &self,
        post: &Post,
        prepared: &Result<Prepared, TranslateError>,
        language: &str,
    ) -> TranslationOutcome {
        // Looked up per language: an earlier language of this call may have
        // created the group.
        let link = match resolve_link(self.links.as_ref(), post.id).await {
            Ok(link) => link,
            Err(e) => return TranslationOutcome::Failed(e.into()),
        };
        if link.has_language(language) {
            return TranslationOutcome::Skipped(SkipReason::AlreadyExists);
        }

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return TranslationOutcome::Failed(e.clone()),
        };
        // The source is the version in its own language, linked or not.
        if language == prepared.source_language {
            return TranslationOutcome::Skipped(SkipReason::AlreadyExists);
        }

        self.create_translation(post, prepared, &link, language)
            .await
            .unwrap_or_else(TranslationOutcome::Failed)
    }

    async fn create_translation(
        &self,
        post: &Post,
        prepared: &Prepared,
        link: &TranslationLink,
        language: &str,
    ) -> Result<TranslationOutcome, TranslateError> {
        let translations = self.translate_leaves(&prepared.extraction, language).await?;
        let translated = fields::inject(&prepared.tree, &translations)?;
        let doc = TranslatedDocument::from_tree(translated)?;

        let new_id = self
            .posts
            .create_post(NewPost {
                title: doc.title,
                body: doc.body,
                excerpt: doc.excerpt,
                post_type: post.post_type.clone(),
                status: PostStatus::Draft,
                author_id: self.settings.author_id,
            })
            .await?;

        match self
            .persist(post.id, new_id, &doc.fields, link, language, &prepared.source_language)
            .await
        {
            Ok(()) => Ok(TranslationOutcome::Created(new_id)),
            Err(e) => {
                self.discard(new_id).await;
                match e {
                    StoreError::Conflict(_) => Ok(TranslationOutcome::Skipped(SkipReason::AlreadyExists)),
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Translate every extracted leaf; identical strings are sent once.
    async fn translate_leaves(
        &self,
        extraction: &Extraction,
        language: &str,
    ) -> Result<HashMap<FieldPath, String>, TranslateError> {
        let mut memo: HashMap<&str, String> = HashMap::new();
        let mut translated = HashMap::with_capacity(extraction.len());

        for (path, text) in extraction {
            let value = match memo.get(text.as_str()) {
                Some(done) => done.clone(),
                None => {
                    let fresh = self.call_translator(text, language).await.map_err(|e| {
                        debug!("Leaf {} failed for {}: {}", path, language, e);
                        e
                    })?;
                    memo.insert(text.as_str(), fresh.clone());
                    fresh
                }
            };
            translated.insert(path.clone(), value);
        }
        Ok(translated)
    }

    async fn call_translator(&self, text: &str, language: &str) -> Result<String, TranslateError> {
        let timeout = self.settings.call_timeout;
        let translated = tokio::time::timeout(timeout, self.translator.translate(text, language))
            .await
            .map_err(|_| TranslateError::Timeout(timeout.as_secs()))??;

        if translated.trim().is_empty() {
            return Err(TranslateError::CapabilityFailure(format!(
                "{} returned an empty translation",
                self.translator.provider_name()
            )));
        }
        Ok(translated)
    }

    async fn persist(
        &self,
        source_id: PostId,
        new_id: PostId,
        custom: &[Field],
        link: &TranslationLink,
        language: &str,
        source_language: &str,
    ) -> Result<(), StoreError> {
        for field in custom.iter().filter(|f| !is_internal_key(&f.key)) {
            self.fields.set_field(&field.key, &field.value, new_id).await?;
        }

        let (group, fresh_group) = match link.group {
            Some(group) => (group, false),
            None => {
                let group = self
                    .links
                    .set_language_details(source_id, None, source_language, None)
                    .await?;
                (group, true)
            }
        };

        let linked = self
            .links
            .set_language_details(new_id, Some(group), language, Some(source_language))
            .await;
        if let Err(e) = linked {
            // A group created for this draft alone must not outlive it
            if fresh_group {
                if let Err(unlink) = self.links.remove_language_details(source_id).await {
                    error!("Failed to unlink source post {} from group {}: {}", source_id, group, unlink);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove a draft and every field value written for it.
    async fn discard(&self, new_id: PostId) {
        if let Err(e) = self.fields.delete_fields(new_id).await {
            error!("Failed to remove fields of incomplete translation draft {}: {}", new_id, e);
        }
        if let Err(e) = self.posts.delete_post(new_id).await {
            error!("Failed to remove incomplete translation draft {}: {}", new_id, e);
        }
    }
}

/// Walker tree for a post: core columns first, custom fields in a group.
fn document_tree(post: &Post, custom: Vec<Field>) -> Vec<Field> {
    vec![
        Field::new(TITLE_KEY, "Title", FieldValue::Text(post.title.clone())),
        Field::new(BODY_KEY, "Content", FieldValue::Text(post.body.clone())),
        Field::new(EXCERPT_KEY, "Excerpt", FieldValue::Text(post.excerpt.clone())),
        Field::new(FIELDS_KEY, "Custom fields", FieldValue::Group(custom)),
    ]
}

struct TranslatedDocument {
    title: String,
    body: String,
    excerpt: String,
    fields: Vec<Field>,
}

impl TranslatedDocument {
    fn from_tree(tree: Vec<Field>) -> Result<Self, TranslateError> {
        let mut title = None;
        let mut body = None;
        let mut excerpt = None;
        let mut custom = None;

        for field in tree {
            match (field.key.as_str(), field.value) {
                (TITLE_KEY, FieldValue::Text(text)) => title = Some(text),
                (BODY_KEY, FieldValue::Text(text)) => body = Some(text),
                (EXCERPT_KEY, FieldValue::Text(text)) => excerpt = Some(text),
                (FIELDS_KEY, FieldValue::Group(fields)) => custom = Some(fields),
                (key, _) => {
                    return Err(TranslateError::MalformedTree(format!(
                        "unexpected document node '{}'",
                        key
                    )))
                }
            }
        }

        match (title, body, excerpt, custom) {
            (Some(title), Some(body), Some(excerpt), Some(fields)) => Ok(Self {
                title,
                body,
                excerpt,
                fields,
            }),
            _ => Err(TranslateError::MalformedTree(
                "post document is missing a core node".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDefinition;
    use crate::store::GroupId;
    use crate::store::memory::{MemoryFieldStore, MemoryLinkStore, MemoryPostStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends `_<lang>`; fails for texts containing `FAIL` or for the
    /// languages listed in `failing_languages`; sleeps on `SLOW`.
    struct MockTranslator {
        calls: AtomicUsize,
        failing_languages: Vec<&'static str>,
    }

    impl MockTranslator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing_languages: Vec::new(),
            }
        }

        fn failing_for(languages: Vec<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing_languages: languages,
            }
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("SLOW") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if text.contains("FAIL") || self.failing_languages.contains(&target_language) {
                return Err(TranslateError::CapabilityFailure("401 Unauthorized".to_string()));
            }
            if text.contains("BLANK") {
                return Ok(String::new());
            }
            Ok(format!("{}_{}", text, target_language))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    struct Env {
        orchestrator: Orchestrator,
        posts: Arc<MemoryPostStore>,
        links: Arc<MemoryLinkStore>,
        fields: Arc<MemoryFieldStore>,
        translator: Arc<MockTranslator>,
    }

    fn env_with(translator: MockTranslator, timeout: Duration) -> Env {
        let posts = Arc::new(MemoryPostStore::new());
        let links = Arc::new(MemoryLinkStore::new());
        let fields = Arc::new(MemoryFieldStore::new());
        let translator = Arc::new(translator);
        let orchestrator = Orchestrator::new(
            posts.clone(),
            links.clone(),
            fields.clone(),
            translator.clone(),
            OrchestratorSettings {
                source_language: "fr".to_string(),
                author_id: 7,
                call_timeout: timeout,
            },
        );
        Env {
            orchestrator,
            posts,
            links,
            fields,
            translator,
        }
    }

    fn env() -> Env {
        env_with(MockTranslator::new(), Duration::from_secs(5))
    }

    async fn seed(env: &Env, title: &str) -> PostId {
        env.posts
            .create_post(NewPost {
                title: title.to_string(),
                body: "<p>Corps</p>".to_string(),
                excerpt: String::new(),
                post_type: "page".to_string(),
                status: PostStatus::Publish,
                author_id: 1,
            })
            .await
            .unwrap()
    }

    async fn seed_fields(env: &Env, post_id: PostId) {
        for (key, ty, label) in [
            ("subtitle", "text", "Subtitle"),
            ("gallery", "gallery", "Gallery"),
            ("tags", "repeater", "Tags"),
            ("text", "text", "Text"),
        ] {
            env.fields.define(FieldDefinition::new(key, ty, label)).await;
        }
        env.fields
            .put_raw(
                post_id,
                json!({
                    "subtitle": "Sous-titre",
                    "gallery": [11, 12],
                    "tags": [{"text": "A"}, {"text": "B"}],
                    "tagline": "Du pain frais",
                    "_edit_lock": "1700000000:1",
                })
                .as_object()
                .unwrap()
                .clone(),
            )
            .await;
    }

    fn langs(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    // ==================== Success path ====================

    #[tokio::test]
    async fn test_translate_creates_draft_fields_and_link() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        seed_fields(&env, post_id).await;

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        let new_id = match results["es"] {
            TranslationOutcome::Created(id) => id,
            ref other => panic!("unexpected outcome {:?}", other),
        };
        let created = env.posts.get_post(new_id).await.unwrap().unwrap();
        assert_eq!(created.title, "Bonjour_es");
        assert_eq!(created.body, "<p>Corps</p>_es");
        assert_eq!(created.excerpt, "");
        assert_eq!(created.status, PostStatus::Draft);
        assert_eq!(created.post_type, "page");
        assert_eq!(created.author_id, 7);

        let raw = env.fields.raw(new_id).await.unwrap();
        assert_eq!(raw["subtitle"], "Sous-titre_es");
        assert_eq!(raw["gallery"], json!([11, 12]));
        assert_eq!(raw["tags"], json!([{"text": "A_es"}, {"text": "B_es"}]));
        // No definition: plain post meta, still translated
        assert_eq!(raw["tagline"], "Du pain frais_es");
        assert!(!raw.contains_key("_edit_lock"));

        let group = env.links.translation_group(post_id).await.unwrap().unwrap();
        let translations = env.links.translations(group).await.unwrap();
        assert_eq!(translations.get("fr"), Some(&post_id));
        assert_eq!(translations.get("es"), Some(&new_id));
        assert_eq!(env.links.language_of(new_id).await.unwrap().as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn test_translate_never_mutates_source() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        seed_fields(&env, post_id).await;
        let before_post = env.posts.get_post(post_id).await.unwrap();
        let before_fields = env.fields.raw(post_id).await;

        env.orchestrator
            .translate(post_id, &langs(&["es", "en"]))
            .await
            .unwrap();

        assert_eq!(env.posts.get_post(post_id).await.unwrap(), before_post);
        assert_eq!(env.fields.raw(post_id).await, before_fields);
    }

    #[tokio::test]
    async fn test_translate_multiple_languages_share_group() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;

        let results = env
            .orchestrator
            .translate(post_id, &langs(&["ar", "en", "es"]))
            .await
            .unwrap();

        assert!(results
            .values()
            .all(|o| matches!(o, TranslationOutcome::Created(_))));
        let group = env.links.translation_group(post_id).await.unwrap().unwrap();
        assert_eq!(env.links.translations(group).await.unwrap().len(), 4);
        assert_eq!(env.posts.len().await, 4);
    }

    // ==================== Skips ====================

    #[tokio::test]
    async fn test_existing_translation_is_skipped() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();
        let calls = env.translator.calls.load(Ordering::SeqCst);

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        assert_eq!(
            results["es"],
            TranslationOutcome::Skipped(SkipReason::AlreadyExists)
        );
        assert_eq!(env.posts.len().await, 2);
        assert_eq!(env.translator.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_source_language_counts_as_existing() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        env.links
            .set_language_details(post_id, None, "fr", None)
            .await
            .unwrap();

        let results = env.orchestrator.translate(post_id, &langs(&["fr"])).await.unwrap();
        assert_eq!(
            results["fr"],
            TranslationOutcome::Skipped(SkipReason::AlreadyExists)
        );
        assert_eq!(env.posts.len().await, 1);
    }

    #[tokio::test]
    async fn test_unlinked_source_language_is_skipped() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;

        let results = env.orchestrator.translate(post_id, &langs(&["fr"])).await.unwrap();

        assert_eq!(
            results["fr"],
            TranslationOutcome::Skipped(SkipReason::AlreadyExists)
        );
        assert_eq!(env.posts.len().await, 1);
        assert_eq!(env.links.translation_group(post_id).await.unwrap(), None);
        assert_eq!(env.translator.calls.load(Ordering::SeqCst), 0);
    }

    // ==================== Failures ====================

    #[tokio::test]
    async fn test_leaf_failure_is_atomic_per_language() {
        let env = env_with(MockTranslator::failing_for(vec!["ar"]), Duration::from_secs(5));
        let post_id = seed(&env, "Bonjour").await;

        let results = env
            .orchestrator
            .translate(post_id, &langs(&["ar", "es"]))
            .await
            .unwrap();

        assert!(matches!(
            results["ar"],
            TranslationOutcome::Failed(TranslateError::CapabilityFailure(_))
        ));
        assert!(matches!(results["es"], TranslationOutcome::Created(_)));
        assert_eq!(env.posts.len().await, 2);

        let group = env.links.translation_group(post_id).await.unwrap().unwrap();
        let translations = env.links.translations(group).await.unwrap();
        assert!(!translations.contains_key("ar"));
    }

    #[tokio::test]
    async fn test_failing_field_leaf_creates_nothing() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        env.fields.define(FieldDefinition::new("note", "textarea", "Note")).await;
        env.fields
            .put_raw(post_id, json!({"note": "FAIL"}).as_object().unwrap().clone())
            .await;

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        assert!(matches!(results["es"], TranslationOutcome::Failed(_)));
        assert_eq!(env.posts.len().await, 1);
        assert_eq!(env.links.translation_group(post_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let env = env_with(MockTranslator::new(), Duration::from_millis(20));
        let post_id = seed(&env, "SLOW title").await;

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        assert!(matches!(
            results["es"],
            TranslationOutcome::Failed(TranslateError::Timeout(_))
        ));
        assert_eq!(env.posts.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_translation_is_capability_failure() {
        let env = env();
        let post_id = seed(&env, "BLANK").await;

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();
        assert!(matches!(
            results["es"],
            TranslationOutcome::Failed(TranslateError::CapabilityFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_tree_fails_every_language() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        env.fields
            .define(FieldDefinition::new("sections", "flexible_content", "Sections"))
            .await;
        env.fields
            .put_raw(
                post_id,
                json!({"sections": [{"heading": "no tag"}]})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await;

        let results = env
            .orchestrator
            .translate(post_id, &langs(&["en", "es"]))
            .await
            .unwrap();

        for outcome in results.values() {
            assert!(matches!(
                outcome,
                TranslationOutcome::Failed(TranslateError::MalformedTree(_))
            ));
        }
        assert_eq!(env.posts.len().await, 1);
        assert_eq!(env.translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_rejected() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;

        assert!(matches!(
            env.orchestrator.translate(post_id, &BTreeSet::new()).await,
            Err(TranslateError::InvalidInput(_))
        ));
        assert!(matches!(
            env.orchestrator.translate(post_id, &langs(&["not a code"])).await,
            Err(TranslateError::InvalidInput(_))
        ));
        assert!(matches!(
            env.orchestrator.translate(4242, &langs(&["es"])).await,
            Err(TranslateError::InvalidInput(msg)) if msg.contains("4242")
        ));
        assert_eq!(env.translator.calls.load(Ordering::SeqCst), 0);
    }

    // ==================== Call economy ====================

    #[tokio::test]
    async fn test_duplicate_and_blank_strings_are_not_resent() {
        let env = env();
        let post_id = seed(&env, "Same").await;
        env.fields.define(FieldDefinition::new("a", "text", "A")).await;
        env.fields.define(FieldDefinition::new("b", "text", "B")).await;
        env.fields.define(FieldDefinition::new("c", "text", "C")).await;
        env.fields
            .put_raw(
                post_id,
                json!({"a": "Same", "b": "Same", "c": "  "})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await;

        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();
        let new_id = match results["es"] {
            TranslationOutcome::Created(id) => id,
            ref other => panic!("unexpected outcome {:?}", other),
        };

        // "Same" once, "<p>Corps</p>" once; excerpt and "c" are blank
        assert_eq!(env.translator.calls.load(Ordering::SeqCst), 2);
        let raw = env.fields.raw(new_id).await.unwrap();
        assert_eq!(raw["b"], "Same_es");
        assert_eq!(raw["c"], "  ");
    }

    // ==================== Compensation ====================

    struct RejectingFields(Arc<MemoryFieldStore>);

    #[async_trait]
    impl FieldStore for RejectingFields {
        async fn get_fields(&self, post_id: PostId) -> Result<Vec<Field>, StoreError> {
            self.0.get_fields(post_id).await
        }

        async fn get_field_definition(&self, key: &str) -> Result<Option<FieldDefinition>, StoreError> {
            self.0.get_field_definition(key).await
        }

        async fn set_field(&self, _key: &str, _value: &FieldValue, _post_id: PostId) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn delete_fields(&self, post_id: PostId) -> Result<(), StoreError> {
            self.0.delete_fields(post_id).await
        }
    }

    #[tokio::test]
    async fn test_write_failure_removes_draft() {
        let posts = Arc::new(MemoryPostStore::new());
        let links = Arc::new(MemoryLinkStore::new());
        let inner = Arc::new(MemoryFieldStore::new());
        inner.define(FieldDefinition::new("subtitle", "text", "Subtitle")).await;

        let post_id = posts
            .create_post(NewPost {
                title: "Bonjour".to_string(),
                body: String::new(),
                excerpt: String::new(),
                post_type: "post".to_string(),
                status: PostStatus::Publish,
                author_id: 1,
            })
            .await
            .unwrap();
        inner
            .put_raw(post_id, json!({"subtitle": "Salut"}).as_object().unwrap().clone())
            .await;

        let orchestrator = Orchestrator::new(
            posts.clone(),
            links.clone(),
            Arc::new(RejectingFields(inner)),
            Arc::new(MockTranslator::new()),
            OrchestratorSettings {
                source_language: "fr".to_string(),
                author_id: 1,
                call_timeout: Duration::from_secs(5),
            },
        );

        let results = orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        assert!(matches!(
            results["es"],
            TranslationOutcome::Failed(TranslateError::PersistenceFailure(_))
        ));
        assert_eq!(posts.len().await, 1);
        assert_eq!(links.translation_group(post_id).await.unwrap(), None);
    }

    /// Accepts the source registration, rejects every other post.
    struct RejectingLinks(Arc<MemoryLinkStore>);

    #[async_trait]
    impl LinkStore for RejectingLinks {
        async fn language_of(&self, post_id: PostId) -> Result<Option<String>, StoreError> {
            self.0.language_of(post_id).await
        }

        async fn translation_group(&self, post_id: PostId) -> Result<Option<GroupId>, StoreError> {
            self.0.translation_group(post_id).await
        }

        async fn translations(&self, group: GroupId) -> Result<BTreeMap<String, PostId>, StoreError> {
            self.0.translations(group).await
        }

        async fn set_language_details(
            &self,
            post_id: PostId,
            group: Option<GroupId>,
            language: &str,
            source_language: Option<&str>,
        ) -> Result<GroupId, StoreError> {
            if source_language.is_some() {
                return Err(StoreError::Backend("link write failed".to_string()));
            }
            self.0
                .set_language_details(post_id, group, language, source_language)
                .await
        }

        async fn remove_language_details(&self, post_id: PostId) -> Result<(), StoreError> {
            self.0.remove_language_details(post_id).await
        }
    }

    #[tokio::test]
    async fn test_link_failure_after_field_writes_leaves_nothing() {
        let posts = Arc::new(MemoryPostStore::new());
        let links = Arc::new(MemoryLinkStore::new());
        let fields = Arc::new(MemoryFieldStore::new());
        fields.define(FieldDefinition::new("subtitle", "text", "Subtitle")).await;

        let post_id = posts
            .create_post(NewPost {
                title: "Bonjour".to_string(),
                body: String::new(),
                excerpt: String::new(),
                post_type: "post".to_string(),
                status: PostStatus::Publish,
                author_id: 1,
            })
            .await
            .unwrap();
        fields
            .put_raw(post_id, json!({"subtitle": "Salut"}).as_object().unwrap().clone())
            .await;

        let orchestrator = Orchestrator::new(
            posts.clone(),
            Arc::new(RejectingLinks(links.clone())),
            fields.clone(),
            Arc::new(MockTranslator::new()),
            OrchestratorSettings {
                source_language: "fr".to_string(),
                author_id: 1,
                call_timeout: Duration::from_secs(5),
            },
        );

        let results = orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();

        assert!(matches!(
            results["es"],
            TranslationOutcome::Failed(TranslateError::PersistenceFailure(_))
        ));
        assert_eq!(posts.len().await, 1);
        // The draft was id 2: its field values are gone with it
        assert!(fields.raw(post_id + 1).await.is_none());
        assert!(fields.raw(post_id).await.is_some());
        assert_eq!(links.translation_group(post_id).await.unwrap(), None);
    }

    // ==================== Status ====================

    #[tokio::test]
    async fn test_translation_status_reports_each_language() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;
        let results = env.orchestrator.translate(post_id, &langs(&["es"])).await.unwrap();
        let es_id = match results["es"] {
            TranslationOutcome::Created(id) => id,
            ref other => panic!("unexpected outcome {:?}", other),
        };

        let languages = vec!["fr".to_string(), "es".to_string(), "ar".to_string()];
        let status = env
            .orchestrator
            .translation_status(post_id, &languages)
            .await
            .unwrap();

        assert_eq!(
            status["fr"],
            LanguageStatus {
                exists: true,
                post_id: Some(post_id),
                status: Some(PostStatus::Publish),
            }
        );
        assert_eq!(
            status["es"],
            LanguageStatus {
                exists: true,
                post_id: Some(es_id),
                status: Some(PostStatus::Draft),
            }
        );
        assert_eq!(
            status["ar"],
            LanguageStatus {
                exists: false,
                post_id: None,
                status: None,
            }
        );
    }

    #[tokio::test]
    async fn test_translation_status_of_unlinked_and_missing_posts() {
        let env = env();
        let post_id = seed(&env, "Bonjour").await;

        let status = env
            .orchestrator
            .translation_status(post_id, &["es".to_string()])
            .await
            .unwrap();
        assert!(!status["es"].exists);

        assert!(matches!(
            env.orchestrator.translation_status(99, &["es".to_string()]).await,
            Err(TranslateError::InvalidInput(_))
        ));
        assert!(matches!(
            env.orchestrator.translation_status(post_id, &["??".to_string()]).await,
            Err(TranslateError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_document_round_trip() {
        let post = Post {
            id: 1,
            title: "T".to_string(),
            body: "B".to_string(),
            excerpt: "E".to_string(),
            post_type: "post".to_string(),
            status: PostStatus::Publish,
            author_id: 1,
        };
        let tree = document_tree(&post, vec![Field::text("x", "y")]);
        let doc = TranslatedDocument::from_tree(tree).unwrap();
        assert_eq!(doc.title, "T");
        assert_eq!(doc.body, "B");
        assert_eq!(doc.excerpt, "E");
        assert_eq!(doc.fields, vec![Field::text("x", "y")]);
    }

    #[test]
    fn test_document_missing_node_is_malformed() {
        let tree = vec![Field::text(TITLE_KEY, "T")];
        assert!(matches!(
            TranslatedDocument::from_tree(tree),
            Err(TranslateError::MalformedTree(_))
        ));
    }
}
