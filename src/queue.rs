//! Durable work list of (post, target language) translation requests.
//!
//! Item lifecycle: `Pending -> Processing -> {Completed | Failed}`, with
//! `Failed -> Pending` through [`Queue::retry_failed`] and, when a lease is
//! configured, `Processing -> Pending` through [`Queue::reclaim_stale`].

use crate::error::{StoreError, TranslateError};
use crate::orchestrator::{Orchestrator, TranslationOutcome};
use crate::scheduler::BatchSchedule;
use crate::store::PostId;
use crate::translator::is_valid_language_code;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(StoreError::Backend(format!("unknown queue status '{}'", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub post_id: PostId,
    pub target_language: String,
    pub status: QueueStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Summary of one `process_batch` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    /// Pending items left after the run.
    pub remaining: u64,
    /// Another run already held the batch lock; nothing was touched.
    pub skipped: bool,
}

/// Persistence for queue items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert one Pending item per pair, stamped with `now`.
    async fn insert_pending(
        &self,
        pairs: &[(PostId, String)],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Up to `limit` Pending items, oldest first (ties broken by id).
    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError>;

    /// Move a Pending item to Processing. Returns `false` if the item was not
    /// Pending anymore.
    async fn mark_processing(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn mark_finished(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn count_by_status(&self) -> Result<QueueStats, StoreError>;

    /// Failed -> Pending, clearing error and completion time.
    async fn reset_failed(&self) -> Result<u64, StoreError>;

    /// Delete Completed/Failed items finished before `cutoff`.
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Processing -> Pending for items started before `cutoff`.
    async fn reclaim_processing_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn items_for_posts(&self, post_ids: &[PostId]) -> Result<Vec<QueueItem>, StoreError>;
}

pub struct Queue {
    store: Arc<dyn QueueStore>,
    orchestrator: Arc<Orchestrator>,
    schedule: Arc<BatchSchedule>,
    batch_lock: Mutex<()>,
}

impl Queue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        orchestrator: Arc<Orchestrator>,
        schedule: Arc<BatchSchedule>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            schedule,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn schedule(&self) -> &Arc<BatchSchedule> {
        &self.schedule
    }

    /// Create one Pending item per (post, language) pair and make sure a batch
    /// run is scheduled. Repeated pairs within one call are queued once.
    pub async fn enqueue(
        &self,
        post_ids: &[PostId],
        languages: &[String],
    ) -> Result<Vec<QueueItem>, TranslateError> {
        if post_ids.is_empty() || languages.is_empty() {
            return Err(TranslateError::InvalidInput(
                "at least one post and one language are required".to_string(),
            ));
        }
        if let Some(bad) = languages.iter().find(|l| !is_valid_language_code(l)) {
            return Err(TranslateError::InvalidInput(format!(
                "invalid language code '{}'",
                bad
            )));
        }

        let mut seen = HashSet::new();
        let pairs: Vec<(PostId, String)> = post_ids
            .iter()
            .flat_map(|&post_id| languages.iter().map(move |lang| (post_id, lang.clone())))
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        let items = self.store.insert_pending(&pairs, Utc::now()).await?;
        info!("Queued {} translation item(s)", items.len());

        if self.schedule.request() {
            debug!("Batch run scheduled after enqueue");
        }
        Ok(items)
    }

    /// Process up to `limit` Pending items, oldest first.
    ///
    /// Per-item failures are recorded on the item and never returned. Only a
    /// failure to read the queue itself is an `Err`. A call that overlaps a
    /// running batch returns a report with `skipped` set.
    pub async fn process_batch(&self, limit: usize) -> Result<BatchReport, TranslateError> {
        if limit == 0 {
            return Err(TranslateError::InvalidInput(
                "batch limit must be at least 1".to_string(),
            ));
        }

        let Ok(_guard) = self.batch_lock.try_lock() else {
            warn!("Batch run requested while another is in flight, skipping");
            return Ok(BatchReport {
                skipped: true,
                ..BatchReport::default()
            });
        };

        let items = self.store.next_pending(limit).await?;
        let mut report = BatchReport {
            selected: items.len(),
            ..BatchReport::default()
        };

        for item in items {
            match self.process_item(&item).await {
                Some(QueueStatus::Completed) => report.completed += 1,
                Some(QueueStatus::Failed) => report.failed += 1,
                _ => {}
            }
        }

        report.remaining = self.store.count_by_status().await?.pending;
        if report.remaining > 0 && self.schedule.request() {
            debug!("{} item(s) still pending, batch run rescheduled", report.remaining);
        }

        info!(
            "Batch finished: {} selected, {} completed, {} failed, {} remaining",
            report.selected, report.completed, report.failed, report.remaining
        );
        Ok(report)
    }

    async fn process_item(&self, item: &QueueItem) -> Option<QueueStatus> {
        match self.store.mark_processing(item.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Queue item {} is no longer pending", item.id);
                return None;
            }
            Err(e) => {
                error!("Failed to mark queue item {} as processing: {}", item.id, e);
                return None;
            }
        }

        let languages = BTreeSet::from([item.target_language.clone()]);
        let outcome = match self.orchestrator.translate(item.post_id, &languages).await {
            Ok(mut results) => results.remove(&item.target_language).unwrap_or_else(|| {
                TranslationOutcome::Failed(TranslateError::InvalidInput(
                    "no outcome for requested language".to_string(),
                ))
            }),
            Err(e) => TranslationOutcome::Failed(e),
        };

        let (status, message) = match &outcome {
            TranslationOutcome::Created(_) | TranslationOutcome::Skipped(_) => {
                (QueueStatus::Completed, None)
            }
            TranslationOutcome::Failed(e) => (QueueStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .mark_finished(item.id, status, message.as_deref(), Utc::now())
            .await
        {
            error!(
                "Failed to record outcome of queue item {} (post {} -> {}): {}",
                item.id, item.post_id, item.target_language, e
            );
        }

        match &message {
            Some(msg) => warn!(
                "Queue item {} (post {} -> {}) failed: {}",
                item.id, item.post_id, item.target_language, msg
            ),
            None => debug!(
                "Queue item {} (post {} -> {}) completed",
                item.id, item.post_id, item.target_language
            ),
        }
        Some(status)
    }

    /// Reset every Failed item to Pending.
    pub async fn retry_failed(&self) -> Result<u64, TranslateError> {
        let reset = self.store.reset_failed().await?;
        if reset > 0 {
            info!("Reset {} failed item(s) to pending", reset);
            self.schedule.request();
        }
        Ok(reset)
    }

    /// Delete Completed/Failed items that finished more than `retention_days` ago.
    pub async fn purge_old(&self, retention_days: u32) -> Result<u64, TranslateError> {
        let cutoff = cutoff_before(Utc::now(), Duration::try_days(i64::from(retention_days)));
        let purged = self.store.purge_finished_before(cutoff).await?;
        if purged > 0 {
            info!("Purged {} finished item(s) older than {} day(s)", purged, retention_days);
        }
        Ok(purged)
    }

    /// Return items stuck in Processing for longer than `lease` to Pending.
    pub async fn reclaim_stale(&self, lease: Duration) -> Result<u64, TranslateError> {
        let reclaimed = self
            .store
            .reclaim_processing_before(cutoff_before(Utc::now(), Some(lease)))
            .await?;
        if reclaimed > 0 {
            warn!("Reclaimed {} item(s) stuck in processing", reclaimed);
            self.schedule.request();
        }
        Ok(reclaimed)
    }

    pub async fn stats(&self) -> Result<QueueStats, TranslateError> {
        Ok(self.store.count_by_status().await?)
    }

    pub async fn items_for_posts(&self, post_ids: &[PostId]) -> Result<Vec<QueueItem>, TranslateError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.items_for_posts(post_ids).await?)
    }
}

/// `now - age`, saturating at the earliest representable instant.
fn cutoff_before(now: DateTime<Utc>, age: Option<Duration>) -> DateTime<Utc> {
    age.and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
