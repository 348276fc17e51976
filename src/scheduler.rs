use crate::queue::Queue;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

/// One-shot "run a batch soon" signal shared by the queue and its worker.
///
/// At most one run is scheduled at a time: `request` only wakes the worker
/// when the flag flips from unset to set.
#[derive(Debug, Default)]
pub struct BatchSchedule {
    scheduled: AtomicBool,
    notify: Notify,
}

impl BatchSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a run. Returns `false` if one was already scheduled.
    pub fn request(&self) -> bool {
        let newly_set = !self.scheduled.swap(true, Ordering::AcqRel);
        if newly_set {
            self.notify.notify_one();
        }
        newly_set
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Consume the scheduled run.
    pub fn clear(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    /// Wait until a run has been requested.
    pub async fn wait(&self) {
        while !self.is_scheduled() {
            self.notify.notified().await;
        }
    }
}

/// Spawn the task that turns schedule requests into batch runs.
///
/// Each request fires once, `delay` after it was made. The flag is cleared
/// before the batch starts so the batch itself can reschedule.
pub fn spawn_queue_worker(queue: Arc<Queue>, delay: Duration, batch_size: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Queue worker started (batch size {}, delay {}s)",
            batch_size,
            delay.as_secs()
        );
        loop {
            queue.schedule().wait().await;
            tokio::time::sleep(delay).await;
            queue.schedule().clear();

            match queue.process_batch(batch_size).await {
                Ok(report) if report.skipped => debug!("Scheduled batch skipped, one is already running"),
                Ok(_) => {}
                Err(e) => error!("Scheduled batch failed: {}", e),
            }
        }
    })
}

/// Settings for the periodic maintenance job.
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub cron: String,
    pub retention_days: u32,
    pub lease: Option<chrono::Duration>,
}

/// Start the cron scheduler that purges, reclaims and sweeps the queue.
pub async fn start_maintenance(queue: Arc<Queue>, settings: MaintenanceSettings) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    info!("Scheduling queue maintenance (cron: {})", settings.cron);

    let job_settings = settings.clone();
    let job = Job::new_async(settings.cron.as_str(), move |_uuid, _l| {
        let queue = Arc::clone(&queue);
        let settings = job_settings.clone();

        Box::pin(async move {
            info!("⏰ Queue maintenance triggered");
            if let Err(e) = run_maintenance(&queue, &settings).await {
                error!("Queue maintenance failed: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

/// One maintenance pass: purge old finished items, reclaim stale ones if a
/// lease is configured, and make sure pending work has a run scheduled.
pub async fn run_maintenance(queue: &Queue, settings: &MaintenanceSettings) -> Result<()> {
    queue.purge_old(settings.retention_days).await?;

    if let Some(lease) = settings.lease {
        queue.reclaim_stale(lease).await?;
    }

    // Covers runs lost to a restart
    let stats = queue.stats().await?;
    if stats.pending > 0 && queue.schedule().request() {
        info!("{} pending item(s) found by sweep, batch run scheduled", stats.pending);
    }

    Ok(())
}
