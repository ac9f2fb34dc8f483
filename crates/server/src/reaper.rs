//! Background cleanup of abandoned and expired idempotency records.
//!
//! Two sweeps run on independent timers:
//! - the stale sweep fails `in_progress` records whose attempt died and
//!   removes any file that attempt had already written, then reclaims files
//!   still held by `failed` records from earlier attempts
//! - the retention sweep deletes terminal records past the retention window
//!
//! Both are also callable on demand. A scheduled tick that finds a sweep of
//! the same kind still running is skipped; manual calls wait their turn.

use crate::metrics::record_reaper;
use serde::Serialize;
use std::sync::Arc;
use stowage_core::config::CleanupConfig;
use stowage_core::{IdempotencyStatus, Result, STALE_TIMEOUT_MESSAGE};
use stowage_metadata::{FileRepo, IdempotencyRecordRow, IdempotencyRepo, MetadataStore};
use stowage_storage::ObjectStore;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Outcome of one stale sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub succeeded: u64,
    pub failed: u64,
    /// Leftover files of earlier failed attempts removed by this sweep.
    pub files_reclaimed: u64,
}

/// Remove the file a `failed` record still points at, then clear the pointer.
///
/// An object or row that is already gone counts as removed. The pointer is
/// only cleared once both are gone, so a failure here leaves the record for
/// the next sweep.
pub(crate) async fn reclaim_file(
    storage: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    record_id: i64,
    file_id: i64,
) -> Result<()> {
    if let Some(file) = metadata.get_file(file_id).await? {
        let removed = async {
            storage.delete_if_exists(&file.stored_filename).await?;
            metadata.delete_file(file.id).await?;
            Ok::<(), stowage_core::Error>(())
        }
        .await;
        if let Err(e) = removed {
            tracing::error!(
                record_id,
                file_id,
                key = %file.stored_filename,
                error = %e,
                "Failed to remove file left by failed upload"
            );
            return Err(e);
        }
        tracing::info!(
            record_id,
            file_id,
            key = %file.stored_filename,
            "Removed file left by failed upload"
        );
    } else {
        tracing::debug!(record_id, file_id, "Leftover file already gone");
    }

    metadata
        .detach_file(record_id, file_id, OffsetDateTime::now_utc())
        .await?;
    Ok(())
}

/// Runs the stale and retention sweeps.
pub struct Reaper {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: CleanupConfig,
    stale_guard: Mutex<()>,
    retention_guard: Mutex<()>,
}

impl Reaper {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
            stale_guard: Mutex::new(()),
            retention_guard: Mutex::new(()),
        }
    }

    fn stale_threshold(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() - self.config.stale_timeout()
    }

    /// Number of records the next stale sweep would consider.
    pub async fn count_stale_operations(&self) -> Result<u64> {
        Ok(self
            .metadata
            .count_stale(IdempotencyStatus::InProgress, self.stale_threshold())
            .await?)
    }

    /// Run a stale sweep, waiting for any sweep already in progress.
    pub async fn run_stale_sweep(&self) -> Result<SweepStats> {
        let _guard = self.stale_guard.lock().await;
        self.stale_sweep().await
    }

    /// Run a stale sweep unless one is already running.
    pub async fn try_run_stale_sweep(&self) -> Option<Result<SweepStats>> {
        let _guard = self.stale_guard.try_lock().ok()?;
        Some(self.stale_sweep().await)
    }

    /// Run a retention sweep, waiting for any sweep already in progress.
    pub async fn run_retention_sweep(&self) -> Result<u64> {
        let _guard = self.retention_guard.lock().await;
        self.retention_sweep().await
    }

    /// Run a retention sweep unless one is already running.
    pub async fn try_run_retention_sweep(&self) -> Option<Result<u64>> {
        let _guard = self.retention_guard.try_lock().ok()?;
        Some(self.retention_sweep().await)
    }

    #[tracing::instrument(skip_all)]
    async fn stale_sweep(&self) -> Result<SweepStats> {
        let candidates = self
            .metadata
            .find_stale(
                IdempotencyStatus::InProgress,
                self.stale_threshold(),
                self.config.stale_batch_size,
            )
            .await?;

        let mut stats = SweepStats::default();
        for record in &candidates {
            match self.reap_record(record).await {
                Ok(true) => stats.succeeded += 1,
                // Completed or failed by its own attempt since the query ran.
                Ok(false) => {}
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        record_id = record.id,
                        user_id = record.user_id,
                        error = %e,
                        "Failed to clean up stale operation"
                    );
                }
            }
        }

        let leftovers = self
            .metadata
            .find_failed_with_file(self.config.stale_batch_size)
            .await?;
        for record in &leftovers {
            let Some(file_id) = record.file_id else {
                continue;
            };
            match reclaim_file(&*self.storage, &*self.metadata, record.id, file_id).await {
                Ok(()) => stats.files_reclaimed += 1,
                Err(_) => stats.failed += 1,
            }
        }

        record_reaper("stale", "succeeded", stats.succeeded);
        record_reaper("stale", "failed", stats.failed);
        record_reaper("stale", "files_reclaimed", stats.files_reclaimed);
        if !candidates.is_empty() || !leftovers.is_empty() {
            tracing::info!(
                candidates = candidates.len(),
                leftovers = leftovers.len(),
                succeeded = stats.succeeded,
                failed = stats.failed,
                files_reclaimed = stats.files_reclaimed,
                "Stale operation sweep finished"
            );
        }
        Ok(stats)
    }

    /// Fail one abandoned record and remove the file its attempt wrote.
    /// Returns `false` if the record left `in_progress` before we got to it.
    async fn reap_record(&self, record: &IdempotencyRecordRow) -> Result<bool> {
        if !self
            .metadata
            .mark_failed(record.id, STALE_TIMEOUT_MESSAGE, OffsetDateTime::now_utc())
            .await?
        {
            return Ok(false);
        }

        // The attempt may have attached a file after the candidate query ran.
        let file_id = match self
            .metadata
            .find_by_owner_and_key(record.owner()?, record.key())
            .await?
        {
            Some(current) => current.file_id,
            None => None,
        };
        if let Some(file_id) = file_id {
            reclaim_file(&*self.storage, &*self.metadata, record.id, file_id).await?;
        }
        Ok(true)
    }

    #[tracing::instrument(skip_all)]
    async fn retention_sweep(&self) -> Result<u64> {
        let cutoff = OffsetDateTime::now_utc() - self.config.retention();
        let terminal: Vec<IdempotencyStatus> = IdempotencyStatus::ALL
            .into_iter()
            .filter(IdempotencyStatus::is_terminal)
            .collect();
        let deleted = self.metadata.delete_older_than(&terminal, cutoff).await?;

        record_reaper("retention", "deleted", deleted);
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "Retention sweep removed expired records");
        }
        Ok(deleted)
    }

    /// Start both sweeps on their configured intervals.
    ///
    /// Each tick runs on its own task, so a panic inside a sweep is logged and
    /// the next tick still fires.
    pub fn spawn_schedulers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let stale_interval = self.config.stale_interval();
        let retention_interval = self.config.retention_interval();

        let stale = {
            let reaper = self.clone();
            tokio::spawn(async move {
                tracing::info!(
                    interval_secs = stale_interval.as_secs(),
                    "Stale operation reaper started"
                );
                let mut ticker = tokio::time::interval(stale_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let reaper = reaper.clone();
                    let tick = tokio::spawn(async move { reaper.try_run_stale_sweep().await });
                    match tick.await {
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            tracing::error!(error = %e, "Stale operation sweep failed")
                        }
                        Ok(None) => {
                            tracing::debug!("Previous stale sweep still running; skipping tick")
                        }
                        Err(join_err) => {
                            tracing::error!(error = ?join_err, "Stale operation sweep panicked")
                        }
                    }
                }
            })
        };

        let retention = tokio::spawn(async move {
            tracing::info!(
                interval_secs = retention_interval.as_secs(),
                "Retention reaper started"
            );
            let mut ticker = tokio::time::interval(retention_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaper = self.clone();
                let tick = tokio::spawn(async move { reaper.try_run_retention_sweep().await });
                match tick.await {
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => tracing::error!(error = %e, "Retention sweep failed"),
                    Ok(None) => {
                        tracing::debug!("Previous retention sweep still running; skipping tick")
                    }
                    Err(join_err) => {
                        tracing::error!(error = ?join_err, "Retention sweep panicked")
                    }
                }
            }
        });

        vec![stale, retention]
    }
}
