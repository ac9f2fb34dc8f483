//! Upload orchestration.
//!
//! Runs the write sequence for a request the coordinator allowed to
//! proceed: stream the body to the object store, record the file, presign a
//! download link, then complete the idempotency record. Any failure marks
//! the record failed and is returned unchanged. Nothing is rolled back
//! inline; the stale reaper or the next retry of the key reclaims the file.
//!
//! An attempt that loses its record to cleanup (attach or completion is
//! refused) discards the file it wrote and fails with `Abandoned`.

use crate::idempotency::{Decision, IdempotencyCoordinator};
use crate::metrics::{UPLOAD_BYTES, UPLOAD_DURATION, record_upload_outcome};
use crate::reaper::reclaim_file;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stowage_core::{
    DEFAULT_CONTENT_TYPE, Error, FileUploadResponse, IdempotencyKey, OwnerId, Result, StoredKey,
};
use stowage_metadata::{FileRepo, IdempotencyRepo, MetadataStore, NewFileRow};
use stowage_storage::{ByteStream, ObjectStore};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Parameters of one upload request, validated by the caller.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: OwnerId,
    pub key: IdempotencyKey,
    /// External workflow to link the record to once the request proceeds.
    pub saga_id: Option<Uuid>,
    pub filename: String,
    /// `None` or empty falls back to `application/octet-stream`.
    pub content_type: Option<String>,
}

impl UploadRequest {
    fn effective_content_type(&self) -> &str {
        match self.content_type.as_deref() {
            Some(ct) if !ct.trim().is_empty() => ct,
            _ => DEFAULT_CONTENT_TYPE,
        }
    }
}

/// Composes the idempotency coordinator with the write sequence.
#[derive(Clone)]
pub struct UploadOrchestrator {
    coordinator: Arc<IdempotencyCoordinator>,
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    presign_ttl: Duration,
    refresh_download_url_on_replay: bool,
}

impl UploadOrchestrator {
    pub fn new(
        coordinator: Arc<IdempotencyCoordinator>,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        presign_ttl: Duration,
        refresh_download_url_on_replay: bool,
    ) -> Self {
        Self {
            coordinator,
            storage,
            metadata,
            presign_ttl,
            refresh_download_url_on_replay,
        }
    }

    pub fn coordinator(&self) -> &Arc<IdempotencyCoordinator> {
        &self.coordinator
    }

    /// Handle an upload end to end.
    ///
    /// The body is only consumed when the request proceeds. New work runs on
    /// its own task, so a caller that stops waiting does not cancel it; the
    /// record still ends up completed or failed.
    #[tracing::instrument(
        skip_all,
        fields(owner = %request.owner, key = %request.key.as_uuid())
    )]
    pub async fn handle_upload(
        &self,
        request: UploadRequest,
        body: ByteStream,
    ) -> Result<FileUploadResponse> {
        let mut decision = self.coordinator.decide(request.owner, request.key).await?;
        if let Decision::Reclaim { record_id, file_id } = decision {
            tracing::info!(record_id, file_id, "Reclaiming file of failed attempt before retry");
            reclaim_file(&*self.storage, &*self.metadata, record_id, file_id).await?;
            decision = self.coordinator.decide(request.owner, request.key).await?;
        }

        match decision {
            Decision::Replay(response) => {
                record_upload_outcome("replay");
                tracing::info!(file_id = response.file_id, "Replaying stored upload response");
                Ok(self.refresh_replayed(request.owner, response).await)
            }
            // A second reclaim means another retry got there first.
            Decision::Conflict | Decision::Reclaim { .. } => {
                record_upload_outcome("conflict");
                Err(Error::Conflict {
                    key: request.key.as_uuid().to_string(),
                })
            }
            Decision::Proceed => {
                if let Some(saga_id) = request.saga_id
                    && let Err(e) = self
                        .coordinator
                        .link_to_saga(request.owner, request.key, saga_id)
                        .await
                {
                    tracing::warn!(%saga_id, error = %e, "Failed to link upload to saga");
                }

                let this = self.clone();
                let task = tokio::spawn(
                    async move { this.execute(request, body).await }.in_current_span(),
                );

                match task.await {
                    Ok(Ok(response)) => {
                        record_upload_outcome("success");
                        Ok(response)
                    }
                    Ok(Err(e)) => {
                        record_upload_outcome(match e {
                            Error::Abandoned { .. } => "abandoned",
                            _ => "failure",
                        });
                        Err(e)
                    }
                    Err(join_err) => {
                        record_upload_outcome("failure");
                        tracing::error!(error = %join_err, "Upload task did not finish");
                        Err(Error::InternalConsistency(format!(
                            "upload task aborted: {join_err}"
                        )))
                    }
                }
            }
        }
    }

    /// Perform the write sequence for a request that already holds an
    /// `in_progress` record. On error the record is marked failed, unless the
    /// attempt was abandoned and no longer owns it.
    pub async fn execute(
        &self,
        request: UploadRequest,
        body: ByteStream,
    ) -> Result<FileUploadResponse> {
        let started = Instant::now();

        match self.write_and_record(&request, body).await {
            Ok(response) => {
                UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
                tracing::info!(
                    file_id = response.file_id,
                    file_size = response.file_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upload completed"
                );
                Ok(response)
            }
            // The record belongs to cleanup or another attempt now.
            Err(e @ Error::Abandoned { .. }) => {
                tracing::warn!(error = %e, "Upload abandoned");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed");
                if let Err(mark_err) = self
                    .coordinator
                    .fail(request.owner, request.key, &e.to_string())
                    .await
                {
                    tracing::error!(
                        error = %mark_err,
                        "Failed to mark idempotency record failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn write_and_record(
        &self,
        request: &UploadRequest,
        body: ByteStream,
    ) -> Result<FileUploadResponse> {
        let content_type = request.effective_content_type().to_string();
        let stored_key = StoredKey::generate(request.owner, &request.filename);

        let put = self
            .storage
            .put_byte_stream(stored_key.as_str(), &content_type, body)
            .await?;
        let file_size = i64::try_from(put.bytes_written).map_err(|_| {
            Error::InternalConsistency(format!("byte count {} overflows", put.bytes_written))
        })?;
        tracing::debug!(key = %stored_key, bytes = put.bytes_written, "Stored upload body");

        let file = self
            .metadata
            .insert_file(&NewFileRow {
                user_id: request.owner.get(),
                original_filename: request.filename.clone(),
                stored_filename: stored_key.as_str().to_string(),
                content_type: content_type.clone(),
                file_size,
                storage_url: put.locator,
                bucket_name: self.storage.container_name().to_string(),
                uploaded_at: OffsetDateTime::now_utc(),
            })
            .await?;

        match self
            .coordinator
            .attach_file(request.owner, request.key, file.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(self.abandon(request, file.id, &stored_key).await),
            Err(e) => {
                // Nothing points at the file yet, so nobody else would find it.
                self.discard(file.id, &stored_key).await;
                return Err(e);
            }
        }

        let download_url = self
            .storage
            .presign_download(stored_key.as_str(), self.presign_ttl)
            .await?;

        let response = FileUploadResponse {
            file_id: file.id,
            original_filename: file.original_filename,
            file_size: file.file_size,
            content_type: file.content_type,
            download_url,
            uploaded_at: file.uploaded_at,
            message: None,
        };

        if !self
            .coordinator
            .complete(request.owner, request.key, file.id, &response)
            .await?
        {
            return Err(self.abandon(request, file.id, &stored_key).await);
        }
        UPLOAD_BYTES.inc_by(put.bytes_written);

        Ok(response)
    }

    /// Drop the file of an attempt that no longer owns its record, and clear
    /// the record's pointer to it if one is still there.
    async fn abandon(
        &self,
        request: &UploadRequest,
        file_id: i64,
        stored_key: &StoredKey,
    ) -> Error {
        if self.discard(file_id, stored_key).await {
            match self
                .metadata
                .find_by_owner_and_key(request.owner, request.key)
                .await
            {
                Ok(Some(record)) if record.file_id == Some(file_id) => {
                    if let Err(e) = self
                        .metadata
                        .detach_file(record.id, file_id, OffsetDateTime::now_utc())
                        .await
                    {
                        tracing::warn!(record_id = record.id, file_id, error = %e, "Could not detach discarded file");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(file_id, error = %e, "Could not load idempotency record after discarding file");
                }
            }
        }
        Error::Abandoned {
            key: request.key.as_uuid().to_string(),
        }
    }

    /// Delete an object and its file row. Returns whether both are gone.
    async fn discard(&self, file_id: i64, stored_key: &StoredKey) -> bool {
        let removed = async {
            self.storage.delete_if_exists(stored_key.as_str()).await?;
            self.metadata.delete_file(file_id).await?;
            Ok::<(), Error>(())
        }
        .await;
        match removed {
            Ok(()) => {
                tracing::info!(file_id, key = %stored_key, "Discarded file of abandoned upload");
                true
            }
            Err(e) => {
                tracing::error!(
                    file_id,
                    key = %stored_key,
                    error = %e,
                    "Failed to discard file of abandoned upload"
                );
                false
            }
        }
    }

    /// Optionally swap in a fresh download link for a replayed response.
    async fn refresh_replayed(
        &self,
        owner: OwnerId,
        mut response: FileUploadResponse,
    ) -> FileUploadResponse {
        if !self.refresh_download_url_on_replay {
            return response;
        }

        let file = match self.metadata.get_file_for_owner(response.file_id, owner).await {
            Ok(Some(file)) => file,
            Ok(None) => return response,
            Err(e) => {
                tracing::warn!(file_id = response.file_id, error = %e, "Could not load file for replay refresh");
                return response;
            }
        };

        match self
            .storage
            .presign_download(&file.stored_filename, self.presign_ttl)
            .await
        {
            Ok(url) => response.download_url = url,
            Err(e) => {
                tracing::warn!(file_id = file.id, error = %e, "Could not refresh download url on replay");
            }
        }
        response
    }
}
