use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ledger::{AttemptStatus, UploadLedger, UploadRow};
use super::queue::UploadQueue;
use super::thumbnail;
use super::validate;
use crate::api::CourseApi;
use crate::config::Config;
use crate::error::{ApiError, ErrorType};
use crate::model::{
    AssetDescriptor, BatchStatus, RawInput, RequestStatus, Resource, ResourceId, ResourceStatus,
};
use crate::registry::ResourceRegistry;
use crate::shared::lock;
use crate::status::{Slot, StatusBoard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Upload again, replacing the existing resource.
    Overwrite,
    /// Drop the conflicting inputs.
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    pub batch_status: BatchStatus,
    pub in_flight: usize,
    pub rows: Vec<UploadRow>,
    /// Names waiting for a conflict decision.
    pub conflicts: Vec<String>,
}

/// Drives every upload of one page session.
///
/// Each accepted input gets a placeholder in the registry and an entry in the
/// ledger, then runs as its own task. Completions only touch their own entry.
pub struct UploadCoordinator {
    course_id: String,
    api: Arc<dyn CourseApi>,
    pub(super) registry: Arc<ResourceRegistry>,
    pub(super) status: Arc<StatusBoard>,
    config: Arc<Config>,
    queue: UploadQueue,
    pub(super) ledger: Mutex<UploadLedger>,
    conflicts: Mutex<Vec<RawInput>>,
    /// Replaced on every cancellation; tasks spawned before it observe the cancel.
    pub(super) epoch: Mutex<CancellationToken>,
    pub(super) batch_tx: watch::Sender<BatchStatus>,
}

impl UploadCoordinator {
    pub fn new(
        course_id: impl Into<String>,
        api: Arc<dyn CourseApi>,
        registry: Arc<ResourceRegistry>,
        status: Arc<StatusBoard>,
        config: Arc<Config>,
    ) -> Self {
        let (batch_tx, _) = watch::channel(BatchStatus::Idle);
        Self {
            course_id: course_id.into(),
            api,
            registry,
            status,
            queue: UploadQueue::new(config.max_concurrent_uploads),
            config,
            ledger: Mutex::new(UploadLedger::new()),
            conflicts: Mutex::new(Vec::new()),
            epoch: Mutex::new(CancellationToken::new()),
            batch_tx,
        }
    }

    /// Validate and start uploading a batch. Outcomes are observed through the
    /// registry, the batch status and the `add` errors.
    pub fn submit_batch(self: &Arc<Self>, inputs: Vec<RawInput>) {
        let fresh = lock(&self.ledger).is_empty();
        if fresh {
            self.status.reset_errors(ErrorType::Add);
        }

        let screened =
            validate::screen(inputs, &self.config, |kind| self.registry.display_names(kind));

        for rejection in &screened.rejected {
            tracing::warn!(name = %rejection.name, err = %rejection.error, "input rejected");
            self.status.push_error(ErrorType::Add, rejection.error.to_string());
        }
        if !screened.conflicts.is_empty() {
            tracing::info!(count = screened.conflicts.len(), "inputs conflict with existing resources");
            lock(&self.conflicts).extend(screened.conflicts);
        }

        if screened.accepted.is_empty() {
            if fresh && !screened.rejected.is_empty() {
                self.status.set(Slot::Adding, RequestStatus::Failed);
            }
            return;
        }
        self.schedule(screened.accepted, false);
    }

    pub fn pending_conflicts(&self) -> Vec<String> {
        lock(&self.conflicts).iter().map(|i| i.name.clone()).collect()
    }

    /// Settle every pending conflict. Returns the number of inputs re-submitted.
    pub fn resolve_conflicts(self: &Arc<Self>, resolution: ConflictResolution) -> usize {
        let inputs = std::mem::take(&mut *lock(&self.conflicts));
        match resolution {
            ConflictResolution::Skip => {
                tracing::info!(count = inputs.len(), "skipping conflicting inputs");
                0
            }
            ConflictResolution::Overwrite => {
                let count = inputs.len();
                for input in inputs {
                    if let Err(err) = self.upload_one(input, true) {
                        tracing::warn!(?err, "overwrite upload rejected");
                    }
                }
                count
            }
        }
    }

    /// Single-item path. With `overwrite` the duplicate check is skipped and the
    /// server is asked to replace the existing resource.
    pub fn upload_one(self: &Arc<Self>, input: RawInput, overwrite: bool) -> Result<(), ApiError> {
        if let Err(err) = validate::validate(&input, &self.config) {
            self.status.push_error(ErrorType::Add, err.to_string());
            return Err(err);
        }
        if !overwrite
            && self.config.profile(input.kind).detect_duplicates
            && self.registry.display_names(input.kind).contains(&input.name)
        {
            let err = ApiError::Conflict {
                name: input.name.clone(),
            };
            lock(&self.conflicts).push(input);
            return Err(err);
        }
        self.schedule(vec![input], overwrite);
        Ok(())
    }

    fn schedule(self: &Arc<Self>, inputs: Vec<RawInput>, overwrite: bool) {
        let mut jobs = Vec::with_capacity(inputs.len());
        let token = {
            let mut ledger = lock(&self.ledger);
            for input in inputs {
                let transient_id = Uuid::new_v4();
                self.registry
                    .upsert(Resource::placeholder(transient_id, &input));
                ledger.insert(transient_id, input.clone(), overwrite);
                tracing::debug!(%transient_id, name = %input.name, overwrite, "upload queued");
                jobs.push((transient_id, input));
            }
            self.status.set(Slot::Adding, RequestStatus::InProgress);
            self.batch_tx.send_replace(ledger.status());
            lock(&self.epoch).clone()
        };

        for (transient_id, input) in jobs {
            let coordinator = Arc::clone(self);
            let token = token.clone();
            self.queue.spawn(async move {
                coordinator
                    .run_item(transient_id, input, overwrite, token)
                    .await;
            });
        }
    }

    async fn run_item(
        self: Arc<Self>,
        transient_id: Uuid,
        input: RawInput,
        overwrite: bool,
        token: CancellationToken,
    ) {
        {
            let mut ledger = lock(&self.ledger);
            if !ledger.mark_uploading(transient_id) {
                tracing::debug!(%transient_id, "upload no longer queued");
                return;
            }
            self.registry
                .transition(&ResourceId::Transient(transient_id), ResourceStatus::Uploading);
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(%transient_id, "upload cancelled");
                return;
            }
            result = self.api.create_asset(&self.course_id, &input, overwrite) => result,
        };

        let Some(remote_id) = self.complete(transient_id, &input, result) else {
            return;
        };

        if let Some(poster) = input.poster.clone() {
            if self.config.profile(input.kind).thumbnail_follow_up {
                // Best effort: failures land under `thumbnail` only.
                let _ = self.add_thumbnail(&remote_id, poster).await;
            }
        }
    }

    /// Apply one transfer outcome. Returns the remote id on success, or `None`
    /// for failures and for completions whose entry was already cancelled.
    fn complete(
        &self,
        transient_id: Uuid,
        input: &RawInput,
        result: Result<AssetDescriptor, ApiError>,
    ) -> Option<String> {
        let mut ledger = lock(&self.ledger);
        if !ledger.contains(transient_id) {
            tracing::debug!(%transient_id, name = %input.name, "discarding late completion");
            return None;
        }
        let id = ResourceId::Transient(transient_id);

        let remote_id = match result {
            Ok(descriptor) => {
                let resource = Resource::from_descriptor(input.kind, descriptor);
                let remote_id = resource.id.to_string();
                let failed = resource.status == ResourceStatus::Failed;
                self.registry.promote(transient_id, resource);
                if failed {
                    tracing::warn!(%transient_id, %remote_id, name = %input.name, "server reported the upload as failed");
                    ledger.settle(transient_id, AttemptStatus::Failed);
                    self.status.push_error(
                        ErrorType::Add,
                        format!("{}: the server reported the upload as failed", input.name),
                    );
                    None
                } else {
                    ledger.settle(transient_id, AttemptStatus::Ready);
                    tracing::info!(%transient_id, %remote_id, name = %input.name, "upload finished");
                    Some(remote_id)
                }
            }
            Err(err) if err.is_permission() => {
                tracing::warn!(%transient_id, name = %input.name, ?err, "upload denied");
                self.registry.transition(&id, ResourceStatus::Failed);
                ledger.settle(transient_id, AttemptStatus::Denied);
                None
            }
            Err(err) => {
                tracing::warn!(%transient_id, name = %input.name, ?err, "upload failed");
                if let ApiError::Conflict { .. } = &err {
                    self.registry.remove(&id);
                    lock(&self.conflicts).push(input.clone());
                } else {
                    self.registry.transition(&id, ResourceStatus::Failed);
                }
                ledger.settle(transient_id, AttemptStatus::Failed);
                self.status
                    .push_error(ErrorType::Add, format!("{}: {err}", input.name));
                None
            }
        };

        self.publish(&ledger);
        remote_id
    }

    pub(super) fn publish(&self, ledger: &UploadLedger) {
        let batch = ledger.status();
        match batch {
            BatchStatus::InProgress | BatchStatus::Idle => {}
            _ if ledger.denied() => self.status.set(Slot::Adding, RequestStatus::Denied),
            _ => self.status.set(Slot::Adding, batch.request_status()),
        }
        if batch != BatchStatus::InProgress {
            tracing::info!(course_id = %self.course_id, ?batch, "upload batch settled");
        }
        self.batch_tx.send_replace(batch);
    }

    /// Resample `image` and post it as the thumbnail of `video_id`. Failures are
    /// recorded under `thumbnail`.
    pub async fn add_thumbnail(&self, video_id: &str, image: Arc<[u8]>) -> Result<(), ApiError> {
        match self.post_thumbnail(video_id, image).await {
            Ok(reference) => {
                if let Some(reference) = reference {
                    self.registry
                        .set_thumbnail(&ResourceId::remote(video_id), reference);
                }
                tracing::info!(video_id, "thumbnail uploaded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(video_id, ?err, "thumbnail failed");
                if !err.is_permission() {
                    self.status
                        .push_error(ErrorType::Thumbnail, format!("{video_id}: {err}"));
                }
                Err(err)
            }
        }
    }

    async fn post_thumbnail(
        &self,
        video_id: &str,
        image: Arc<[u8]>,
    ) -> Result<Option<String>, ApiError> {
        let thumb = thumbnail::resample_blocking(image, self.config.thumbnail).await?;
        self.api
            .upload_thumbnail(&self.course_id, video_id, &thumb)
            .await
    }

    pub fn batch_status(&self) -> BatchStatus {
        *self.batch_tx.borrow()
    }

    pub fn is_uploading(&self) -> bool {
        !lock(&self.ledger).is_empty()
    }

    /// Wait until no upload of the current batch is in flight.
    pub async fn wait_settled(&self) -> BatchStatus {
        let mut rx = self.batch_tx.subscribe();
        match rx.wait_for(|status| *status != BatchStatus::InProgress).await {
            Ok(status) => *status,
            Err(_) => self.batch_status(),
        }
    }

    /// Wait for every spawned task, thumbnail follow-ups included.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        let ledger = lock(&self.ledger);
        UploadSnapshot {
            batch_status: ledger.status(),
            in_flight: ledger.len(),
            rows: ledger.rows(),
            conflicts: self.pending_conflicts(),
        }
    }
}
