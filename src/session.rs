use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{AssetPatch, CourseApi};
use crate::config::Config;
use crate::error::{ApiError, ErrorType};
use crate::link_check::{ScanJobController, ScanSnapshot};
use crate::model::{
    BatchStatus, RawInput, RequestStatus, Resource, ResourceId, UsageLocation,
};
use crate::registry::{RegistrySnapshot, ResourceRegistry};
use crate::status::{Slot, StatusBoard, StatusSnapshot};
use crate::upload::{ConflictResolution, UnloadGuard, UploadCoordinator, UploadSnapshot};

/// Everything the view layer renders, taken at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub course_id: String,
    pub registry: RegistrySnapshot,
    pub status: StatusSnapshot,
    pub uploads: UploadSnapshot,
    pub link_check: ScanSnapshot,
}

/// Body of one downloaded resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub id: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One page session against one course.
///
/// Owns the registry, the status board, the upload coordinator and the
/// link-check controller, and handles the operations whose effect is only
/// applied locally once the server confirmed it.
pub struct CourseSession {
    course_id: String,
    api: Arc<dyn CourseApi>,
    registry: Arc<ResourceRegistry>,
    status: Arc<StatusBoard>,
    uploads: Arc<UploadCoordinator>,
    link_check: Arc<ScanJobController>,
}

impl CourseSession {
    pub fn new(course_id: impl Into<String>, api: Arc<dyn CourseApi>, config: Config) -> Self {
        let course_id = course_id.into();
        let registry = Arc::new(ResourceRegistry::new());
        let status = Arc::new(StatusBoard::new());
        let link_check = Arc::new(ScanJobController::new(
            course_id.clone(),
            Arc::clone(&api),
            Arc::clone(&status),
            config.stage_table.clone(),
            config.poll_interval,
        ));
        let uploads = Arc::new(UploadCoordinator::new(
            course_id.clone(),
            Arc::clone(&api),
            Arc::clone(&registry),
            Arc::clone(&status),
            Arc::new(config),
        ));
        Self {
            course_id,
            api,
            registry,
            status,
            uploads,
            link_check,
        }
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn uploads(&self) -> &Arc<UploadCoordinator> {
        &self.uploads
    }

    /// Load the course's resources, replacing whatever was loaded before.
    pub async fn fetch_assets(&self) -> Result<(), ApiError> {
        self.status.reset_errors(ErrorType::Load);
        self.status.set(Slot::Loading, RequestStatus::InProgress);
        match self.api.list_assets(&self.course_id).await {
            Ok(descriptors) => {
                let count = descriptors.len();
                let resources = descriptors
                    .into_iter()
                    .map(|d| Resource::from_descriptor(d.kind(), d))
                    .collect();
                self.registry.replace_all(resources);
                self.status.set(Slot::Loading, RequestStatus::Successful);
                tracing::info!(course_id = %self.course_id, count, "assets loaded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(course_id = %self.course_id, ?err, "asset load failed");
                self.status.fail(Slot::Loading, ErrorType::Load, &err);
                Err(err)
            }
        }
    }

    pub async fn delete_asset(&self, asset_id: &str) -> Result<(), ApiError> {
        self.status.reset_errors(ErrorType::Delete);
        self.status.set(Slot::Deleting, RequestStatus::InProgress);
        match self.api.delete_asset(&self.course_id, asset_id).await {
            Ok(()) => {
                self.registry.remove(&ResourceId::remote(asset_id));
                self.status.set(Slot::Deleting, RequestStatus::Successful);
                tracing::info!(asset_id, "asset deleted");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(asset_id, ?err, "asset delete failed");
                self.status.fail(Slot::Deleting, ErrorType::Delete, &err);
                Err(err)
            }
        }
    }

    pub async fn set_lock(&self, asset_id: &str, locked: bool) -> Result<(), ApiError> {
        self.status.reset_errors(ErrorType::Lock);
        self.status.set(Slot::Updating, RequestStatus::InProgress);
        let id = ResourceId::remote(asset_id);
        match self
            .api
            .update_asset(&self.course_id, asset_id, &AssetPatch::lock(locked))
            .await
        {
            Ok(descriptor) => {
                let kind = self
                    .registry
                    .get(&id)
                    .map(|r| r.kind)
                    .unwrap_or_else(|| descriptor.kind());
                self.registry
                    .upsert(Resource::from_descriptor(kind, descriptor));
                self.registry.set_lock(&id, locked);
                self.status.set(Slot::Updating, RequestStatus::Successful);
                tracing::debug!(asset_id, locked, "lock updated");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(asset_id, locked, ?err, "lock update failed");
                self.status.fail(Slot::Updating, ErrorType::Lock, &err);
                Err(err)
            }
        }
    }

    /// Reorder optimistically, then confirm each new position with the server.
    /// The first failure rolls the whole projection back.
    pub async fn reorder(&self, asset_ids: &[String], sort_key: &str) -> Result<(), ApiError> {
        self.status.reset_errors(ErrorType::Update);
        self.status.set(Slot::Saving, RequestStatus::InProgress);
        let ids: Vec<ResourceId> = asset_ids.iter().map(ResourceId::remote).collect();
        let token = self.registry.reorder(&ids, sort_key);

        for (index, asset_id) in asset_ids.iter().enumerate() {
            let patch = AssetPatch::order(index, sort_key);
            if let Err(err) = self
                .api
                .update_asset(&self.course_id, asset_id, &patch)
                .await
            {
                tracing::warn!(asset_id = %asset_id, ?err, "reorder failed; rolling back");
                self.registry.rollback_reorder(token);
                self.status.fail(Slot::Saving, ErrorType::Update, &err);
                return Err(err);
            }
        }

        self.registry.confirm_reorder(token);
        self.status.set(Slot::Saving, RequestStatus::Successful);
        tracing::debug!(count = asset_ids.len(), sort_key, "reorder confirmed");
        Ok(())
    }

    /// Where the resource is referenced. Served from the cache when present.
    pub async fn usage_paths(&self, asset_id: &str) -> Result<Vec<UsageLocation>, ApiError> {
        let id = ResourceId::remote(asset_id);
        if let Some(cached) = self.registry.cached_usage(&id) {
            return Ok(cached);
        }
        self.status.reset_errors(ErrorType::Usage);
        self.status.set(Slot::Usage, RequestStatus::InProgress);
        match self.api.usage(&self.course_id, asset_id).await {
            Ok(usage) => {
                self.registry.set_usage(&id, usage.clone());
                self.status.set(Slot::Usage, RequestStatus::Successful);
                Ok(usage)
            }
            Err(err) => {
                tracing::warn!(asset_id, ?err, "usage lookup failed");
                self.status.fail(Slot::Usage, ErrorType::Usage, &err);
                Err(err)
            }
        }
    }

    /// Replace the thumbnail of an existing video with `image`.
    pub async fn add_thumbnail(
        &self,
        video_id: &str,
        image: impl Into<Arc<[u8]>>,
    ) -> Result<(), ApiError> {
        self.status.reset_errors(ErrorType::Thumbnail);
        self.status.set(Slot::Updating, RequestStatus::InProgress);
        match self.uploads.add_thumbnail(video_id, image.into()).await {
            Ok(()) => {
                self.status.set(Slot::Updating, RequestStatus::Successful);
                Ok(())
            }
            Err(err) => {
                let settled = if err.is_permission() {
                    RequestStatus::Denied
                } else {
                    RequestStatus::Failed
                };
                self.status.set(Slot::Updating, settled);
                Err(err)
            }
        }
    }

    /// Fetch the selected resources. Each item is attempted on its own; the ones
    /// that fail are recorded under `download` and left out of the result.
    pub async fn download_assets(&self, asset_ids: &[String]) -> Vec<DownloadedAsset> {
        self.status.reset_errors(ErrorType::Download);
        self.status.set(Slot::Downloading, RequestStatus::InProgress);
        let mut downloaded = Vec::with_capacity(asset_ids.len());
        let mut settled = RequestStatus::Successful;

        for asset_id in asset_ids {
            match self.download_one(asset_id).await {
                Ok(asset) => downloaded.push(asset),
                Err(err) if err.is_permission() => {
                    tracing::warn!(asset_id = %asset_id, ?err, "download denied");
                    if settled == RequestStatus::Successful {
                        settled = RequestStatus::Denied;
                    }
                }
                Err(err) => {
                    tracing::warn!(asset_id = %asset_id, ?err, "download failed");
                    settled = RequestStatus::Failed;
                    self.status
                        .push_error(ErrorType::Download, format!("{asset_id}: {err}"));
                }
            }
        }

        self.status.set(Slot::Downloading, settled);
        tracing::info!(
            requested = asset_ids.len(),
            downloaded = downloaded.len(),
            "download finished"
        );
        downloaded
    }

    async fn download_one(&self, asset_id: &str) -> Result<DownloadedAsset, ApiError> {
        let resource = self
            .registry
            .get(&ResourceId::remote(asset_id))
            .ok_or_else(|| ApiError::validation(format!("unknown resource {asset_id}")))?;
        let url = resource.url.as_deref().ok_or_else(|| {
            ApiError::validation(format!("no download url for {}", resource.display_name))
        })?;
        let bytes = self.api.download(url).await?;
        Ok(DownloadedAsset {
            id: asset_id.to_owned(),
            name: resource.display_name,
            bytes,
        })
    }

    pub fn submit_batch(&self, inputs: Vec<RawInput>) {
        self.uploads.submit_batch(inputs);
    }

    pub fn resolve_conflicts(&self, resolution: ConflictResolution) -> usize {
        self.uploads.resolve_conflicts(resolution)
    }

    pub async fn wait_uploads(&self) -> BatchStatus {
        self.uploads.wait_settled().await
    }

    pub fn cancel_all(&self) -> usize {
        self.uploads.cancel_all()
    }

    pub fn unload_guard(&self) -> UnloadGuard {
        UnloadGuard::new(Arc::clone(&self.uploads))
    }

    pub fn start_link_check(&self) -> u64 {
        self.link_check.start_scan()
    }

    pub async fn run_link_check(&self) -> ScanSnapshot {
        self.link_check.run_to_completion().await
    }

    pub fn set_error_modal_open(&self, open: bool) {
        self.status.set_error_modal_open(open);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            course_id: self.course_id.clone(),
            registry: self.registry.snapshot(),
            status: self.status.snapshot(),
            uploads: self.uploads.snapshot(),
            link_check: self.link_check.snapshot(),
        }
    }
}
