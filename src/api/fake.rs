use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AssetPatch, CourseApi, ThumbnailImage};
use crate::error::ApiError;
use crate::model::{AssetDescriptor, LinkCheckStatus, RawInput, UsageLocation};
use crate::shared::lock;

/// Scripted in-memory [`CourseApi`].
///
/// Uploads succeed with a descriptor derived from the input name unless an outcome
/// was scripted for that name. A gate parks the call until notified, which lets a
/// test pick the order in which concurrent calls complete.
#[derive(Default)]
pub struct FakeCourseApi {
    assets: Mutex<Vec<AssetDescriptor>>,
    upload_outcomes: Mutex<HashMap<String, Result<AssetDescriptor, ApiError>>>,
    upload_gates: Mutex<HashMap<String, Arc<Notify>>>,
    update_failures: Mutex<HashMap<String, ApiError>>,
    delete_failures: Mutex<HashMap<String, ApiError>>,
    usage: Mutex<HashMap<String, Vec<UsageLocation>>>,
    thumbnail_failure: Mutex<Option<ApiError>>,
    thumbnails: Mutex<Vec<(String, u32, u32)>>,
    list_failure: Mutex<Option<ApiError>>,
    start_response: Mutex<Option<Result<LinkCheckStatus, ApiError>>>,
    polls: Mutex<VecDeque<Result<LinkCheckStatus, ApiError>>>,
    poll_gates: Mutex<VecDeque<Arc<Notify>>>,
    download_failures: Mutex<HashMap<String, ApiError>>,
    calls: Mutex<Vec<String>>,
    call_made: Notify,
}

impl FakeCourseApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assets(self, assets: Vec<AssetDescriptor>) -> Self {
        *lock(&self.assets) = assets;
        self
    }

    pub fn fail_list(&self, err: ApiError) {
        *lock(&self.list_failure) = Some(err);
    }

    pub fn script_upload(&self, name: &str, outcome: Result<AssetDescriptor, ApiError>) {
        lock(&self.upload_outcomes).insert(name.to_owned(), outcome);
    }

    /// Park uploads of `name` until the returned gate is notified.
    pub fn gate_upload(&self, name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.upload_gates).insert(name.to_owned(), Arc::clone(&gate));
        gate
    }

    pub fn fail_update(&self, asset_id: &str, err: ApiError) {
        lock(&self.update_failures).insert(asset_id.to_owned(), err);
    }

    pub fn fail_delete(&self, asset_id: &str, err: ApiError) {
        lock(&self.delete_failures).insert(asset_id.to_owned(), err);
    }

    pub fn set_usage(&self, asset_id: &str, usage: Vec<UsageLocation>) {
        lock(&self.usage).insert(asset_id.to_owned(), usage);
    }

    pub fn fail_thumbnails(&self, err: ApiError) {
        *lock(&self.thumbnail_failure) = Some(err);
    }

    /// `(asset id, width, height)` of every accepted thumbnail.
    pub fn thumbnails(&self) -> Vec<(String, u32, u32)> {
        lock(&self.thumbnails).clone()
    }

    pub fn set_start_response(&self, response: Result<LinkCheckStatus, ApiError>) {
        *lock(&self.start_response) = Some(response);
    }

    /// Responses for consecutive status polls. Once exhausted, polls report a
    /// missing stage code.
    pub fn script_polls(&self, responses: Vec<Result<LinkCheckStatus, ApiError>>) {
        lock(&self.polls).extend(responses);
    }

    /// Park the next unparked poll until the returned gate is notified.
    pub fn gate_next_poll(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.poll_gates).push_back(Arc::clone(&gate));
        gate
    }

    pub fn fail_download(&self, url: &str, err: ApiError) {
        lock(&self.download_failures).insert(url.to_owned(), err);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn poll_count(&self) -> usize {
        self.count("poll")
    }

    /// Wait until at least `n` calls starting with `prefix` were made.
    pub async fn wait_for_calls(&self, prefix: &str, n: usize) {
        loop {
            let notified = self.call_made.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count(prefix) >= n {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
        self.call_made.notify_waiters();
    }
}

fn descriptor_for(input: &RawInput) -> AssetDescriptor {
    AssetDescriptor {
        id: format!("asset-{}", input.name),
        display_name: input.name.clone(),
        file_size: input.size,
        content_type: input.content_type.clone(),
        ..AssetDescriptor::default()
    }
}

#[async_trait]
impl CourseApi for FakeCourseApi {
    async fn list_assets(&self, _course_id: &str) -> Result<Vec<AssetDescriptor>, ApiError> {
        self.record("list");
        if let Some(err) = lock(&self.list_failure).clone() {
            return Err(err);
        }
        Ok(lock(&self.assets).clone())
    }

    async fn create_asset(
        &self,
        _course_id: &str,
        input: &RawInput,
        overwrite: bool,
    ) -> Result<AssetDescriptor, ApiError> {
        let gate = lock(&self.upload_gates).get(&input.name).cloned();
        self.record(if overwrite {
            format!("create!:{}", input.name)
        } else {
            format!("create:{}", input.name)
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = lock(&self.upload_outcomes).get(&input.name).cloned();
        scripted.unwrap_or_else(|| Ok(descriptor_for(input)))
    }

    async fn delete_asset(&self, _course_id: &str, asset_id: &str) -> Result<(), ApiError> {
        self.record(format!("delete:{asset_id}"));
        if let Some(err) = lock(&self.delete_failures).get(asset_id).cloned() {
            return Err(err);
        }
        lock(&self.assets).retain(|a| a.id != asset_id);
        Ok(())
    }

    async fn update_asset(
        &self,
        _course_id: &str,
        asset_id: &str,
        patch: &AssetPatch,
    ) -> Result<AssetDescriptor, ApiError> {
        self.record(format!("patch:{asset_id}"));
        if let Some(err) = lock(&self.update_failures).get(asset_id).cloned() {
            return Err(err);
        }
        let mut assets = lock(&self.assets);
        let Some(asset) = assets.iter_mut().find(|a| a.id == asset_id) else {
            return Err(ApiError::from_status(404, "", None));
        };
        if let Some(locked) = patch.locked {
            asset.locked = locked;
        }
        Ok(asset.clone())
    }

    async fn usage(
        &self,
        _course_id: &str,
        asset_id: &str,
    ) -> Result<Vec<UsageLocation>, ApiError> {
        self.record(format!("usage:{asset_id}"));
        Ok(lock(&self.usage).get(asset_id).cloned().unwrap_or_default())
    }

    async fn upload_thumbnail(
        &self,
        _course_id: &str,
        asset_id: &str,
        image: &ThumbnailImage,
    ) -> Result<Option<String>, ApiError> {
        self.record(format!("thumbnail:{asset_id}"));
        if let Some(err) = lock(&self.thumbnail_failure).clone() {
            return Err(err);
        }
        lock(&self.thumbnails).push((asset_id.to_owned(), image.width, image.height));
        Ok(Some(format!("/thumbnails/{asset_id}.jpg")))
    }

    async fn start_link_check(&self, _course_id: &str) -> Result<LinkCheckStatus, ApiError> {
        self.record("start");
        lock(&self.start_response)
            .clone()
            .unwrap_or_else(|| Ok(LinkCheckStatus::stage("Pending")))
    }

    async fn link_check_status(&self, _course_id: &str) -> Result<LinkCheckStatus, ApiError> {
        let response = lock(&self.polls)
            .pop_front()
            .unwrap_or_else(|| Ok(LinkCheckStatus::default()));
        let gate = lock(&self.poll_gates).pop_front();
        self.record("poll");
        if let Some(gate) = gate {
            gate.notified().await;
        }
        response
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.record(format!("download:{url}"));
        if let Some(err) = lock(&self.download_failures).get(url).cloned() {
            return Err(err);
        }
        Ok(format!("body of {url}").into_bytes())
    }
}
