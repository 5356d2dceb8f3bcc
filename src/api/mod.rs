use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::model::{AssetDescriptor, LinkCheckStatus, RawInput, UsageLocation};

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpCourseApi;

/// Body of `PATCH /courses/{courseId}/assets/{id}`. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl AssetPatch {
    pub fn lock(locked: bool) -> Self {
        Self {
            locked: Some(locked),
            ..Self::default()
        }
    }

    pub fn order(sort_order: usize, sort_key: &str) -> Self {
        Self {
            sort_order: Some(sort_order),
            sort_key: Some(sort_key.to_owned()),
            ..Self::default()
        }
    }
}

/// Encoded thumbnail ready to be posted for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// The remote course-asset collaborator.
#[async_trait]
pub trait CourseApi: Send + Sync {
    async fn list_assets(&self, course_id: &str) -> Result<Vec<AssetDescriptor>, ApiError>;

    /// Transfer one input. `overwrite` replaces an existing resource of the same name.
    async fn create_asset(
        &self,
        course_id: &str,
        input: &RawInput,
        overwrite: bool,
    ) -> Result<AssetDescriptor, ApiError>;

    async fn delete_asset(&self, course_id: &str, asset_id: &str) -> Result<(), ApiError>;

    async fn update_asset(
        &self,
        course_id: &str,
        asset_id: &str,
        patch: &AssetPatch,
    ) -> Result<AssetDescriptor, ApiError>;

    async fn usage(&self, course_id: &str, asset_id: &str)
    -> Result<Vec<UsageLocation>, ApiError>;

    /// Returns the new thumbnail reference when the server reports one.
    async fn upload_thumbnail(
        &self,
        course_id: &str,
        asset_id: &str,
        image: &ThumbnailImage,
    ) -> Result<Option<String>, ApiError>;

    async fn start_link_check(&self, course_id: &str) -> Result<LinkCheckStatus, ApiError>;

    async fn link_check_status(&self, course_id: &str) -> Result<LinkCheckStatus, ApiError>;

    /// Fetch the body behind a resource's download url. Relative urls resolve
    /// against the api base.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}
