use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[value(alias = "asset")]
    File,
    Video,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Queued,
    Uploading,
    Processing,
    Ready,
    Locked,
    Failed,
}

impl ResourceStatus {
    /// Terminal for the current upload attempt.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Uploading)
    }
}

/// Registry key. Resources being uploaded have no server id yet and are keyed by
/// the transient id of their upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceId {
    Transient(Uuid),
    Remote(String),
}

impl ResourceId {
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(id.into())
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Transient(_) => None,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(id) => write!(f, "transient:{id}"),
            Self::Remote(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub display_name: String,
    pub file_size: u64,
    pub wrapper_type: Option<String>,
    pub content_type: Option<String>,
    pub thumbnail: Option<String>,
    pub url: Option<String>,
    /// `None` until fetched; cleared whenever the server sends a new descriptor.
    pub usage_paths: Option<Vec<UsageLocation>>,
    pub sort_order: usize,
}

impl Resource {
    pub fn placeholder(transient_id: Uuid, input: &RawInput) -> Self {
        Self {
            id: ResourceId::Transient(transient_id),
            kind: input.kind,
            status: ResourceStatus::Queued,
            display_name: input.name.clone(),
            file_size: input.size,
            wrapper_type: None,
            content_type: input.content_type.clone(),
            thumbnail: None,
            url: None,
            usage_paths: None,
            sort_order: 0,
        }
    }

    pub fn from_descriptor(kind: ResourceKind, descriptor: AssetDescriptor) -> Self {
        let status = descriptor.resource_status();
        Self {
            id: ResourceId::Remote(descriptor.id),
            kind,
            status,
            display_name: descriptor.display_name,
            file_size: descriptor.file_size,
            wrapper_type: descriptor.wrapper_type,
            content_type: descriptor.content_type,
            thumbnail: descriptor.thumbnail,
            url: descriptor.url,
            usage_paths: None,
            sort_order: 0,
        }
    }
}

/// Resource descriptor as returned by the remote API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl AssetDescriptor {
    /// Videos are recognized by wrapper type or content type; everything else is a file.
    pub fn kind(&self) -> ResourceKind {
        let is_video = self
            .wrapper_type
            .as_deref()
            .is_some_and(|w| w.eq_ignore_ascii_case("video"))
            || self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("video/"));
        if is_video {
            ResourceKind::Video
        } else {
            ResourceKind::File
        }
    }

    pub fn resource_status(&self) -> ResourceStatus {
        if self.locked {
            return ResourceStatus::Locked;
        }
        match self
            .status
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("processing" | "in_progress" | "transcoding" | "uploaded") => {
                ResourceStatus::Processing
            }
            Some("failed" | "upload_failed" | "invalid_token") => ResourceStatus::Failed,
            _ => ResourceStatus::Ready,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageLocation {
    pub display_location: String,
    #[serde(default)]
    pub url: String,
}

/// Status of one named request slot in the aggregator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Default,
    Pending,
    InProgress,
    Successful,
    Failed,
    Denied,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Idle,
    InProgress,
    Successful,
    Failed,
}

impl BatchStatus {
    pub fn request_status(self) -> RequestStatus {
        match self {
            Self::Idle => RequestStatus::Default,
            Self::InProgress => RequestStatus::InProgress,
            Self::Successful => RequestStatus::Successful,
            Self::Failed => RequestStatus::Failed,
        }
    }
}

/// Where the bytes of an input come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

/// One user-selected input of a batch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub name: String,
    pub kind: ResourceKind,
    pub content_type: Option<String>,
    pub size: u64,
    pub source: InputSource,
    /// Image to derive the video thumbnail from after the transfer completes.
    pub poster: Option<Arc<[u8]>>,
}

impl RawInput {
    pub fn from_bytes(
        name: impl Into<String>,
        kind: ResourceKind,
        content_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            kind,
            content_type: Some(content_type.into()),
            size: data.len() as u64,
            source: InputSource::Bytes(data),
            poster: None,
        }
    }

    pub fn with_poster(mut self, poster: impl Into<Arc<[u8]>>) -> Self {
        self.poster = Some(poster.into());
        self
    }
}

/// Response of the link-check start and status endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheckStatus {
    #[serde(default, deserialize_with = "lenient_stage_code")]
    pub link_check_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_check_output: Option<LinkCheckResult>,
}

impl LinkCheckStatus {
    pub fn stage(code: &str) -> Self {
        Self {
            link_check_status: Some(code.to_owned()),
            link_check_output: None,
        }
    }

    pub fn with_output(mut self, output: LinkCheckResult) -> Self {
        self.link_check_output = Some(output);
        self
    }
}

// Non-string codes are kept as their JSON text so they fall through the stage
// table as unknown.
fn lenient_stage_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkCheckResult {
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl LinkCheckResult {
    pub fn broken_link_count(&self) -> usize {
        self.blocks().map(|b| b.broken_links.len()).sum()
    }

    pub fn locked_link_count(&self) -> usize {
        self.blocks().map(|b| b.locked_links.len()).sum()
    }

    fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.sections
            .iter()
            .flat_map(|s| &s.subsections)
            .flat_map(|ss| &ss.units)
            .flat_map(|u| &u.blocks)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub subsections: Vec<SubSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubSection {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub units: Vec<Unit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub broken_links: Vec<String>,
    #[serde(default)]
    pub locked_links: Vec<String>,
}
