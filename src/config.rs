use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::link_check::StageTable;
use crate::model::ResourceKind;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Per-kind upload rules, looked up by `ResourceKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindProfile {
    pub max_bytes: u64,
    /// MIME patterns (`type/subtype` or `type/*`). Empty accepts everything.
    pub allowed_types: Vec<String>,
    pub detect_duplicates: bool,
    pub thumbnail_follow_up: bool,
}

impl KindProfile {
    pub fn file() -> Self {
        Self {
            max_bytes: 20 * MIB,
            allowed_types: Vec::new(),
            detect_duplicates: true,
            thumbnail_follow_up: false,
        }
    }

    pub fn video() -> Self {
        Self {
            max_bytes: 5 * GIB,
            allowed_types: vec![
                "video/mp4".to_owned(),
                "video/quicktime".to_owned(),
                "video/webm".to_owned(),
            ],
            detect_duplicates: false,
            thumbnail_follow_up: true,
        }
    }

    pub fn accepts_type(&self, content_type: Option<&str>) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        self.allowed_types.iter().any(|pattern| {
            match pattern.strip_suffix("/*") {
                Some(major) => content_type
                    .split_once('/')
                    .is_some_and(|(m, _)| m == major),
                None => *pattern == content_type,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSettings {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_bytes: usize,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            min_width: 640,
            min_height: 360,
            max_bytes: 2 * MIB as usize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Option<Url>,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
    pub file: KindProfile,
    pub video: KindProfile,
    pub thumbnail: ThumbnailSettings,
    /// 0 means no limit.
    pub max_concurrent_uploads: usize,
    pub stage_table: StageTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            poll_interval: Duration::from_millis(2000),
            file: KindProfile::file(),
            video: KindProfile::video(),
            thumbnail: ThumbnailSettings::default(),
            max_concurrent_uploads: 0,
            stage_table: StageTable::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = get("COURSEOPS_API_URL") {
            config.api_url = Some(parse_api_url(&raw).context("COURSEOPS_API_URL")?);
        }
        config.api_token = get("COURSEOPS_API_TOKEN");
        if let Some(raw) = get("COURSEOPS_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(
                parse_u64(&raw).context("COURSEOPS_POLL_INTERVAL_MS")?,
            );
        }
        if let Some(raw) = get("COURSEOPS_FILE_MAX_BYTES") {
            config.file.max_bytes = parse_u64(&raw).context("COURSEOPS_FILE_MAX_BYTES")?;
        }
        if let Some(raw) = get("COURSEOPS_VIDEO_MAX_BYTES") {
            config.video.max_bytes = parse_u64(&raw).context("COURSEOPS_VIDEO_MAX_BYTES")?;
        }
        if let Some(raw) = get("COURSEOPS_VIDEO_FORMATS") {
            config.video.allowed_types = parse_type_list(&raw);
        }
        if let Some(raw) = get("COURSEOPS_MAX_CONCURRENT_UPLOADS") {
            config.max_concurrent_uploads =
                parse_u64(&raw).context("COURSEOPS_MAX_CONCURRENT_UPLOADS")? as usize;
        }
        if let Some(raw) = get("COURSEOPS_STAGE_TABLE") {
            config.stage_table = StageTable::from_json(&raw).context("COURSEOPS_STAGE_TABLE")?;
        }

        Ok(config)
    }

    pub fn profile(&self, kind: ResourceKind) -> &KindProfile {
        match kind {
            ResourceKind::File => &self.file,
            ResourceKind::Video => &self.video,
        }
    }
}

pub fn parse_api_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("parse url: {raw:?}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("api url must be http/https: {url}");
    }
    Ok(url)
}

fn parse_u64(raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .replace('_', "")
        .parse::<u64>()
        .with_context(|| format!("expected a non-negative integer, got {raw:?}"))
}

fn parse_type_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
