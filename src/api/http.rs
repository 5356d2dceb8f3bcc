use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use url::Url;

use super::{AssetPatch, CourseApi, ThumbnailImage};
use crate::error::ApiError;
use crate::model::{AssetDescriptor, InputSource, LinkCheckStatus, RawInput, UsageLocation};

#[derive(Debug, Clone)]
pub struct HttpCourseApi {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetList {
    Wrapped { assets: Vec<AssetDescriptor> },
    Bare(Vec<AssetDescriptor>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetBody {
    Wrapped { asset: AssetDescriptor },
    Bare(AssetDescriptor),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UsageList {
    Wrapped {
        #[serde(rename = "usageLocations")]
        usage_locations: Vec<UsageLocation>,
    },
    Bare(Vec<UsageLocation>),
}

#[derive(Deserialize)]
struct ThumbnailAck {
    #[serde(default, rename = "imageUrl")]
    image_url: Option<String>,
}

impl HttpCourseApi {
    pub fn new(base: Url, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ApiError::transport(format!("api url cannot be a base: {}", self.base))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        conflict_name: Option<&str>,
    ) -> Result<String, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::debug!(%status, body = %body, "course api request failed");
            return Err(ApiError::from_status(status.as_u16(), &body, conflict_name));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        conflict_name: Option<&str>,
    ) -> Result<T, ApiError> {
        let body = self.send(req, conflict_name).await?;
        decode(&body)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|err| ApiError::transport(format!("decode response: {err}")))
}

async fn input_part(input: &RawInput) -> Result<Part, ApiError> {
    let part = match &input.source {
        InputSource::Bytes(data) => Part::bytes(data.to_vec()),
        InputSource::Path(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|err| {
                ApiError::transport(format!("open {}: {err}", path.display()))
            })?;
            let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
            Part::stream_with_length(body, input.size)
        }
    };
    let part = part.file_name(input.name.clone());
    match &input.content_type {
        Some(content_type) => Ok(part.mime_str(content_type)?),
        None => Ok(part),
    }
}

#[async_trait]
impl CourseApi for HttpCourseApi {
    async fn list_assets(&self, course_id: &str) -> Result<Vec<AssetDescriptor>, ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets"])?;
        let list: AssetList = self
            .send_json(self.request(reqwest::Method::GET, url), None)
            .await?;
        Ok(match list {
            AssetList::Wrapped { assets } | AssetList::Bare(assets) => assets,
        })
    }

    async fn create_asset(
        &self,
        course_id: &str,
        input: &RawInput,
        overwrite: bool,
    ) -> Result<AssetDescriptor, ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets"])?;
        let form = Form::new()
            .text("kind", kind_label(input))
            .part("file", input_part(input).await?);
        let mut req = self.request(reqwest::Method::POST, url).multipart(form);
        if overwrite {
            req = req.query(&[("overwrite", "true")]);
        }
        let body: AssetBody = self.send_json(req, Some(&input.name)).await?;
        Ok(match body {
            AssetBody::Wrapped { asset } | AssetBody::Bare(asset) => asset,
        })
    }

    async fn delete_asset(&self, course_id: &str, asset_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets", asset_id])?;
        self.send(self.request(reqwest::Method::DELETE, url), None)
            .await?;
        Ok(())
    }

    async fn update_asset(
        &self,
        course_id: &str,
        asset_id: &str,
        patch: &AssetPatch,
    ) -> Result<AssetDescriptor, ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets", asset_id])?;
        let body: AssetBody = self
            .send_json(self.request(reqwest::Method::PATCH, url).json(patch), None)
            .await?;
        Ok(match body {
            AssetBody::Wrapped { asset } | AssetBody::Bare(asset) => asset,
        })
    }

    async fn usage(
        &self,
        course_id: &str,
        asset_id: &str,
    ) -> Result<Vec<UsageLocation>, ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets", asset_id, "usage"])?;
        let list: UsageList = self
            .send_json(self.request(reqwest::Method::GET, url), None)
            .await?;
        Ok(match list {
            UsageList::Wrapped { usage_locations } | UsageList::Bare(usage_locations) => {
                usage_locations
            }
        })
    }

    async fn upload_thumbnail(
        &self,
        course_id: &str,
        asset_id: &str,
        image: &ThumbnailImage,
    ) -> Result<Option<String>, ApiError> {
        let url = self.endpoint(&["courses", course_id, "assets", asset_id, "thumbnail"])?;
        let part = Part::bytes(image.bytes.clone())
            .file_name(format!("{asset_id}-thumbnail.jpg"))
            .mime_str(image.content_type)?;
        let form = Form::new().part("file", part);
        let body = self
            .send(self.request(reqwest::Method::POST, url).multipart(form), None)
            .await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let ack: ThumbnailAck = decode(&body)?;
        Ok(ack.image_url)
    }

    async fn start_link_check(&self, course_id: &str) -> Result<LinkCheckStatus, ApiError> {
        let url = self.endpoint(&["courses", course_id, "link_check"])?;
        self.send_json(self.request(reqwest::Method::POST, url), None)
            .await
    }

    async fn link_check_status(&self, course_id: &str) -> Result<LinkCheckStatus, ApiError> {
        let url = self.endpoint(&["courses", course_id, "link_check"])?;
        self.send_json(self.request(reqwest::Method::GET, url), None)
            .await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let url = self
            .base
            .join(url)
            .map_err(|err| ApiError::transport(format!("download url {url:?}: {err}")))?;
        // Credentials only go to the api's own origin.
        let req = if url.origin() == self.base.origin() {
            self.request(reqwest::Method::GET, url)
        } else {
            self.client.get(url)
        };
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            tracing::debug!(%status, body = %body, "download failed");
            return Err(ApiError::from_status(status.as_u16(), &body, None));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

fn kind_label(input: &RawInput) -> &'static str {
    match input.kind {
        crate::model::ResourceKind::File => "file",
        crate::model::ResourceKind::Video => "video",
    }
}
