use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView as _};

use crate::api::ThumbnailImage;
use crate::config::ThumbnailSettings;
use crate::error::ApiError;

const QUALITIES: [u8; 4] = [85, 75, 65, 50];

/// Decode `source`, center-crop it to the target aspect and resample it to the
/// target size as JPEG. Sources smaller than the configured minimum are rejected.
///
/// CPU bound; call [`resample_blocking`] from async code.
pub fn resample(source: &[u8], settings: &ThumbnailSettings) -> Result<ThumbnailImage, ApiError> {
    if settings.width == 0 || settings.height == 0 {
        return Err(ApiError::validation("thumbnail target dimensions must be non-zero"));
    }
    let decoded = image::load_from_memory(source)
        .map_err(|err| ApiError::validation(format!("unreadable thumbnail image: {err}")))?;
    let (src_w, src_h) = decoded.dimensions();
    if src_w < settings.min_width || src_h < settings.min_height {
        return Err(ApiError::Validation {
            message: format!(
                "thumbnail image is {src_w}x{src_h}, smaller than {}x{}",
                settings.min_width, settings.min_height
            ),
            reasons: vec!["min_dimensions".to_owned()],
        });
    }
    let src = decoded.to_rgb8();

    let dst_aspect = settings.width as f64 / settings.height as f64;
    let src_aspect = src_w as f64 / src_h as f64;
    let (crop_x, crop_y, crop_w, crop_h) = if src_aspect > dst_aspect {
        let crop_w = ((src_h as f64) * dst_aspect).round() as u32;
        ((src_w.saturating_sub(crop_w)) / 2, 0, crop_w.min(src_w), src_h)
    } else {
        let crop_h = ((src_w as f64) / dst_aspect).round() as u32;
        (0, (src_h.saturating_sub(crop_h)) / 2, src_w, crop_h.min(src_h))
    };
    let cropped = image::imageops::crop_imm(&src, crop_x, crop_y, crop_w, crop_h).to_image();
    let resized = image::imageops::resize(
        &cropped,
        settings.width,
        settings.height,
        FilterType::Lanczos3,
    );

    for quality in QUALITIES {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                resized.as_raw(),
                settings.width,
                settings.height,
                ColorType::Rgb8.into(),
            )
            .map_err(|err| ApiError::validation(format!("encode thumbnail jpeg: {err}")))?;
        let bytes = out.into_inner();
        if bytes.len() <= settings.max_bytes {
            return Ok(ThumbnailImage {
                bytes,
                content_type: "image/jpeg",
                width: settings.width,
                height: settings.height,
            });
        }
        tracing::debug!(quality, size = bytes.len(), "thumbnail over size limit, retrying");
    }

    Err(ApiError::Validation {
        message: format!(
            "thumbnail does not fit in {} bytes at any quality",
            settings.max_bytes
        ),
        reasons: vec!["max_size".to_owned()],
    })
}

pub async fn resample_blocking(
    source: Arc<[u8]>,
    settings: ThumbnailSettings,
) -> Result<ThumbnailImage, ApiError> {
    tokio::task::spawn_blocking(move || resample(&source, &settings))
        .await
        .map_err(|err| ApiError::transport(format!("thumbnail task failed: {err}")))?
}
