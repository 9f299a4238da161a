//! Media preparation: ffmpeg transcode and thumbnails for video, transport
//! limits for images.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::model::MediaKind;
use crate::telegram::SendKind;

/// Box that oversized images are shrunk to fit.
const FALLBACK_WIDTH: u32 = 1024;
const FALLBACK_HEIGHT: u32 = 768;
const MAX_SHRINK_ROUNDS: usize = 8;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("media file {} is missing", .0.display())]
    Missing(PathBuf),
    #[error("media file {} cannot be decoded: {reason}", .path.display())]
    Undecodable { path: PathBuf, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PrepareError {
    /// Retrying will never help; the item should leave the queue.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PrepareError::Undecodable { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLimits {
    pub max_dimension: u32,
    pub max_file_size: u64,
}

/// Files ready for upload. `byproducts` are transient files created during
/// preparation and must be cleaned up whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMedia {
    pub kind: SendKind,
    pub media: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub byproducts: Vec<PathBuf>,
}

/// `x.webm` + `mp4` → `x.webm.mp4`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

pub async fn prepare(path: &Path, limits: MediaLimits) -> Result<PreparedMedia, PrepareError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(PrepareError::Missing(path.to_path_buf()));
    }
    let kind = MediaKind::classify(path);
    debug!(path = %path.display(), kind = kind.as_str(), "preparing media");
    match kind {
        MediaKind::TranscodeVideo => {
            let mp4 = transcode_to_mp4(path).await?;
            let thumb = match generate_thumbnail(&mp4).await {
                Ok(t) => t,
                Err(err) => {
                    let _ = tokio::fs::remove_file(&mp4).await;
                    return Err(err.into());
                }
            };
            Ok(PreparedMedia {
                kind: SendKind::Video,
                media: mp4.clone(),
                thumbnail: Some(thumb.clone()),
                byproducts: vec![mp4, thumb],
            })
        }
        MediaKind::Video => {
            let thumb = generate_thumbnail(path).await?;
            Ok(PreparedMedia {
                kind: SendKind::Video,
                media: path.to_path_buf(),
                thumbnail: Some(thumb.clone()),
                byproducts: vec![thumb],
            })
        }
        MediaKind::Image => {
            normalize_image(path, limits).await?;
            Ok(PreparedMedia {
                kind: SendKind::Photo,
                media: path.to_path_buf(),
                thumbnail: None,
                byproducts: Vec::new(),
            })
        }
    }
}

/// Ensure `ffmpeg` binary is available on PATH by invoking `ffmpeg -version`.
pub async fn ensure_ffmpeg_available() -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-version")
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(anyhow!("ffmpeg not available (exit status {})", s)),
        Err(e) => Err(anyhow!("ffmpeg not available: {}", e)),
    }
}

async fn run_ffmpeg(args: &[&OsStr], input: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .args(args)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("failed to spawn ffmpeg for {}", input.display()))?;
    if !status.success() {
        return Err(anyhow!(
            "ffmpeg exited with status {} for {}",
            status,
            input.display()
        ));
    }
    Ok(())
}

/// Transcode into an H.264/AAC mp4 next to the source (`<name>.mp4`).
pub async fn transcode_to_mp4(src: &Path) -> Result<PathBuf> {
    let out = with_suffix(src, "mp4");
    run_ffmpeg(
        &[
            OsStr::new("-i"),
            src.as_os_str(),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-c:a"),
            OsStr::new("aac"),
            OsStr::new("-movflags"),
            OsStr::new("+faststart"),
            out.as_os_str(),
        ],
        src,
    )
    .await?;
    info!(src = %src.display(), out = %out.display(), "transcoded video");
    Ok(out)
}

/// Extract the first frame as a JPEG thumbnail (`<name>.jpg`), scaled to the
/// channel's 320px thumbnail width.
pub async fn generate_thumbnail(video: &Path) -> Result<PathBuf> {
    let thumb = with_suffix(video, "jpg");
    run_ffmpeg(
        &[
            OsStr::new("-i"),
            video.as_os_str(),
            OsStr::new("-frames:v"),
            OsStr::new("1"),
            OsStr::new("-vf"),
            OsStr::new("scale=320:-2:flags=lanczos"),
            OsStr::new("-q:v"),
            OsStr::new("6"),
            thumb.as_os_str(),
        ],
        video,
    )
    .await?;
    debug!(video = %video.display(), thumb = %thumb.display(), "generated thumbnail");
    Ok(thumb)
}

/// Enforce dimension and size limits in place. Decoding runs on the blocking
/// pool.
pub async fn normalize_image(path: &Path, limits: MediaLimits) -> Result<(), PrepareError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || normalize_image_blocking(&owned, limits))
        .await
        .map_err(|e| PrepareError::Other(anyhow!("image task panicked: {e}")))?
}

fn normalize_image_blocking(path: &Path, limits: MediaLimits) -> Result<(), PrepareError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PrepareError::Missing(path.to_path_buf()),
        _ => PrepareError::Other(anyhow!(e).context(format!("failed to read {}", path.display()))),
    })?;
    let undecodable = |e: ImageError| match e {
        ImageError::IoError(io) => PrepareError::Other(anyhow!(io)),
        other => PrepareError::Undecodable {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    };
    let format = image::guess_format(&bytes).map_err(undecodable)?;
    let mut img = image::load_from_memory_with_format(&bytes, format).map_err(undecodable)?;
    drop(bytes);

    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
    ) {
        warn!(path = %path.display(), ?format, "skipping resize: unsupported format");
        return Ok(());
    }

    if img.width() > limits.max_dimension || img.height() > limits.max_dimension {
        info!(
            path = %path.display(),
            width = img.width(),
            height = img.height(),
            "image exceeds dimension limit; downscaling"
        );
        img = img.resize(
            FALLBACK_WIDTH.min(limits.max_dimension),
            FALLBACK_HEIGHT.min(limits.max_dimension),
            FilterType::Lanczos3,
        );
        save(&img, path, format)?;
    }

    for _ in 0..MAX_SHRINK_ROUNDS {
        let size = file_size(path)?;
        if size <= limits.max_file_size {
            return Ok(());
        }
        let (w, h) = shrink_dimensions(img.width(), img.height(), size, limits.max_file_size);
        info!(path = %path.display(), size, width = w, height = h, "image exceeds size limit; downscaling");
        img = img.resize_exact(w, h, FilterType::Lanczos3);
        save(&img, path, format)?;
    }
    let size = file_size(path)?;
    if size > limits.max_file_size {
        return Err(PrepareError::Other(anyhow!(
            "{} still {} bytes after downscaling",
            path.display(),
            size
        )));
    }
    Ok(())
}

/// Scale both sides by the square root of the size overage ratio. Always
/// shrinks by at least one pixel so repeated rounds make progress.
pub fn shrink_dimensions(width: u32, height: u32, size: u64, max_size: u64) -> (u32, u32) {
    let factor = (size as f64 / max_size as f64).sqrt();
    let scale = |v: u32| {
        let scaled = (f64::from(v) / factor).round() as u32;
        scaled.min(v.saturating_sub(1)).max(1)
    };
    (scale(width), scale(height))
}

fn file_size(path: &Path) -> Result<u64, PrepareError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .with_context(|| format!("failed to stat {}", path.display()))
        .map_err(PrepareError::Other)
}

fn save(img: &DynamicImage, path: &Path, format: ImageFormat) -> Result<(), PrepareError> {
    let img = match format {
        // The JPEG encoder rejects alpha channels.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img.clone(),
    };
    img.save_with_format(path, format)
        .with_context(|| format!("failed to save {}", path.display()))
        .map_err(PrepareError::Other)
}
