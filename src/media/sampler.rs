// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Frame sampling: evenly spaced video frames and uniform image-set subsampling

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::lowercase_extension;
use crate::{ReelscopeError, Result};

/// Longest edge of any image sent to a vision backend
pub const MAX_EDGE: u32 = 1280;

/// JPEG quality for re-encoded frames
pub const JPEG_QUALITY: u8 = 85;

/// Encoded image ready to be inlined into a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageBlob {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }
}

/// Source of still frames for a video
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Decode `count` evenly spaced frames. Individual frame failures are skipped, so the
    /// result may hold fewer than `count` frames.
    async fn extract_frames(&self, path: &Path, count: u32) -> Result<Vec<ImageBlob>>;
}

/// Frame extraction through the ffprobe/ffmpeg binaries
pub struct FfmpegFrameExtractor {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check whether both binaries can be started
    pub async fn available(&self) -> bool {
        binary_runs(&self.ffmpeg, "-version").await && binary_runs(&self.ffprobe, "-version").await
    }

    /// Container duration in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(&self.ffprobe, e))?;

        if !output.status.success() {
            return Err(ReelscopeError::FrameExtractionFailed(format!(
                "ffprobe could not read {}",
                path.display()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| {
                ReelscopeError::FrameExtractionFailed(format!(
                    "no usable duration for {}",
                    path.display()
                ))
            })
    }

    async fn grab_frame(&self, path: &Path, timestamp: f64, output_path: &Path) -> Result<ImageBlob> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-ss", &format!("{:.3}", timestamp)])
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-q:v", "2", "-y"])
            .arg(output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| spawn_error(&self.ffmpeg, e))?;

        if !output.status.success() {
            return Err(ReelscopeError::FrameExtractionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let img = image::open(output_path)?;
        Ok(ImageBlob::jpeg(encode_bounded_jpeg(&img)?))
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_frames(&self, path: &Path, count: u32) -> Result<Vec<ImageBlob>> {
        let count = count.max(1);
        let duration = self.probe_duration(path).await?;

        // removed when this function returns, whichever way it returns
        let temp_dir = tempfile::Builder::new().prefix("reelscope_frames").tempdir()?;

        let mut frames = Vec::new();
        for (i, timestamp) in frame_timestamps(duration, count).into_iter().enumerate() {
            let output_path = temp_dir.path().join(format!("frame_{:02}.jpg", i));
            match self.grab_frame(path, timestamp, &output_path).await {
                Ok(frame) => frames.push(frame),
                Err(e @ ReelscopeError::BinaryNotFound(_)) => return Err(e),
                Err(e) => warn!("Frame {} of {:?} failed: {}", i, path, e),
            }
        }

        debug!("Extracted {}/{} frames from {:?}", frames.len(), count, path);
        Ok(frames)
    }
}

/// Timestamps strictly inside `(0, duration)`: `duration / (count + 1) * (i + 1)`
pub fn frame_timestamps(duration: f64, count: u32) -> Vec<f64> {
    let interval = duration / (count as f64 + 1.0);
    (0..count).map(|i| interval * (i as f64 + 1.0)).collect()
}

/// Pick at most `max_count` paths spread uniformly over `paths`, keeping order.
///
/// The first and last path are always included once sampling kicks in.
pub fn sample_images(paths: &[PathBuf], max_count: usize) -> Vec<PathBuf> {
    if paths.len() <= max_count {
        return paths.to_vec();
    }
    if max_count == 0 {
        return Vec::new();
    }
    if max_count == 1 {
        return vec![paths[0].clone()];
    }

    let step = (paths.len() - 1) as f64 / (max_count - 1) as f64;
    (0..max_count)
        .map(|i| {
            let index = ((i as f64) * step).round() as usize;
            paths[index.min(paths.len() - 1)].clone()
        })
        .collect()
}

/// Load one image-set member, shrunk and re-encoded as JPEG.
///
/// Formats the decoder cannot handle are sent as-is.
pub fn prepare_image(path: &Path) -> Result<ImageBlob> {
    match image::open(path) {
        Ok(img) => Ok(ImageBlob::jpeg(encode_bounded_jpeg(&img)?)),
        Err(e) => {
            debug!("Sending {:?} unconverted: {}", path, e);
            let data = std::fs::read(path)?;
            let mime_type = match lowercase_extension(path).as_deref() {
                Some("png") => "image/png",
                Some("webp") => "image/webp",
                _ => "image/jpeg",
            };
            Ok(ImageBlob {
                mime_type: mime_type.to_string(),
                data,
            })
        }
    }
}

/// Downscale into a `MAX_EDGE` box (aspect preserved) and encode as JPEG
pub fn encode_bounded_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let (width, height) = img.dimensions();
    let resized;
    let img = if width > MAX_EDGE || height > MAX_EDGE {
        resized = img.resize(MAX_EDGE, MAX_EDGE, image::imageops::FilterType::Triangle);
        &resized
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(buffer)
}

fn spawn_error(binary: &str, err: std::io::Error) -> ReelscopeError {
    if err.kind() == ErrorKind::NotFound {
        ReelscopeError::BinaryNotFound(binary.to_string())
    } else {
        ReelscopeError::FileSystem(err)
    }
}

/// True when `binary arg` starts and exits cleanly
pub async fn binary_runs(binary: &str, arg: &str) -> bool {
    Command::new(binary)
        .arg(arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
