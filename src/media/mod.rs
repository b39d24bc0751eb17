// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media store access: discovering work items and sampling their pixels

pub mod locator;
pub mod sampler;

use std::path::{Path, PathBuf};

pub use locator::{author_folders, find_cover, scan, AuthorFolder, ScanMode};
pub use sampler::{binary_runs, sample_images, FfmpegFrameExtractor, FrameExtractor, ImageBlob};

/// Image extensions that may belong to an image set
pub const IMAGE_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png"];

/// Video extensions picked up by an analysis scan
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4"];

/// Video extensions picked up by a gallery scan
pub const GALLERY_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v"];

/// Stem suffix marking a thumbnail that is never analyzed
pub const COVER_SUFFIX: &str = "_cover";

/// One unit of analyzable media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A single video file
    Video { path: PathBuf },
    /// A numbered run of images sharing a filename prefix, in ascending number order
    ImageSet { prefix: String, paths: Vec<PathBuf> },
}

impl WorkItem {
    /// Identifier used as the result key: video stem or image-set prefix
    pub fn id(&self) -> String {
        match self {
            WorkItem::Video { path } => file_stem(path),
            WorkItem::ImageSet { prefix, .. } => prefix.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            WorkItem::Video { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            WorkItem::ImageSet { prefix, paths } => format!("{} ({} images)", prefix, paths.len()),
        }
    }

    pub fn is_image_set(&self) -> bool {
        matches!(self, WorkItem::ImageSet { .. })
    }

    /// Path stored with the result: the video itself or the first image of the set
    pub fn primary_path(&self) -> Option<&Path> {
        match self {
            WorkItem::Video { path } => Some(path),
            WorkItem::ImageSet { paths, .. } => paths.first().map(|p| p.as_path()),
        }
    }

    /// Number of images in a set, zero for videos
    pub fn image_count(&self) -> usize {
        match self {
            WorkItem::Video { .. } => 0,
            WorkItem::ImageSet { paths, .. } => paths.len(),
        }
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
