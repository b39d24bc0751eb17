// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media locator: turns a flat download folder into analyzable work items

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    file_stem, lowercase_extension, WorkItem, COVER_SUFFIX, GALLERY_VIDEO_EXTENSIONS,
    IMAGE_EXTENSIONS, VIDEO_EXTENSIONS,
};

const IMAGE_MARKER: &str = "_image_";
const VIDEO_SUFFIX: &str = "_video";

/// Which video extensions a scan accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// `.mp4` only, as produced by the downloader
    #[default]
    Analysis,
    /// Any playable container the gallery shows
    Gallery,
}

impl ScanMode {
    fn video_extensions(&self) -> &'static [&'static str] {
        match self {
            ScanMode::Analysis => VIDEO_EXTENSIONS,
            ScanMode::Gallery => GALLERY_VIDEO_EXTENSIONS,
        }
    }
}

/// An author folder inside a `root/<platform>/<mode>/<author>` library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorFolder {
    pub platform: String,
    pub mode: String,
    pub author: String,
    pub path: PathBuf,
}

/// Scan `root` for videos and image sets.
///
/// Items whose id is in `skip` are left out. An unreadable folder yields an empty list.
/// The result is sorted by id.
pub fn scan(root: &Path, mode: ScanMode, skip: Option<&HashSet<String>>) -> Vec<WorkItem> {
    let files = list_files(root);
    let sets = group_image_sets(&files);
    let video_exts = mode.video_extensions();

    let mut items: Vec<WorkItem> = Vec::new();

    for path in &files {
        let Some(ext) = lowercase_extension(path) else { continue };
        if !video_exts.contains(&ext.as_str()) {
            continue;
        }
        let stem = file_stem(path);
        if sets.contains_key(&stem) {
            debug!("Video {:?} shares a prefix with an image set, skipping", path);
            continue;
        }
        items.push(WorkItem::Video { path: path.clone() });
    }

    for (prefix, paths) in sets {
        items.push(WorkItem::ImageSet { prefix, paths });
    }

    if let Some(skip) = skip {
        items.retain(|item| !skip.contains(&item.id()));
    }

    items.sort_by_key(|item| item.id());
    items
}

/// Group image files by prefix, members ordered by their numeric suffix.
///
/// Cover images and images without an `_image_<N>` suffix are ignored.
pub fn group_image_sets(files: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<(u64, PathBuf)>> = BTreeMap::new();

    for path in files {
        let Some(ext) = lowercase_extension(path) else { continue };
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let stem = file_stem(path);
        if stem.ends_with(COVER_SUFFIX) {
            continue;
        }
        if let Some((prefix, number)) = split_image_suffix(&stem) {
            groups
                .entry(prefix.to_string())
                .or_default()
                .push((number, path.clone()));
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| !members.is_empty())
        .map(|(prefix, mut members)| {
            members.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            (prefix, members.into_iter().map(|(_, p)| p).collect())
        })
        .collect()
}

/// Split `foo_image_12` into `("foo", 12)`
fn split_image_suffix(stem: &str) -> Option<(&str, u64)> {
    let idx = stem.rfind(IMAGE_MARKER)?;
    let prefix = &stem[..idx];
    let digits = &stem[idx + IMAGE_MARKER.len()..];
    if prefix.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // absurdly long suffixes still sort last rather than being dropped
    let number = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some((prefix, number))
}

/// Find the cover image belonging to a video.
///
/// A trailing `_video` is dropped from the stem, then `<base>_cover.<ext>` is preferred over
/// `<base>.<ext>`.
pub fn find_cover(video: &Path) -> Option<PathBuf> {
    let folder = video.parent()?;
    let stem = file_stem(video);
    let base = stem.strip_suffix(VIDEO_SUFFIX).unwrap_or(&stem);

    let suffixed = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| folder.join(format!("{}{}.{}", base, COVER_SUFFIX, ext)));
    let plain = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| folder.join(format!("{}.{}", base, ext)));

    suffixed.chain(plain).find(|p| p.is_file())
}

/// List author folders of a three-level library, sorted by platform, mode, author
pub fn author_folders(root: &Path) -> Vec<AuthorFolder> {
    let mut folders = Vec::new();

    for platform in list_dirs(root) {
        for mode in list_dirs(&platform) {
            for author in list_dirs(&mode) {
                folders.push(AuthorFolder {
                    platform: dir_name(&platform),
                    mode: dir_name(&mode),
                    author: dir_name(&author),
                    path: author,
                });
            }
        }
    }

    folders.sort_by(|a, b| {
        (&a.platform, &a.mode, &a.author).cmp(&(&b.platform, &b.mode, &b.author))
    });
    folders
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && !is_hidden(p))
            .collect(),
        Err(e) => {
            warn!("Cannot read media folder {:?}: {}", dir, e);
            Vec::new()
        }
    }
}

fn list_dirs(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir() && !is_hidden(p))
                .collect()
        })
        .unwrap_or_default()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
