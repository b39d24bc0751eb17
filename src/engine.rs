// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Analysis engine: sample, request, parse and record one work item

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use crate::activity::ActivityLog;
use crate::config::AnalysisConfig;
use crate::contract::{parse_response, ParsedModelResponse};
use crate::db::VideoAnalysis;
use crate::media::sampler::prepare_image;
use crate::media::{sample_images, FrameExtractor, ImageBlob, WorkItem};
use crate::vision::VisionBackend;
use crate::{ReelscopeError, Result};

/// Highest score the rubric allows
const MAX_LEVEL: i64 = 10;

/// Runs single items end to end. Never fails: problems land in `VideoAnalysis::error`.
pub struct AnalysisEngine {
    frames: Arc<dyn FrameExtractor>,
    vision: Arc<dyn VisionBackend>,
    log: ActivityLog,
}

impl AnalysisEngine {
    pub fn new(frames: Arc<dyn FrameExtractor>, vision: Arc<dyn VisionBackend>, log: ActivityLog) -> Self {
        Self { frames, vision, log }
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Analyze one item
    pub async fn analyze_item(&self, item: &WorkItem, config: &AnalysisConfig) -> VideoAnalysis {
        let mut record = VideoAnalysis::new(
            item.id(),
            item.primary_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        record.is_image_set = item.is_image_set();
        record.image_count = item.image_count() as i64;

        match self.run_stages(item, config).await {
            Ok(parsed) => {
                record.tags = parsed.tags.unwrap_or_default();
                record.category = parsed.category.unwrap_or_default();
                record.summary = parsed.summary.unwrap_or_default();
                record.objects = parsed.objects.unwrap_or_default();
                record.scene = parsed.scene.unwrap_or_default();
                record.sexy_level = parsed.sexy_level.unwrap_or(0).clamp(0, MAX_LEVEL);

                let top: Vec<&str> = record.tags.iter().take(3).map(String::as_str).collect();
                self.log.push(format!(
                    "[done] {} | level {} | {}",
                    record.category,
                    record.sexy_level,
                    top.join(", ")
                ));
            }
            Err(e) => {
                let message = e.to_string();
                self.log.push(format!("[error] {}: {}", item.display_name(), message));
                record.error = Some(message);
            }
        }

        record.analyzed_at = Some(Utc::now());
        record
    }

    /// Sampling → Requesting → Parsing; the first failure short-circuits
    async fn run_stages(&self, item: &WorkItem, config: &AnalysisConfig) -> Result<ParsedModelResponse> {
        let images = self.sample(item, config).await?;

        self.log.push(format!(
            "[api] calling {} API with {} images",
            config.provider.display_name(),
            images.len()
        ));
        let raw = self.vision.describe(config, &images).await?;

        parse_response(&raw).ok_or_else(|| ReelscopeError::Parse("unparseable response".to_string()))
    }

    async fn sample(&self, item: &WorkItem, config: &AnalysisConfig) -> Result<Vec<ImageBlob>> {
        match item {
            WorkItem::Video { path } => {
                self.log.push(format!("[frames] extracting from {}", item.display_name()));
                let frames = self.frames.extract_frames(path, config.frame_count).await?;
                if frames.is_empty() {
                    return Err(ReelscopeError::FrameExtractionFailed(
                        "no frames could be extracted".to_string(),
                    ));
                }
                self.log.push(format!("[frames] extracted {} frames", frames.len()));
                Ok(frames)
            }
            WorkItem::ImageSet { prefix, paths } => {
                let sampled = sample_images(paths, config.sample_cap);
                self.log.push(format!(
                    "[image set] {} - {} images, sampling {}",
                    prefix,
                    paths.len(),
                    sampled.len()
                ));
                if sampled.is_empty() {
                    return Err(ReelscopeError::FrameExtractionFailed("empty image set".to_string()));
                }
                load_images(sampled).await
            }
        }
    }
}

/// Decode and re-encode off the async workers
async fn load_images(paths: Vec<PathBuf>) -> Result<Vec<ImageBlob>> {
    tokio::task::spawn_blocking(move || paths.iter().map(|p| prepare_image(p)).collect::<Result<Vec<_>>>())
        .await
        .map_err(|e| ReelscopeError::FrameExtractionFailed(format!("image loading aborted: {}", e)))?
}
