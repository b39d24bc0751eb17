// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Reelscope

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::ReelscopeError;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Folder holding downloaded videos and image sets
    #[serde(default = "default_media_root")]
    pub media_root: String,

    /// Vision backend and batch settings
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Supported vision backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini `generateContent`
    Gemini,
    /// xAI Grok, OpenAI chat-completions shape
    Grok,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::Grok => "Grok",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.0-flash",
            Provider::Grok => "grok-2-vision-1212",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::Grok => "https://api.x.ai",
        }
    }

    /// Environment variable consulted for a key when none is configured
    pub fn env_key(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Grok => "GROK_API_KEY",
        }
    }

    /// Request timeout; multi-image payloads are large, so these are generous
    pub fn request_timeout(&self) -> Duration {
        match self {
            Provider::Gemini => Duration::from_secs(60),
            Provider::Grok => Duration::from_secs(120),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => f.write_str("gemini"),
            Provider::Grok => f.write_str("grok"),
        }
    }
}

impl FromStr for Provider {
    type Err = ReelscopeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "grok" => Ok(Provider::Grok),
            other => Err(ReelscopeError::Config(format!("Unknown provider: {}", other))),
        }
    }
}

/// Persisted analysis settings (the `analysis` section of the config file)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisSettings {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default)]
    pub api_key: String,
    /// Empty means the provider default
    #[serde(default)]
    pub endpoint: String,
    /// Empty means the provider default
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: f64,
    /// Requests per minute; 0 disables the budget
    #[serde(default)]
    pub rpm: u32,
    #[serde(default = "default_true")]
    pub skip_analyzed: bool,
    #[serde(default = "default_curl")]
    pub curl_path: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Immutable configuration for one batch run
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub provider: Provider,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub frame_count: u32,
    pub sample_cap: usize,
    pub concurrency: usize,
    pub request_delay_secs: f64,
    pub rpm: u32,
    pub skip_analyzed: bool,
}

// Default value functions
fn default_media_root() -> String { "./downloads".to_string() }
fn default_provider() -> Provider { Provider::Gemini }
fn default_frame_count() -> u32 { 4 }
fn default_sample_cap() -> usize { 10 }
fn default_concurrency() -> usize { 1 }
fn default_request_delay() -> f64 { 2.0 }
fn default_true() -> bool { true }
fn default_curl() -> String { "curl".to_string() }
fn default_ffmpeg() -> String { "ffmpeg".to_string() }
fn default_ffprobe() -> String { "ffprobe".to_string() }
fn default_db_path() -> String { "reelscope.db".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            analysis: AnalysisSettings::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            endpoint: String::new(),
            model: String::new(),
            frame_count: default_frame_count(),
            sample_cap: default_sample_cap(),
            concurrency: default_concurrency(),
            request_delay_secs: default_request_delay(),
            rpm: 0,
            skip_analyzed: true,
            curl_path: default_curl(),
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl AnalysisSettings {
    /// API key from the config file, falling back to the provider's environment variable
    pub fn resolve_api_key(&self) -> String {
        non_blank(&self.api_key)
            .or_else(|| std::env::var(self.provider.env_key()).ok().and_then(|k| non_blank(&k)))
            .unwrap_or_default()
    }

    /// Freeze these settings into a per-run configuration
    pub fn to_analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            provider: self.provider,
            api_key: self.resolve_api_key(),
            endpoint: non_blank(&self.endpoint),
            model: non_blank(&self.model),
            frame_count: self.frame_count.max(1),
            sample_cap: self.sample_cap.max(1),
            concurrency: self.concurrency.max(1),
            request_delay_secs: self.request_delay_secs,
            rpm: self.rpm,
            skip_analyzed: self.skip_analyzed,
        }
    }
}

impl AnalysisConfig {
    /// Config with provider defaults, handy for tests and one-off runs
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let mut config = AnalysisSettings::default();
        config.provider = provider;
        config.api_key = api_key.into();
        config.to_analysis_config()
    }

    /// Delay applied between dispatches. A positive RPM budget wins over the explicit delay.
    pub fn effective_delay(&self) -> Duration {
        let secs = if self.rpm > 0 {
            60.0 / self.rpm as f64
        } else {
            self.request_delay_secs
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    pub fn resolved_endpoint(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or(self.provider.default_endpoint())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| ReelscopeError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> crate::Result<()> {
        let a = &self.analysis;
        if a.frame_count == 0 {
            return Err(ReelscopeError::Config("analysis.frame_count must be at least 1".into()));
        }
        if a.sample_cap < 2 {
            return Err(ReelscopeError::Config("analysis.sample_cap must be at least 2".into()));
        }
        if a.concurrency == 0 {
            return Err(ReelscopeError::Config("analysis.concurrency must be at least 1".into()));
        }
        if !a.request_delay_secs.is_finite() || a.request_delay_secs < 0.0 {
            return Err(ReelscopeError::Config("analysis.request_delay_secs must be >= 0".into()));
        }
        Ok(())
    }
}
