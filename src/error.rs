// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Reelscope

use thiserror::Error;

/// Result type alias for Reelscope operations
pub type Result<T> = std::result::Result<T, ReelscopeError>;

/// Reelscope error types
#[derive(Error, Debug)]
pub enum ReelscopeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame extraction failed: {0}")]
    FrameExtractionFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({code}): {body}")]
    Api { code: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("An analysis batch is already running")]
    AlreadyRunning,

    #[error("Nothing to analyze")]
    EmptyBatch,

    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReelscopeError {
    /// Map a reqwest failure onto the vision error family.
    ///
    /// Anything that never produced a response (connect, timeout, body write) is a
    /// network error; the rest stay as raw HTTP errors. The URL is dropped because
    /// Gemini carries the API key in its query string.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ReelscopeError::Network(err.to_string())
        } else {
            ReelscopeError::Http(err)
        }
    }
}
