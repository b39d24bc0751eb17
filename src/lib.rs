// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reelscope: vision-model tagging for downloaded short videos and image sets
//!
//! Locates media in a download folder, samples frames, asks a vision backend
//! (Gemini or Grok) for structured tags, and stores the results in SQLite.

pub mod activity;
pub mod config;
pub mod contract;
pub mod db;
pub mod engine;
pub mod error;
pub mod media;
pub mod scheduler;
pub mod vision;

pub use config::AppConfig;
pub use error::{ReelscopeError, Result};
