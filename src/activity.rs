// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded in-memory activity log shared by the engine and scheduler

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lines kept before trimming
pub const MAX_LINES: usize = 500;

/// Lines dropped from the front once the cap is exceeded
pub const TRIM_LINES: usize = 100;

/// Human-readable progress lines; every line is also sent to `tracing`
#[derive(Clone, Default)]
pub struct ActivityLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);

        // a poisoned log is still a usable log
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.push_back(line);
        if lines.len() > MAX_LINES {
            lines.drain(..TRIM_LINES);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// True if any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        let lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.iter().any(|l| l.contains(needle))
    }
}
