// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use reelscope::contract::parse_response;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(parsed) = parse_response(text) {
            assert!(parsed.tags.map_or(true, |tags| tags.len() <= text.len()));
        }
    }
});
