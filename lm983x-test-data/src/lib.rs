// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
mod cache_text;
mod raw_lines;

pub use cache_text::{
    sample_dark, sample_fine_cache, sample_white, SAMPLE_COARSE_CACHE, STALE_COARSE_CACHE,
};
pub use raw_lines::{
    calibration_strip, gray_lines, interleaved_color_lines, pattern_value, planar_color_lines,
    word_lines,
};
