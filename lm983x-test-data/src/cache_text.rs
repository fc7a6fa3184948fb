// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
/// A coarse calibration cache with entries for 8-bit color, 8-bit gray and 16-bit film color.
///
/// The `color8` entry holds gains of 12/14/10, offsets of 130/131/129, the red and blue lamps on
/// for the whole line, the green lamp off and a green PWM duty of 4095.
pub const SAMPLE_COARSE_CACHE: &str = "version=0x0002
color8=12,130,14,131,10,129,0,16383,0,0,0,16383,4095
gray8=9,128,11,127,8,126,0,0,0,16383,0,0,4095
tpa-color16=20,140,22,141,18,139,0,16383,0,16383,0,16383,4095
";

/// The `color8` line of [`SAMPLE_COARSE_CACHE`], in a file from an older format version.
pub const STALE_COARSE_CACHE: &str = "version=0x0001
color8=12,130,14,131,10,129,0,16383,0,0,0,16383,4095
";

/// The dark value cached for `index` in [`sample_fine_cache`].
pub fn sample_dark(index: usize) -> u16 {
    4096 + (index % 13) as u16
}

/// The white value cached for `index` in [`sample_fine_cache`].
pub fn sample_white(index: usize) -> u16 {
    20000 + (index % 97) as u16 * 3
}

/// A fine calibration cache with a dark and white entry for `prefix` at `dpi`.
///
/// `prefix` is the source and data type part of the key, like `color` or `tpa-gray`. Each entry
/// holds three planes of `pixels` values.
pub fn sample_fine_cache(prefix: &str, dpi: u32, pixels: usize) -> String {
    let dim = pixels * 3;
    let mut text = String::from("version=0x0002\n");
    for (name, value) in [
        ("dark", sample_dark as fn(usize) -> u16),
        ("white", sample_white as fn(usize) -> u16),
    ] {
        let values: Vec<String> = (0..dim).map(|index| value(index).to_string()).collect();
        text.push_str(&format!(
            "{}:{}:{}:dim={}:{}\n",
            prefix,
            dpi,
            name,
            dim,
            values.join(",")
        ));
    }
    text
}
