// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
use arrayvec::ArrayVec;

/// The sample value of `channel` at `pixel` on `line`.
///
/// Every channel is a ramp offset from the others, moving by one step each line, so a misplaced
/// channel or line shows up as a wrong value rather than a plausible one.
pub fn pattern_value(pixel: usize, line: usize, channel: usize) -> u8 {
    ((pixel + line * 3 + channel * 85) % 256) as u8
}

/// Lines of 8-bit samples with the colors of each pixel next to each other, as CCD sensors send.
pub fn interleaved_color_lines(pixels: usize, lines: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(pixels * 3 * lines);
    for line in 0..lines {
        for pixel in 0..pixels {
            for channel in 0..3 {
                data.push(pattern_value(pixel, line, channel));
            }
        }
    }
    data
}

/// Lines of 8-bit samples with each color in its own third of the line, as CIS sensors send.
pub fn planar_color_lines(pixels: usize, lines: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(pixels * 3 * lines);
    for line in 0..lines {
        for channel in 0..3 {
            data.extend((0..pixels).map(|pixel| pattern_value(pixel, line, channel)));
        }
    }
    data
}

/// Lines of one 8-bit channel.
pub fn gray_lines(pixels: usize, lines: usize) -> Vec<u8> {
    (0..lines)
        .flat_map(|line| (0..pixels).map(move |pixel| pattern_value(pixel, line, 1)))
        .collect()
}

/// Lines of big-endian 16-bit samples, interleaved when there is more than one channel.
///
/// The 8-bit pattern is stretched over the full 16-bit range.
pub fn word_lines(pixels: usize, lines: usize, channels: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(pixels * channels * 2 * lines);
    for line in 0..lines {
        for pixel in 0..pixels {
            for channel in 0..channels {
                let value = u16::from(pattern_value(pixel, line, channel)) * 0x101;
                data.extend_from_slice(&value.to_be_bytes());
            }
        }
    }
    data
}

/// One line of a calibration strip, per channel.
///
/// The first `dark_pixels` are masked sensor pixels reading `dark`. The rest see the white strip
/// through a lens that is brightest in the middle, falling off by up to an eighth at the edges.
pub fn calibration_strip(
    pixels: usize,
    dark_pixels: usize,
    dark: u16,
    white: u16,
) -> ArrayVec<Vec<u16>, 3> {
    let lit = pixels.saturating_sub(dark_pixels).max(1) as f64;
    let middle = lit / 2.0;
    (0..3)
        .map(|channel| {
            // The channels differ a little in brightness, like real lamps do.
            let peak = f64::from(white) * (1.0 - channel as f64 * 0.02);
            (0..pixels)
                .map(|pixel| {
                    if pixel < dark_pixels {
                        return dark;
                    }
                    let distance = ((pixel - dark_pixels) as f64 - middle).abs() / middle;
                    let value = peak * (1.0 - distance.min(1.0) / 8.0);
                    (value as u16).max(dark)
                })
                .collect()
        })
        .collect()
}
