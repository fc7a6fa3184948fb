// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Per-pixel dark and white shading tables.
//!
//! Fine calibration produces two tables, each holding three planes (one per color) of one value
//! per physical pixel. The dark table holds the offset the ASIC subtracts from every sample, the
//! white table the multiplier it then applies, in units of 1/0x4000.
//!
//! Values are kept in host order here, and only converted to big-endian when they are streamed to
//! the scanner.
use tracing::{debug, trace};

use crate::device::{DeviceCaps, SensorOrder, Workarounds};
use crate::error::{Error, LibraryError};
use crate::register::{address, RegisterSet};
use crate::transport::{RegisterIo, TransportResult};

/// The most pixels a plane can hold.
pub const MAX_PIXELS: usize = 0x4000;

/// The brightest value a corrected sample should reach.
pub const GAIN_TARGET: u32 = 65535;

/// A white shading coefficient of 1.0.
pub const UNITY_GAIN: u32 = 0x4000;

/// Dark (offset) and white (gain) shading, three planes each.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadingTable {
    pixels: usize,
    dark: Vec<u16>,
    white: Vec<u16>,
}

impl ShadingTable {
    pub fn new(pixels: usize) -> Self {
        let mut table = Self::default();
        table.resize(pixels);
        table
    }

    /// Rebuild a table out of cached values. Both slices hold all three planes.
    pub fn from_parts(
        pixels: usize,
        dark: Vec<u16>,
        white: Vec<u16>,
    ) -> Result<Self, LibraryError> {
        if pixels > MAX_PIXELS || dark.len() != pixels * 3 || white.len() != pixels * 3 {
            return Err(LibraryError::CacheMismatch("shading table size"));
        }
        Ok(Self {
            pixels,
            dark,
            white,
        })
    }

    /// Clear both tables, keeping the size.
    pub fn reset(&mut self) {
        self.dark.fill(0);
        self.white.fill(0);
    }

    /// Change the number of pixels per plane. Every value is cleared.
    pub fn resize(&mut self, pixels: usize) {
        let pixels = pixels.min(MAX_PIXELS);
        self.pixels = pixels;
        self.dark.clear();
        self.dark.resize(pixels * 3, 0);
        self.white.clear();
        self.white.resize(pixels * 3, 0);
    }

    /// Change the number of pixels per plane, keeping the values.
    ///
    /// Planes are cut short, or padded with their last value. 8-bit scans round their physical
    /// width up to an even pixel count while the 16-bit shading strip does not, so the two can
    /// differ by a pixel.
    pub fn fit(&mut self, pixels: usize) {
        let pixels = pixels.min(MAX_PIXELS);
        if pixels == self.pixels {
            return;
        }
        let old = self.pixels;
        for table in [&mut self.dark, &mut self.white] {
            let mut fitted = Vec::with_capacity(pixels * 3);
            for plane in table.chunks_exact(old.max(1)).take(3) {
                let last = plane.last().copied().unwrap_or(0);
                fitted.extend(plane.iter().copied().take(pixels));
                fitted.resize(fitted.len() + pixels.saturating_sub(old), last);
            }
            fitted.resize(pixels * 3, 0);
            *table = fitted;
        }
        self.pixels = pixels;
    }

    /// Pixels per plane.
    pub fn pixels(&self) -> usize {
        self.pixels
    }

    pub fn dark(&self) -> &[u16] {
        &self.dark
    }

    pub fn white(&self) -> &[u16] {
        &self.white
    }

    pub fn dark_plane(&self, plane: usize) -> &[u16] {
        &self.dark[self.plane_span(plane)]
    }

    pub fn white_plane(&self, plane: usize) -> &[u16] {
        &self.white[self.plane_span(plane)]
    }

    pub fn dark_plane_mut(&mut self, plane: usize) -> &mut [u16] {
        let span = self.plane_span(plane);
        &mut self.dark[span]
    }

    pub fn white_plane_mut(&mut self, plane: usize) -> &mut [u16] {
        let span = self.plane_span(plane);
        &mut self.white[span]
    }

    /// Copy the dark values of `plane` into the other two planes.
    pub fn replicate_dark(&mut self, plane: usize) {
        let pixels = self.pixels;
        let source = self.plane_span(plane);
        for other in (0..3).filter(|p| *p != plane) {
            self.dark.copy_within(source.clone(), other * pixels);
        }
    }

    /// Copy the white values of `plane` into the other two planes.
    pub fn replicate_white(&mut self, plane: usize) {
        let pixels = self.pixels;
        let source = self.plane_span(plane);
        for other in (0..3).filter(|p| *p != plane) {
            self.white.copy_within(source.clone(), other * pixels);
        }
    }

    /// Cut a window of `len` pixels, starting at `offset`, out of every plane.
    ///
    /// This re-projects a table captured over the full sensor (as cached) onto the pixel window of
    /// the current scan.
    pub fn sub_range(&mut self, offset: usize, len: usize) -> Result<(), LibraryError> {
        if offset + len > self.pixels {
            debug!(offset, len, pixels = self.pixels, "shading window outside the cached line");
            return Err(LibraryError::CacheMismatch("shading window outside the cached line"));
        }
        let src_len = self.pixels;
        for table in [&mut self.dark, &mut self.white] {
            for plane in 0..3 {
                let start = plane * src_len + offset;
                table.copy_within(start..start + len, plane * len);
            }
            table.truncate(len * 3);
        }
        self.pixels = len;
        Ok(())
    }

    /// Turn a plain white average (as captured for negative film) into gain coefficients, with
    /// an extra amplification.
    ///
    /// `gain` is the software gain in per mille.
    pub fn resize_white(&mut self, amplification: f64, plane: usize, gain: u32) {
        trace!(amplification, plane, gain, "resizing white shading");
        for value in self.white_plane_mut(plane) {
            let base = GAIN_TARGET * UNITY_GAIN / (u32::from(*value) + 1);
            let amplified = (f64::from(base) * amplification) as u64 * u64::from(gain) / 1000;
            *value = amplified.min(u64::from(GAIN_TARGET)) as u16;
        }
    }

    fn plane_span(&self, plane: usize) -> core::ops::Range<usize> {
        let start = plane * self.pixels;
        start..start + self.pixels
    }
}

/// Which plane holds red, green and blue, in that order.
///
/// Planes are filled in the order the sensor delivers its colors. Devices with the
/// `RESET_SO_TO_RGB` workaround switch to RGB above the resolution stored as their PCB id.
pub fn ordered_planes(caps: &DeviceCaps, phy_dpi_x: u32) -> [usize; 3] {
    let mut order = caps.sensor_order;
    if caps.workarounds.contains(Workarounds::RESET_SO_TO_RGB)
        && caps.pcb != 0
        && phy_dpi_x > u32::from(caps.pcb)
    {
        order = SensorOrder::Rgb;
    }
    match order {
        SensorOrder::Gbr => [2, 0, 1],
        SensorOrder::Bgr => [2, 1, 0],
        _ => [0, 1, 2],
    }
}

/// The two tables in scanner DRAM.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Table {
    Dark,
    White,
}

/// The value for the shading select register (0x03) that routes the data port to one table and
/// one channel.
pub fn table_select(table: Table, channel: usize) -> u8 {
    let base = match table {
        Table::Dark => 0,
        Table::White => 1,
    };
    match channel {
        1 => base | 0x04,
        2 => base | 0x08,
        _ => base,
    }
}

/// Encode values for the data port. The LM983x expects big-endian words.
pub fn encode_be(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Stream one plane into a table in scanner DRAM.
pub fn download_plane<R: RegisterIo>(
    io: &mut R,
    regs: &mut RegisterSet,
    table: Table,
    channel: usize,
    values: &[u16],
) -> Result<(), Error<R::Error>> {
    regs[address::SHADING_SELECT] = table_select(table, channel);
    io.write(address::SHADING_SELECT, &[regs[address::SHADING_SELECT]])
        .transport()?;
    regs.set_word(address::DRAM_ADDRESS, 0);
    io.write(address::DRAM_ADDRESS, regs.range(address::DRAM_ADDRESS, 2))
        .transport()?;
    io.write_data(&encode_be(values)).transport()
}

/// How the ASIC applies shading while scanning.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShadingMode {
    /// Coarse calibration and fine dark capture. Offsets come from registers 0x3e/0x3f, no
    /// multiplier.
    Calibration,
    /// Fine white capture. Dark offsets from DRAM, no multiplier.
    WhiteCapture,
    /// A calibrated scan using both tables.
    Scan,
    /// A calibrated scan using only the dark table.
    ScanDarkOnly,
    /// Calibration is bypassed.
    Bypass,
    /// Fine calibration is skipped.
    SkipFine,
    /// Fine calibration is skipped and offsets forced to the maximum.
    SkipFineCleared,
}

/// Set the shading mode registers (0x3e to 0x42) for `mode`.
///
/// Returns the first register and the count that have to be written out.
pub fn set_shading_mode(regs: &mut RegisterSet, mode: ShadingMode, dram_size: u16) -> (u8, usize) {
    let large = dram_size > 512;
    let config = |small: u8| if large { small | 0x40 } else { small };
    match mode {
        ShadingMode::Calibration => {
            regs.set_word(address::SHADING_OFFSET, 0);
            regs.set_word(address::SHADING_MODE, 0x4000);
            regs[address::SHADING_MODE + 2] = config(0x20);
            (address::SHADING_OFFSET, 5)
        }
        ShadingMode::WhiteCapture => {
            regs.set_word(address::SHADING_MODE, 0x4000);
            regs[address::SHADING_MODE + 2] = config(0x24);
            (address::SHADING_MODE, 3)
        }
        ShadingMode::Bypass => {
            regs[address::SHADING_SELECT] = 0;
            regs.set_word(address::SHADING_MODE, 0x4000);
            regs[address::SHADING_MODE + 2] = config(0x21);
            (address::SHADING_MODE, 3)
        }
        ShadingMode::SkipFineCleared => {
            regs.set_word(address::SHADING_MODE, 0x3fff);
            regs[address::SHADING_MODE + 2] = config(0x20);
            (address::SHADING_MODE, 3)
        }
        ShadingMode::SkipFine => {
            regs[address::SHADING_MODE + 2] = config(0x20);
            (address::SHADING_MODE + 2, 1)
        }
        ShadingMode::Scan => {
            regs[address::SHADING_MODE + 2] = config(0x26);
            (address::SHADING_MODE + 2, 1)
        }
        ShadingMode::ScanDarkOnly => {
            regs[address::SHADING_MODE + 2] = config(0x24);
            (address::SHADING_MODE + 2, 1)
        }
    }
}

/// Average samples over lines, per pixel.
///
/// `lines` holds `width` samples per line, line after line.
pub fn average_lines(lines: &[u16], width: usize) -> Vec<u16> {
    if width == 0 {
        return Vec::new();
    }
    let count = (lines.len() / width).max(1) as u32;
    let mut sums = vec![0u32; width];
    for line in lines.chunks_exact(width) {
        for (sum, value) in sums.iter_mut().zip(line) {
            *sum += u32::from(*value);
        }
    }
    sums.into_iter().map(|sum| (sum / count) as u16).collect()
}

/// How dark levels are spread along a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DarkProfile {
    /// Every pixel keeps its own dark level, read off a dark strip.
    PerPixel,
    /// The whole line shares one level, as read with the lamp off.
    Flat,
    /// Even and odd pixels each share one level. CCDs that shift even and odd pixels out
    /// through separate registers need this.
    EvenOdd {
        /// Average the two levels into one.
        merge: bool,
    },
}

/// Build a dark plane out of per-pixel averages, adding a software offset.
pub fn dark_plane(averages: &[u16], profile: DarkProfile, offset: i32) -> Vec<u16> {
    let clamp = |value: i64| value.clamp(0, 0xffff) as u16;
    let with_offset = |value: u64| clamp(value as i64 + i64::from(offset));
    if averages.is_empty() {
        return Vec::new();
    }
    match profile {
        DarkProfile::PerPixel => averages
            .iter()
            .map(|v| with_offset(u64::from(*v)))
            .collect(),
        DarkProfile::Flat => {
            let sum: u64 = averages.iter().map(|v| u64::from(*v)).sum();
            let level = with_offset(sum / averages.len() as u64);
            vec![level; averages.len()]
        }
        DarkProfile::EvenOdd { merge } => {
            let mut sums = [0u64; 2];
            let mut counts = [0u64; 2];
            for (idx, value) in averages.iter().enumerate() {
                sums[idx & 1] += u64::from(*value);
                counts[idx & 1] += 1;
            }
            let mut levels = [0u64; 2];
            for parity in 0..2 {
                levels[parity] = if counts[parity] == 0 {
                    0
                } else {
                    sums[parity] / counts[parity]
                };
            }
            if counts[1] == 0 {
                levels[1] = levels[0];
            }
            if merge {
                let merged = (levels[0] + levels[1]) / 2;
                levels = [merged; 2];
            }
            let levels = [with_offset(levels[0]), with_offset(levels[1])];
            (0..averages.len()).map(|idx| levels[idx & 1]).collect()
        }
    }
}

/// Sum each pixel over lines, leaving out the `trim` brightest and `trim` darkest lines.
///
/// Returns the sums along with the number of lines that went into them.
pub fn trimmed_sums(lines: &[u16], width: usize, trim: usize) -> (Vec<u32>, u32) {
    if width == 0 {
        return (Vec::new(), 0);
    }
    let count = lines.len() / width;
    let trim = if count > trim * 2 { trim } else { 0 };
    let kept = count - trim * 2;
    let mut column = Vec::with_capacity(count);
    let sums = (0..width)
        .map(|x| {
            column.clear();
            column.extend(lines.chunks_exact(width).map(|line| line[x]));
            column.sort_unstable();
            column[trim..trim + kept]
                .iter()
                .map(|v| u32::from(*v))
                .sum()
        })
        .collect();
    (sums, kept as u32)
}

/// The white shading coefficient for a pixel.
///
/// `sum` over `count` lines is first scaled by the software gain (in per mille), then inverted so
/// the pixel reaches [`GAIN_TARGET`].
pub fn white_coefficient(sum: u32, count: u32, software_gain: u32) -> u16 {
    let divisor = u64::from(count) * u64::from(software_gain.max(1));
    if divisor == 0 {
        return GAIN_TARGET as u16;
    }
    let level = (u64::from(sum) * 1000 / divisor).min(u64::from(GAIN_TARGET));
    if level > u64::from(UNITY_GAIN) {
        (u64::from(GAIN_TARGET) * u64::from(UNITY_GAIN) / level) as u16
    } else {
        GAIN_TARGET as u16
    }
}

#[cfg(test)]
mod test {
    use lm983x_test_data::calibration_strip;

    use super::*;
    use crate::device::DeviceProfile;
    use crate::test::MockScanner;

    #[test]
    fn planes_are_contiguous() {
        let mut table = ShadingTable::new(4);
        table.dark_plane_mut(1).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(table.dark(), &[0, 0, 0, 0, 1, 2, 3, 4, 0, 0, 0, 0]);
        table.replicate_dark(1);
        assert_eq!(table.dark_plane(0), &[1, 2, 3, 4]);
        assert_eq!(table.dark_plane(2), &[1, 2, 3, 4]);
        table.reset();
        assert!(table.dark().iter().all(|v| *v == 0));
        assert_eq!(table.pixels(), 4);
    }

    #[test]
    fn resize_clamps() {
        let table = ShadingTable::new(MAX_PIXELS + 10);
        assert_eq!(table.pixels(), MAX_PIXELS);
        assert_eq!(table.white().len(), MAX_PIXELS * 3);
    }

    #[test]
    fn window_from_full_line() {
        let dark: Vec<u16> = (0..30).collect();
        let white: Vec<u16> = (100..130).collect();
        let mut table = ShadingTable::from_parts(10, dark, white).unwrap();
        table.sub_range(2, 4).unwrap();
        assert_eq!(table.pixels(), 4);
        assert_eq!(table.dark(), &[2, 3, 4, 5, 12, 13, 14, 15, 22, 23, 24, 25]);
        assert_eq!(table.white_plane(2), &[122, 123, 124, 125]);
        assert!(table.sub_range(2, 4).is_err());
    }

    #[test]
    fn fit_keeps_values() {
        let dark: Vec<u16> = (0..9).collect();
        let mut table = ShadingTable::from_parts(3, dark, vec![7; 9]).unwrap();
        table.fit(4);
        assert_eq!(table.dark(), &[0, 1, 2, 2, 3, 4, 5, 5, 6, 7, 8, 8]);
        assert_eq!(table.white_plane(2), &[7; 4]);
        table.fit(2);
        assert_eq!(table.dark(), &[0, 1, 3, 4, 6, 7]);
        let mut empty = ShadingTable::default();
        empty.fit(2);
        assert_eq!(empty.dark(), &[0; 6]);
    }

    #[test]
    fn from_parts_checks_shape() {
        assert!(ShadingTable::from_parts(4, vec![0; 12], vec![0; 11]).is_err());
        assert!(ShadingTable::from_parts(4, vec![0; 12], vec![0; 12]).is_ok());
    }

    #[test]
    fn negative_resize() {
        let mut table = ShadingTable::new(2);
        table.white_plane_mut(0).copy_from_slice(&[0x7fff, 0]);
        table.resize_white(1.0, 0, 1000);
        // 65535 * 0x4000 / 0x8000 is just under 0x8000.
        assert_eq!(table.white_plane(0)[0], 0x7fff);
        assert_eq!(table.white_plane(0)[1], 0xffff);
        assert_eq!(table.white_plane(1), &[0, 0]);
    }

    #[test]
    fn plane_order() {
        let mut caps = DeviceProfile::canon_lide25().caps;
        assert_eq!(ordered_planes(&caps, 600), [0, 1, 2]);
        caps.sensor_order = SensorOrder::Gbr;
        assert_eq!(ordered_planes(&caps, 600), [2, 0, 1]);
        caps.sensor_order = SensorOrder::Bgr;
        caps.workarounds.insert(Workarounds::RESET_SO_TO_RGB);
        caps.pcb = 300;
        assert_eq!(ordered_planes(&caps, 300), [2, 1, 0]);
        assert_eq!(ordered_planes(&caps, 600), [0, 1, 2]);
    }

    #[test]
    fn select_register() {
        assert_eq!(table_select(Table::Dark, 0), 0);
        assert_eq!(table_select(Table::Dark, 1), 4);
        assert_eq!(table_select(Table::White, 2), 9);
    }

    #[test]
    fn big_endian_encoding() {
        assert_eq!(encode_be(&[0x1234, 0x00ff]), vec![0x12, 0x34, 0x00, 0xff]);
    }

    #[test]
    fn download_writes_select_address_and_data() {
        let scanner = MockScanner::new(DeviceProfile::plustek_ut12());
        let mut io = scanner.clone();
        let mut regs = RegisterSet::new();
        download_plane(&mut io, &mut regs, Table::White, 1, &[0x4000, 0x4001]).unwrap();
        assert_eq!(scanner.register(address::SHADING_SELECT), 0x05);
        assert_eq!(scanner.last_data(), vec![0x40, 0x00, 0x40, 0x01]);
    }

    #[test]
    fn shading_modes() {
        let mut regs = RegisterSet::new();
        assert_eq!(set_shading_mode(&mut regs, ShadingMode::Calibration, 512), (0x3e, 5));
        assert_eq!(regs.range(0x3e, 5), &[0, 0, 0x40, 0, 0x20]);
        set_shading_mode(&mut regs, ShadingMode::Scan, 2048);
        assert_eq!(regs[0x42], 0x66);
        set_shading_mode(&mut regs, ShadingMode::Bypass, 512);
        assert_eq!(regs[0x42], 0x21);
        set_shading_mode(&mut regs, ShadingMode::SkipFineCleared, 512);
        assert_eq!(regs.range(0x40, 3), &[0x3f, 0xff, 0x20]);
    }

    #[test]
    fn line_averages() {
        let lines = [10u16, 20, 30, 12, 22, 33];
        assert_eq!(average_lines(&lines, 3), vec![11, 21, 31]);
    }

    #[test]
    fn dark_profiles() {
        let averages = [100u16, 200, 110, 210];
        assert_eq!(dark_plane(&averages, DarkProfile::PerPixel, -150), vec![0, 50, 0, 60]);
        assert_eq!(dark_plane(&averages, DarkProfile::Flat, 0), vec![155; 4]);
        assert_eq!(
            dark_plane(&averages, DarkProfile::EvenOdd { merge: false }, 5),
            vec![110, 210, 110, 210]
        );
        assert_eq!(
            dark_plane(&averages, DarkProfile::EvenOdd { merge: true }, 0),
            vec![155; 4]
        );
    }

    #[test]
    fn trimming_drops_outliers() {
        // One pixel over ten lines, with two outliers on each end.
        let lines = [0u16, 1000, 500, 500, 500, 500, 500, 500, 65535, 2];
        let (sums, count) = trimmed_sums(&lines, 1, 2);
        assert_eq!(count, 6);
        assert_eq!(sums, vec![3000]);
        // Too few lines to trim.
        let (sums, count) = trimmed_sums(&[1, 2, 3], 1, 4);
        assert_eq!((sums, count), (vec![6], 3));
    }

    #[test]
    fn white_coefficients() {
        // Exactly a quarter of full scale needs a gain of 4.
        assert_eq!(white_coefficient(0x4000 * 2, 2, 1000), 0xffff);
        assert_eq!(white_coefficient(0x8000 * 2, 2, 1000), 0x7fff);
        assert_eq!(white_coefficient(0xffff, 1, 1000), 0x4000);
        assert_eq!(white_coefficient(0, 0, 1000), 0xffff);
        // A lower software gain brightens.
        assert!(white_coefficient(0x8000, 1, 950) < white_coefficient(0x8000, 1, 1000));
    }

    #[test]
    fn white_coefficients_flatten_the_strip() {
        let strip = calibration_strip(200, 0, 0, 40000);
        let line = &strip[1];
        let lines: Vec<u16> = line.iter().cycle().take(line.len() * 4).copied().collect();
        let (sums, count) = trimmed_sums(&lines, line.len(), 1);
        assert_eq!(count, 2);
        for (&sum, &raw) in sums.iter().zip(line.iter()) {
            let coefficient = u32::from(white_coefficient(sum, count, 1000));
            let corrected = u32::from(raw) * coefficient / UNITY_GAIN;
            assert!((65500..=65535).contains(&corrected), "{} -> {}", raw, corrected);
        }
    }
}
