// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Translating a scan request into LM983x register values.
//!
//! Everything in this module is plain arithmetic over a [`DeviceProfile`], a [`ScanParam`] and a
//! [`RegisterSet`]. Nothing here talks to the scanner, and nothing here fails: out of range
//! requests are clamped, and callers compare the physical resolution in the returned
//! [`ScanParam`] to what they asked for.
//!
//! The horizontal resolution is reached by dividing the optical resolution with one of the
//! dividers the ASIC supports, the vertical one by stepping the motor. The remaining registers
//! (line length, step sizes, master clock, pause limits) follow from those two and have to be
//! derived together, in the order [`Planner::plan`] runs them.
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, trace};

use crate::device::{
    Adjustments, CcdId, Chip, DataType, DeviceFlags, DeviceProfile, ImageType, MotorModel,
    ScanSource, Workarounds, Xy, CRYSTAL_FREQ,
};
use crate::register::{address, color_mode, RegisterSet};
use crate::tuning::{self, MotorDef};
use crate::util::div_ceil;

/// The transfer rate assumed until it has been measured, in bytes per second.
pub const DEFAULT_TRANSFER_RATE: u32 = 1_000_000;

/// Marks a fast bus. At this rate the master clock is derived from the pixel throughput instead
/// of being taken from the motor table.
pub const FAST_TRANSFER_RATE: u32 = 2_000_000;

/// The product of the horizontal divider and the master clock below which the integration time
/// has to be stretched.
const MIN_INTEGRATION_PRODUCT: f64 = 5.3;

/// The master clock divider is calculated in halves.
const MCLK_SCALING: u32 = 2;

const MAX_SCALED_MCLK: u32 = 65;

/// The horizontal resolution dividers of the LM983x, as stored in the low bits of register 0x09.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HorizontalDivider {
    One = 0,
    OneAndHalf = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Six = 5,
    Eight = 6,
    Twelve = 7,
}

impl HorizontalDivider {
    pub fn factor(self) -> f64 {
        match self {
            HorizontalDivider::One => 1.0,
            HorizontalDivider::OneAndHalf => 1.5,
            HorizontalDivider::Two => 2.0,
            HorizontalDivider::Three => 3.0,
            HorizontalDivider::Four => 4.0,
            HorizontalDivider::Six => 6.0,
            HorizontalDivider::Eight => 8.0,
            HorizontalDivider::Twelve => 12.0,
        }
    }

    /// The largest divider not above `ratio`, so the resulting resolution is never below the
    /// requested one.
    pub fn for_ratio(ratio: f64) -> Self {
        if ratio < 1.5 {
            HorizontalDivider::One
        } else if ratio < 2.0 {
            HorizontalDivider::OneAndHalf
        } else if ratio < 3.0 {
            HorizontalDivider::Two
        } else if ratio < 4.0 {
            HorizontalDivider::Three
        } else if ratio < 6.0 {
            HorizontalDivider::Four
        } else if ratio < 8.0 {
            HorizontalDivider::Six
        } else if ratio < 12.0 {
            HorizontalDivider::Eight
        } else {
            HorizontalDivider::Twelve
        }
    }
}

/// Pick the horizontal divider for a requested resolution.
///
/// Returns the physical resolution the sensor will be clocked at along with the divider.
pub fn horizontal_divider(optic_x: u32, user_x: u32) -> (u32, HorizontalDivider) {
    let ratio = if user_x == 0 {
        1.0
    } else {
        f64::from(optic_x) / f64::from(user_x)
    };
    let divider = HorizontalDivider::for_ratio(ratio);
    ((f64::from(optic_x) / divider.factor()) as u32, divider)
}

/// The resolution reached with the `index`-th divider, counted from 1 for the coarsest (12).
///
/// Out of range indices give 0, which ends a walk over the ladder.
pub fn ladder_resolution(base: u32, index: usize) -> u32 {
    const DIVIDERS: [f64; 8] = [12.0, 8.0, 6.0, 4.0, 3.0, 2.0, 1.5, 1.0];
    match index.checked_sub(1).and_then(|idx| DIVIDERS.get(idx)) {
        Some(divider) => (f64::from(base) / divider) as u32,
        None => 0,
    }
}

/// Round a requested vertical resolution up to one the motor and sensor can deliver.
pub fn vertical_dpi(
    profile: &DeviceProfile,
    user_y: u32,
    data_type: DataType,
    bit_depth: u8,
) -> u32 {
    let caps = &profile.caps;
    let step = if caps.sensor_distance != 0 {
        caps.optic_dpi.y / u32::from(caps.sensor_distance)
    } else {
        75
    }
    .max(1);
    let mut dpi = div_ceil(user_y, step) * step;
    dpi = dpi.min(caps.optic_dpi.y * 2);

    let model = profile.hw.motor_model;
    if model.is_plustek() && model != MotorModel::Tokyo600 {
        if caps.flags.contains(DeviceFlags::ADF) && caps.optic_dpi.x == 600 {
            if data_type == DataType::Color && bit_depth > 8 && dpi < 300 {
                dpi = 300;
            }
        } else if caps.optic_dpi.x == 1200 && data_type != DataType::Color && dpi < 200 {
            dpi = 200;
        }
    }
    dpi
}

/// What a scan (or a calibration strip) is taken for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Scan,
    /// Coarse gain, reading the whole sensor.
    Gain,
    DarkShading,
    WhiteShading,
    /// Coarse offset, reading the whole sensor.
    Offset,
}

impl Phase {
    /// Coarse calibration reads the full sensor, starting at its first pixel.
    pub fn reads_whole_sensor(self) -> bool {
        matches!(self, Phase::Gain | Phase::Offset)
    }
}

/// Sizes of a scan window, at user and at physical resolution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WinInfo {
    pub pixels: u32,
    pub bytes: u32,
    pub lines: u32,
    pub valid_pixels: u32,
    pub phy_pixels: u32,
    /// Bytes the ASIC sends per line, including the two status bytes.
    pub phy_bytes: u32,
    pub phy_lines: u32,
    pub total_bytes: u32,
}

/// The settings of one scan or calibration strip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanParam {
    pub size: WinInfo,
    pub user_dpi: Xy,
    pub phy_dpi: Xy,
    /// Top-left corner in 1/300", already including the source's data origin.
    pub origin: Xy,
    /// Master clock divider.
    pub mclk: f64,
    pub source: ScanSource,
    pub data_type: DataType,
    pub bit_depth: u8,
    pub channels: u8,
    pub phase: Phase,
}

flag_set! {
    /// Options for how a scan is delivered.
    ScanFlags: u32 {
        /// Deliver blue, green, red instead of red, green, blue.
        BGR = 0x0001;
        /// Fill the output from the last line up.
        BOTTOM_UP = 0x0002;
        /// Calibration mode. No color substitutions are made.
        CALIBRATION = 0x0004;
        /// Pad output lines to a multiple of four bytes.
        DWORD_BOUNDARY = 0x0008;
        /// Keep 16-bit samples right aligned.
        RIGHT_ALIGN = 0x0010;
        /// Leave the carriage where it is after the scan.
        STILL_MODULE = 0x0020;
        /// Full quality scan. Without it calibration is bypassed.
        QUALITY = 0x0040;
        /// 16-bit output built from 8-bit samples.
        PSEUDO48 = 0x0080;
        /// Drop lines to reach a vertical resolution below the physical one.
        SAMPLE_Y = 0x0100;
    }
}

/// A scan area in 1/300".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Area {
    pub x: u32,
    pub y: u32,
    pub cx: u32,
    pub cy: u32,
}

/// An image as requested by a caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageRequest {
    pub area: Area,
    pub dpi: Xy,
    pub image_type: ImageType,
    pub source: ScanSource,
    pub flags: ScanFlags,
}

/// How to build gray or black and white output out of a color scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FromColor {
    /// The color channel that becomes the gray value.
    pub channel: usize,
    /// Threshold the channel into one bit per pixel.
    pub binary: bool,
}

/// A [`ScanParam`] prepared from an [`ImageRequest`], plus what the image reader needs to know.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanSetup {
    pub param: ScanParam,
    pub flags: ScanFlags,
    /// Bytes per output line, after any padding.
    pub bytes_per_line: u32,
    pub from_color: Option<FromColor>,
}

/// The output size of a request, at user resolution.
pub fn image_info(
    area: &Area,
    dpi: Xy,
    image_type: ImageType,
    from_color: Option<FromColor>,
) -> WinInfo {
    let mut size = WinInfo {
        pixels: area.cx * dpi.x / 300,
        lines: area.cy * dpi.y / 300,
        ..WinInfo::default()
    };
    let binary = image_type == ImageType::BlackWhite
        || (image_type == ImageType::Color24 && from_color.map_or(false, |c| c.binary));
    if binary {
        size.bytes = (size.pixels + 7) >> 3;
        size.pixels = size.bytes * 8;
    } else {
        size.bytes = match image_type {
            ImageType::Color48 => size.pixels * 6,
            ImageType::Color24 => size.pixels * 3,
            ImageType::Gray16 => size.pixels * 2,
            _ => size.pixels,
        };
    }
    size
}

impl ScanParam {
    /// Turn a caller's request into scan settings.
    ///
    /// This substitutes color scans for gray or black and white where the model needs it, snaps
    /// the origin of sheet-fed devices, and moves the origin into the source's scan area.
    pub fn from_request(
        profile: &DeviceProfile,
        request: &ImageRequest,
        adjustments: &Adjustments,
    ) -> ScanSetup {
        let caps = &profile.caps;
        let workarounds = caps.workarounds;
        let mut image_type = request.image_type;
        let mut from_color = None;

        if !request.flags.contains(ScanFlags::CALIBRATION) {
            let green = |binary| {
                Some(FromColor {
                    channel: 1,
                    binary,
                })
            };
            match image_type {
                ImageType::Gray8 => {
                    let optic_gray = request.source != ScanSource::Adf
                        && !profile.is_cis()
                        && caps.optic_dpi.x == 1200
                        && request.dpi.x <= 300;
                    if optic_gray || workarounds.contains(Workarounds::GRAY_FROM_COLOR) {
                        from_color = green(false);
                        image_type = ImageType::Color24;
                    }
                }
                ImageType::Gray16 if workarounds.contains(Workarounds::GRAY_FROM_COLOR) => {
                    from_color = green(false);
                    image_type = ImageType::Color48;
                }
                ImageType::BlackWhite if workarounds.contains(Workarounds::BIN_FROM_COLOR) => {
                    from_color = green(true);
                    image_type = ImageType::Color24;
                }
                _ => (),
            }
            if from_color.is_some() {
                debug!(?image_type, ?from_color, "scanning color for a monochrome request");
            }
        }

        let data_type = image_type.data_type();
        let channels = if data_type == DataType::Color && !profile.is_cis() {
            3
        } else {
            1
        };
        let mut origin = Xy::new(request.area.x, request.area.y);
        if caps.is_sheet_fed() {
            let (xdpi, _) = horizontal_divider(caps.optic_dpi.x, request.dpi.x);
            let div = match xdpi * 2 {
                0..=300 => 300,
                301..=600 => 600,
                601..=1200 => 1200,
                _ => 2400,
            };
            let step = (div / xdpi.max(1)).max(1);
            origin.x = origin.x / step * step;
        }

        let mut size = image_info(&request.area, request.dpi, image_type, from_color);

        let mut flags = request.flags;
        flags.remove(ScanFlags::PSEUDO48);
        flags.remove(ScanFlags::SAMPLE_Y);
        let mut bit_depth = image_type.bit_depth();
        if bit_depth <= 8 {
            flags.remove(ScanFlags::RIGHT_ALIGN);
        }

        let gray_from_color = from_color.map_or(false, |c| !c.binary);
        let line_bytes = if gray_from_color {
            size.bytes / 3
        } else {
            size.bytes
        };
        let bytes_per_line = if flags.contains(ScanFlags::DWORD_BOUNDARY) {
            (line_bytes + 3) & !3
        } else {
            line_bytes
        };

        if bit_depth > 8 && profile.hw.chip == Chip::Lm9831 {
            bit_depth = 8;
            flags.insert(ScanFlags::PSEUDO48);
            size.bytes >>= 1;
        }

        let source_caps = caps.source(request.source);
        let offset = adjustments.origin_offset(request.source);
        let shift = |base: u32, data: u32, adj: i32| {
            (i64::from(base) + i64::from(data) + i64::from(adj)).max(0) as u32
        };
        origin.x = shift(origin.x, source_caps.data_origin.x, offset.x);
        origin.y = shift(origin.y, source_caps.data_origin.y, offset.y);

        let phy_y = vertical_dpi(profile, request.dpi.y, data_type, bit_depth);
        let mclk = tuning::motor(profile.hw.motor_model).mclk(data_type, bit_depth, phy_y);

        ScanSetup {
            param: ScanParam {
                size,
                user_dpi: request.dpi,
                phy_dpi: Xy::default(),
                origin,
                mclk,
                source: request.source,
                data_type,
                bit_depth,
                channels,
                phase: Phase::Scan,
            },
            flags,
            bytes_per_line,
            from_color,
        }
    }
}

/// The derived timing of a planned scan.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plan {
    pub hdpi_divider: f64,
    /// 3 for color, 1 for gray and black and white.
    pub channel_mode: u8,
    /// Line length in pixel periods.
    pub line_length: u16,
    /// 3 when the AFE samples colors line by line, 1 otherwise.
    pub line_rate_color: u8,
    pub step_size: u16,
    /// Integration time adjust.
    pub ita: u8,
    pub mclk: f64,
    pub fast_feed_step: u16,
    /// Distance between CCD color rows, in physical lines.
    pub line_distance: u32,
    /// Lines dropped at the start of a scan while the motor settles.
    pub lines_to_skip: u32,
    /// Lines needed to line up the color rows of a CCD, dropped at the start of a scan.
    pub lines_discard: u32,
    /// DRAM fill level, in KiB, at which the ASIC pauses the motor.
    pub pause_limit: u32,
}

/// Computes the register settings for scans on one device.
#[derive(Clone, Debug)]
pub struct Planner<'a> {
    profile: &'a DeviceProfile,
    motor: &'static MotorDef,
    transfer_rate: u32,
    max_ita: u8,
}

impl<'a> Planner<'a> {
    pub fn new(profile: &'a DeviceProfile) -> Self {
        Self {
            profile,
            motor: tuning::motor(profile.hw.motor_model),
            transfer_rate: DEFAULT_TRANSFER_RATE,
            max_ita: 0xff,
        }
    }

    pub fn profile(&self) -> &'a DeviceProfile {
        self.profile
    }

    pub fn transfer_rate(&self) -> u32 {
        self.transfer_rate
    }

    /// Set the measured USB transfer rate, in bytes per second.
    pub fn set_transfer_rate(&mut self, rate: u32) {
        self.transfer_rate = rate;
    }

    /// Cap the integration time adjust for 16-bit scans on HuaLien motors.
    pub fn set_max_ita(&mut self, max_ita: u8) {
        self.max_ita = max_ita;
    }

    /// Compute every register a scan depends on, in the order the ASIC requires.
    ///
    /// The physical resolution and the physical sizes are filled in on `param`.
    pub fn plan(&self, regs: &mut RegisterSet, param: &mut ScanParam) -> Plan {
        let caps = &self.profile.caps;
        let mut plan = Plan::default();

        param.phy_dpi.x = self.horizontal(regs, param, &mut plan);
        param.phy_dpi.y = vertical_dpi(
            self.profile,
            param.user_dpi.y,
            param.data_type,
            param.bit_depth,
        );

        self.color_and_bits(regs, param, &mut plan);
        self.scan_window(regs, param, &plan);
        self.preset_step_size(regs, param, &plan);
        self.adf_registers(regs, param, &mut plan);

        self.line_length(regs, param, &mut plan);
        self.step_size(regs, param, &mut plan);
        self.data_pixel_delay(regs, &plan);
        self.mclk_divider(regs, param, &mut plan);
        self.motor_param(regs, param);
        self.fast_feed_step(regs, param, &mut plan);
        self.scan_lines_and_size(param, &mut plan);
        self.pause_limit(regs, param, &mut plan);

        regs[address::COMMAND] = 0;
        regs[0x28] = 0;
        regs.clear(address::SHADING_SELECT, 3);
        regs.clear(0x5f, 0x21);

        if param.phase == Phase::Scan {
            plan.lines_to_skip = param.phy_dpi.y / 50;
            if param.channels == 3 {
                plan.lines_discard =
                    2 * u32::from(caps.sensor_distance) * param.phy_dpi.y / caps.optic_dpi.y;
            }
            if !caps.is_sheet_fed() && param.source != ScanSource::Adf {
                let lines =
                    param.size.phy_lines + plan.lines_to_skip + plan.lines_discard + 5;
                let steps = (f64::from(lines) * f64::from(self.profile.hw.motor_dpi)
                    / f64::from(param.phy_dpi.y.max(1)))
                .ceil();
                regs.set_full_steps_to_scan(steps as u16);
            }
        }

        debug!(
            phy_dpi = ?param.phy_dpi,
            line_length = plan.line_length,
            step_size = plan.step_size,
            mclk = plan.mclk,
            ita = plan.ita,
            phy_bytes = param.size.phy_bytes,
            phy_lines = param.size.phy_lines,
            "planned {:?} phase",
            param.phase
        );
        plan
    }

    /// Horizontal divider (register 0x09). Returns the physical resolution.
    fn horizontal(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) -> u32 {
        let optic_x = self.profile.caps.optic_dpi.x;
        let mut user_x = param.user_dpi.x;
        if optic_x == 1200 && param.data_type == DataType::BlackWhite && user_x < 150 {
            user_x = 150;
        }
        let (phy_x, divider) = horizontal_divider(optic_x, user_x);
        let mut code = u8::from(divider);
        let preview = regs[address::PREVIEW];
        if preview != 0 {
            code = code.wrapping_sub((preview >> 2) + 2);
        }
        regs[address::HORIZONTAL_RESOLUTION] = code;
        plan.hdpi_divider = divider.factor();
        trace!(user_x, phy_x, ?divider, "horizontal resolution");
        phy_x
    }

    /// Color mode (0x26, 0x27), sensor timing (0x0f to 0x18) and pixel depth (0x09).
    fn color_and_bits(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let hw = &self.profile.hw;
        let timing = if param.data_type == DataType::Color {
            plan.channel_mode = 3;
            let mut mode = hw.reg_26 & 0x07;
            if mode & color_mode::ONE_CHANNEL_COLOR != 0 {
                mode |= color_mode::BLUE | 0x01;
            }
            regs[address::COLOR_MODE] = mode;
            &hw.timing_color
        } else {
            plan.channel_mode = 1;
            regs[address::COLOR_MODE] = (hw.reg_26 & 0x18) | color_mode::ONE_CHANNEL_COLOR;
            &hw.timing_mono
        };
        regs.range_mut(address::SENSOR_TIMING, timing.len())
            .copy_from_slice(timing);
        regs[address::COLOR_MODE_EXTRA] = hw.reg_27;

        if param.bit_depth > 8 {
            regs[address::HORIZONTAL_RESOLUTION] |= 0x20;
        } else if param.bit_depth == 8 {
            regs[address::HORIZONTAL_RESOLUTION] |= 0x18;
        }
    }

    /// Physical pixels and bytes per line.
    ///
    /// The ASIC sends whole 16-bit words and appends two status bytes to every line.
    pub fn physical_pixels(&self, param: &mut ScanParam) {
        let size = &mut param.size;
        size.valid_pixels = if param.user_dpi.x == 0 {
            size.pixels
        } else {
            size.pixels * param.phy_dpi.x / param.user_dpi.x
        };
        let channels = u32::from(param.channels);
        let cis_color = self.profile.is_cis() && param.data_type == DataType::Color;
        match param.bit_depth {
            1 => {
                size.phy_pixels = (size.valid_pixels + 15) & !15;
                size.phy_bytes = size.phy_pixels / 8 + 2;
            }
            8 => {
                size.phy_pixels = (size.valid_pixels + 1) & !1;
                size.phy_bytes = size.phy_pixels * channels + 2;
                if cis_color {
                    size.phy_bytes *= 3;
                }
            }
            _ => {
                size.phy_pixels = size.valid_pixels;
                size.phy_bytes = size.phy_pixels * 2 * channels + 2;
                if cis_color {
                    size.phy_bytes *= 3;
                }
            }
        }
    }

    /// Data pixel window (0x22 to 0x25) and the start position in motor steps (0x4a, 0x4b).
    fn scan_window(&self, regs: &mut RegisterSet, param: &mut ScanParam, plan: &Plan) {
        let caps = &self.profile.caps;
        let hw = &self.profile.hw;
        self.physical_pixels(param);

        let mut start = (param.origin.x * caps.optic_dpi.x / 300) as u16;
        if !param.phase.reads_whole_sensor() {
            start = start.wrapping_add(hw.active_pixels_start);
        }
        let width = (plan.hdpi_divider * f64::from(param.size.phy_pixels) + 0.5) as u16;
        let mut end = start.wrapping_add(width);
        if start & 1 != 0 {
            start = start.wrapping_add(1);
            end = end.wrapping_add(1);
        }
        regs.set_data_pixels_start(start);
        regs.set_data_pixels_end(end);

        let mut origin_y = i64::from(param.origin.y);
        if param.phase == Phase::Scan {
            if hw.motor_model == MotorModel::Tokyo600 {
                origin_y += tokyo600_origin_shift(param.phy_dpi.x, param.data_type);
            }
            if param.data_type != DataType::Color {
                // Monochrome scans read the green row, which trails the first row.
                origin_y += i64::from(300 * u32::from(caps.sensor_distance) / caps.optic_dpi.y);
            }
        }
        let mut steps = (origin_y.max(0) as u64 * u64::from(hw.motor_dpi) / 300) as u16;
        if hw.motor_model == MotorModel::HuaLien && caps.optic_dpi.x == 600 {
            steps = (u32::from(steps) * 297 / 298) as u16;
        }
        regs.set_start_position(steps);
        trace!(start, end, steps, "scan window");
    }

    /// Initial step sizes (0x46 to 0x49), from the maximum motor speed.
    fn preset_step_size(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &Plan) {
        let hw = &self.profile.hw;
        let size = (CRYSTAL_FREQ
            / (param.mclk
                * 8.0
                * f64::from(plan.channel_mode)
                * hw.max_motor_speed
                * 4.0
                * f64::from(hw.motor_dpi))) as u16;
        regs.set_step_size(size);
        regs.set_fast_feed_step(size);
    }

    /// Steps to reverse, acceleration and lines to process for feeder scans.
    fn adf_registers(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let hw = &self.profile.hw;
        let scan = param.phase == Phase::Scan;
        if self.profile.caps.flags.contains(DeviceFlags::ADF) {
            if !scan {
                regs[address::STEPS_TO_REVERSE] = 0;
            } else if param.source == ScanSource::Adf {
                regs[address::STEPS_TO_REVERSE] = 0;
                regs[address::ACCELERATION_PROFILE] = 0x40;
                let lines = if param.phy_dpi.x <= 300 { 4 } else { 5 };
                regs[address::LINES_TO_PROCESS] = (regs[address::LINES_TO_PROCESS] & !7) | lines;
            } else {
                regs[address::STEPS_TO_REVERSE] = hw.steps_to_reverse;
                regs[address::ACCELERATION_PROFILE] = hw.reg_51;
                regs[address::LINES_TO_PROCESS] &= !7;
            }
        } else {
            regs[address::STEPS_TO_REVERSE] = if scan { hw.steps_to_reverse } else { 0 };
        }
        regs[address::INTEGRATION_ADJUST] = 0;
        plan.ita = 0;
    }

    /// Line length in pixel periods, from the sensor configuration registers.
    ///
    /// Motors with a line-end threshold also get their line end (0x20, 0x21) rewritten.
    pub fn line_length(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let preview = i64::from(regs[address::PREVIEW]);
        let turbo_speed = (preview & 0x0c) >> 2;
        let turbo_select = preview & 3;
        let reg_0e = i64::from(regs[address::SENSOR_CONTROL_0E]);
        let guard_band = (reg_0e & 0xf0) >> 4;
        let duration = reg_0e & 0x0f;
        let pulses = i64::from(regs[address::SENSOR_CONTROL_0D]) / 128;
        let afe_op = regs[address::COLOR_MODE] & 7;
        let adjust = i64::from(regs[address::INTEGRATION_ADJUST] & 0x7f);
        let ct_mode = (regs[address::SENSOR_CONFIGURATION] >> 3) & 3;

        let rate: i64 = if afe_op == 1 || afe_op == 5 { 3 } else { 1 };
        let tp = match turbo_select {
            0 => 1,
            _ if turbo_speed + 2 == 5 => 6,
            _ => turbo_speed + 2,
        };
        let b = match ct_mode {
            0 => {
                (pulses + 1) * (2 * guard_band + duration + 1)
                    + (1 - pulses) * i64::from(adjust != 0)
            }
            2 => 3,
            _ => 1,
        };

        let mut line_end = i64::from(self.profile.hw.line_end);
        if self.motor.dpi_thresh != 0 {
            if param.phy_dpi.y <= u32::from(self.motor.dpi_thresh) {
                line_end = i64::from(self.motor.line_end);
            }
            regs.set_line_end(line_end as u16);
        }

        let mut tr = rate * (line_end + tp * (b + 3 - pulses));
        if adjust == 0 {
            if ct_mode == 0 {
                tr += rate;
            }
        } else {
            let (fast_pixels, extra) = if afe_op != 0 {
                let phi = (adjust + 1) / 2 + 1 + 6;
                let clocks = (phi + 8 * line_end + 8 * b + 4) / (8 * adjust) + 1;
                (clocks, (8 * adjust * clocks - phi) % 8)
            } else {
                let phi = (adjust + 1) / 2 + 1 + 10 + 12;
                let clocks = (phi + 24 * line_end + 24 * b + 12) / (24 * adjust) + 1;
                (clocks, (24 * adjust * clocks - phi) % 24)
            };
            tr = b + line_end + 4 + fast_pixels;
            if extra == 0 {
                tr += 1;
            }
            tr *= rate;
        }
        plan.line_rate_color = rate as u8;
        plan.line_length = (tr / rate) as u16;
        trace!(line_length = plan.line_length, rate, "line length");
    }

    /// Scan step size (0x46, 0x47).
    pub fn step_size(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let phy_y = u64::from(param.phy_dpi.y);
        let period = u64::from(plan.line_length) * u64::from(plan.line_rate_color);
        let motor_dpi = u64::from(self.profile.hw.motor_dpi).max(1);
        let ita = u64::from(plan.ita);
        let step = if ita != 0 {
            phy_y * period * (ita + 1) / (4 * motor_dpi * ita)
        } else {
            phy_y * period / (4 * motor_dpi)
        } as u16;
        let step = step.max(2);
        let step = (u32::from(step) * 298 / 297) as u16;
        regs.set_step_size(step);
        plan.step_size = step;
    }

    /// Data pixel delay (0x51 to 0x53), the phase between the motor steps and the line start.
    pub fn data_pixel_delay(&self, regs: &mut RegisterSet, plan: &Plan) {
        let accel = regs[address::ACCELERATION_PROFILE];
        let mut quarter = u32::from((accel & 0x30) >> 4);
        let mut half = u32::from((accel & 0xc0) >> 6);
        let reverse = if self.profile.hw.chip == Chip::Lm9831 {
            u32::from(regs[address::STEPS_TO_REVERSE] & 0x3f)
        } else {
            if quarter == 3 {
                quarter = 8;
            }
            if half == 3 {
                half = 8;
            }
            u32::from(regs[address::STEPS_TO_REVERSE])
        };
        let step = u32::from(regs.step_size());
        let period = u32::from(plan.line_length) * u32::from(plan.line_rate_color);
        let dpd = if period == 0 {
            0
        } else {
            period - ((quarter * 4 + half * 2 + reverse) * 4 * step) % period
        };
        regs[address::ACCELERATION_PROFILE] |= ((dpd >> 16) & 0x03) as u8;
        regs.set_word(address::DATA_PIXEL_DELAY, dpd as u16);
    }

    /// The master clock divider derived from the bus throughput, in halves.
    ///
    /// It is bounded below by the minimum integration time and above by 32.5.
    pub fn master_clock_divider(&self, regs: &RegisterSet, plan: &Plan) -> u32 {
        let hw = &self.profile.hw;
        let rate = if regs[address::COLOR_MODE] & 7 == 0 {
            24.0
        } else {
            8.0
        };
        let resolution = regs[address::HORIZONTAL_RESOLUTION];
        let min_integration = if resolution & 7 > 2 {
            hw.min_integration_time_lowres
        } else {
            hw.min_integration_time_highres
        };
        let line_length = f64::from(plan.line_length);
        let scaling = f64::from(MCLK_SCALING);
        let min = ((scaling * CRYSTAL_FREQ * min_integration / (1000.0 * rate * line_length)).ceil()
            as u32)
            .max(MCLK_SCALING);

        let pixel_bits = match resolution & 0x38 {
            0x00 => 1.0,
            0x08 => 2.0,
            0x10 => 4.0,
            0x18 => 8.0,
            _ => 16.0,
        };
        let code = resolution & 7;
        let hdpi = (f64::from(code & 1) * 0.5 + 1.0)
            * if code & 2 != 0 { 2.0 } else { 1.0 }
            * if code & 4 != 0 { 4.0 } else { 1.0 };
        let window = i64::from(regs.data_pixels_end()) - i64::from(regs.data_pixels_start());
        let pixels_per_line = ((window as f64) * pixel_bits / (hdpi * 8.0)) as i64;
        let mut divider = (scaling * pixels_per_line.max(0) as f64 * CRYSTAL_FREQ
            / (8.0 * line_length * f64::from(self.transfer_rate)))
        .ceil() as u32;
        divider = divider.max(min).min(MAX_SCALED_MCLK);
        if self.transfer_rate == FAST_TRANSFER_RATE {
            while f64::from(divider) * hdpi < 6.0 * scaling {
                divider += 1;
            }
        }
        trace!(min, divider, pixels_per_line, "bus-derived master clock");
        divider
    }

    /// Master clock (0x08), integration time adjust (0x19) and the green PWM duty (0x2a, 0x2b).
    fn mclk_divider(&self, regs: &mut RegisterSet, param: &mut ScanParam, plan: &mut Plan) {
        let caps = &self.profile.caps;
        let hw = &self.profile.hw;
        if self.transfer_rate == FAST_TRANSFER_RATE {
            param.mclk = f64::from(self.master_clock_divider(regs, plan)) / f64::from(MCLK_SCALING);
        }
        let mclk = param.mclk;
        let product = plan.hdpi_divider * mclk;
        let mut ita: u32 = if product >= MIN_INTEGRATION_PRODUCT {
            0
        } else {
            ((MIN_INTEGRATION_PRODUCT / product).ceil() as u32).min(0xff)
        };

        let channel_mode = f64::from(plan.channel_mode);
        let line_length = f64::from(plan.line_length);
        if param.phase == Phase::Scan && param.bit_depth > 8 {
            let per_adjust = mclk * channel_mode * line_length / 6.0 * 9.0 / 10.0;
            if per_adjust > 0.0 {
                while f64::from(param.size.phy_bytes) > per_adjust * f64::from(1 + ita) {
                    ita += 1;
                }
            }
            let max_ita = u32::from(self.max_ita);
            if hw.motor_model == MotorModel::HuaLien
                && caps.ccd == CcdId::Nec3799
                && ita > max_ita
            {
                ita = max_ita;
            }
            if hw.motor_model == MotorModel::Hp && caps.ccd == CcdId::NecSlim {
                let max_ita = ((mclk + 1.0) / 2.0).floor() as u32;
                if ita > max_ita {
                    debug!(ita, max_ita, "integration time adjust limited");
                    ita = max_ita;
                }
            }
        }
        let ita = ita.min(0xff) as u8;

        regs[address::MCLK_DIVIDER] = ((mclk - 1.0) * 2.0) as u8;
        regs[address::INTEGRATION_ADJUST] = ita;
        plan.ita = ita;
        plan.mclk = mclk;

        if ita != 0 {
            let ita = u32::from(ita);
            let step = ((u32::from(plan.step_size) * (ita + 1) / ita) as u16).max(2);
            plan.step_size = step;
            regs.set_step_size(step);
            self.data_pixel_delay(regs, plan);
        }

        let max_mclk = CRYSTAL_FREQ * hw.integration_time_high_lamp
            / (1000.0 * 8.0 * channel_mode * line_length);
        regs.set_green_pwm_duty(if mclk > max_mclk {
            hw.green_pwm_duty_low
        } else {
            hw.green_pwm_duty_high
        });
    }

    /// Motor PWM (0x56, 0x57) and lines per step (0x43, 0x44).
    fn motor_param(&self, regs: &mut RegisterSet, param: &ScanParam) {
        let model = self.profile.hw.motor_model;
        let phy_x = param.phy_dpi.x;
        let (pwm, duty) = if !model.is_plustek() {
            let set = self.motor.motor_sets[tuning::dpi_bracket(param.phy_dpi.y)];
            regs[address::LINES_PER_STEP] = 0;
            regs[address::LINES_PER_STEP + 1] = 0;
            if set.lines_per_step > 1 && param.bit_depth > 8 && param.data_type == DataType::Color {
                regs[address::LINES_PER_STEP] = 0xff;
                regs[address::LINES_PER_STEP + 1] = set.lines_per_step;
            }
            (set.pwm, set.pwm_duty)
        } else if self.profile.caps.optic_dpi.x == 1200 {
            match phy_x {
                0..=200 => (1, 48),
                201..=300 => (2, 48),
                301..=400 => (8, 48),
                401..=600 => (2, 48),
                _ => (1, 48),
            }
        } else {
            match model {
                MotorModel::Tokyo600 => (16, 4),
                MotorModel::HuaLien => (64, 4),
                _ => match phy_x {
                    0..=200 => (24, 16),
                    201..=400 => (16, 16),
                    _ => (2, 48),
                },
            }
        };
        regs[address::PWM_FREQUENCY] = pwm;
        regs[address::PWM_DUTY] = duty;
    }

    /// Fast feed step size (0x48, 0x49).
    fn fast_feed_step(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let hw = &self.profile.hw;
        let move_speed = if param.phase == Phase::Scan && param.source == ScanSource::Adf {
            1.0
        } else {
            hw.max_move_speed
        };
        let mclk = plan.mclk.max(1.0);
        let pulse_rate =
            mclk * 8.0 * f64::from(plan.channel_mode) * move_speed * 4.0 * f64::from(hw.motor_dpi);
        let mut step = (CRYSTAL_FREQ / pulse_rate) as u16;
        if hw.is_cis() && plan.channel_mode == 1 {
            step /= 3;
        }
        if plan.ita != 0 {
            step /= u16::from(plan.ita);
        }
        let preview = regs[address::PREVIEW];
        if preview != 0 {
            step = step.wrapping_mul(u16::from(preview >> 2) + 2);
        }
        regs.set_fast_feed_step(step);
        plan.fast_feed_step = step;
    }

    /// Physical lines and total bytes, including the lead-in that lines up CCD color rows.
    pub fn scan_lines_and_size(&self, param: &mut ScanParam, plan: &mut Plan) {
        let caps = &self.profile.caps;
        let size = &mut param.size;
        size.phy_lines = if param.user_dpi.y == 0 {
            size.lines
        } else {
            let scaled = f64::from(size.lines) * f64::from(param.phy_dpi.y);
            (scaled / f64::from(param.user_dpi.y)).ceil() as u32
        };
        plan.line_distance = 0;
        if param.phase == Phase::Scan && param.channels == 3 {
            plan.line_distance =
                u32::from(caps.sensor_distance) * param.phy_dpi.y / caps.optic_dpi.x;
            size.phy_lines += plan.line_distance * 2;
        }
        size.total_bytes = size.phy_bytes * size.phy_lines;
    }

    /// DRAM pause (0x4e) and resume (0x4f) limits.
    fn pause_limit(&self, regs: &mut RegisterSet, param: &ScanParam, plan: &mut Plan) {
        let hw = &self.profile.hw;
        let scaler: i64 = if hw.is_cis() && param.data_type == DataType::Color {
            3
        } else {
            1
        };
        // Coefficient RAM for gamma, shading and offset, less gamma in 16-bit mode.
        let coefficients: i64 = if regs[address::HORIZONTAL_RESOLUTION] & 0x20 != 0 {
            32
        } else {
            36
        } * 6;
        let dram = i64::from(hw.dram_size);
        let line = i64::from(param.size.phy_bytes) * scaler;
        let mut limit = dram - coefficients - (line / 1024 + 1);
        if regs[address::STEPS_TO_REVERSE] == 0 {
            limit -= (i64::from(regs[address::LINES_TO_PROCESS] & 7) * line + 1023) / 1024;
        }
        let total = div_ceil(u64::from(param.size.total_bytes), 1024) as i64;
        let limit = limit.min(total).max(2);

        let mut pause = ((limit as f64 * 512.0) / (2.0 * dram as f64)).floor() as u8;
        if pause > 1 {
            pause -= 1;
            if pause > 1 {
                pause -= 1;
            }
        } else {
            pause = 1;
        }
        regs[address::PAUSE_LIMIT] = pause;
        regs[address::RESUME_LIMIT] = 1;
        plan.pause_limit = limit as u32;
        trace!(limit, pause, "pause limit");
    }
}

fn tokyo600_origin_shift(phy_x: u32, data_type: DataType) -> i64 {
    let color = data_type == DataType::Color;
    match phy_x {
        0..=75 => 20,
        76..=100 if !color => -6,
        151..=200 => {
            if color {
                -10
            } else {
                -4
            }
        }
        201..=300 => {
            if color {
                16
            } else {
                -18
            }
        }
        301..=400 => match data_type {
            DataType::Color => 15,
            DataType::BlackWhite => 4,
            DataType::Gray => 0,
        },
        _ if phy_x > 400 && data_type == DataType::Gray => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;

    use super::*;
    use crate::device::DeviceProfile;

    fn color_request(dpi: u32) -> ImageRequest {
        ImageRequest {
            area: Area {
                x: 0,
                y: 0,
                cx: 2550,
                cy: 300,
            },
            dpi: Xy::new(dpi, dpi),
            image_type: ImageType::Color24,
            source: ScanSource::Reflection,
            flags: ScanFlags::QUALITY,
        }
    }

    fn planned(profile: &DeviceProfile, request: &ImageRequest) -> (RegisterSet, ScanSetup, Plan) {
        let mut setup = ScanParam::from_request(profile, request, &Adjustments::default());
        let mut regs = RegisterSet::from_hardware(&profile.hw);
        let plan = Planner::new(profile).plan(&mut regs, &mut setup.param);
        (regs, setup, plan)
    }

    #[test]
    fn divider_never_below_request() {
        for optic in [600u32, 1200, 2400] {
            for user in 1..=optic {
                let (phy, divider) = horizontal_divider(optic, user);
                assert!(phy >= user, "{} dpi gave {} on a {} dpi sensor", user, phy, optic);
                assert!(phy <= optic);
                let expected = f64::from(optic) / divider.factor();
                assert!(approx_eq!(f64, expected, f64::from(phy), epsilon = 1.0));
            }
        }
    }

    #[test]
    fn divider_codes() {
        assert_eq!(horizontal_divider(600, 300), (300, HorizontalDivider::Two));
        assert_eq!(horizontal_divider(600, 400), (400, HorizontalDivider::OneAndHalf));
        assert_eq!(horizontal_divider(1200, 50), (100, HorizontalDivider::Twelve));
        assert_eq!(u8::from(HorizontalDivider::Six), 5);
        assert_eq!(HorizontalDivider::try_from(7u8).unwrap(), HorizontalDivider::Twelve);
    }

    #[test]
    fn ladder() {
        assert_eq!(ladder_resolution(600, 1), 50);
        assert_eq!(ladder_resolution(600, 7), 400);
        assert_eq!(ladder_resolution(600, 8), 600);
        assert_eq!(ladder_resolution(600, 0), 0);
        assert_eq!(ladder_resolution(600, 9), 0);
    }

    #[test]
    fn vertical_is_multiple_of_step() {
        let profile = DeviceProfile::plustek_ut12();
        // 600 dpi optic with four lines between colors steps in 150 dpi.
        for user in [1u32, 75, 150, 151, 299, 600, 1199, 5000] {
            let dpi = vertical_dpi(&profile, user, DataType::Color, 8);
            assert_eq!(dpi % 150, 0);
            assert!(dpi <= 1200);
        }
        assert_eq!(vertical_dpi(&profile, 151, DataType::Color, 8), 300);
    }

    #[test]
    fn vertical_floor_for_1200_dpi_plustek() {
        let mut profile = DeviceProfile::epson_1250();
        assert_eq!(vertical_dpi(&profile, 150, DataType::Gray, 8), 150);
        profile.hw.motor_model = MotorModel::KaoHsiung;
        assert_eq!(vertical_dpi(&profile, 150, DataType::Gray, 8), 200);
        assert_eq!(vertical_dpi(&profile, 150, DataType::Color, 8), 150);
        profile.hw.motor_model = MotorModel::Tokyo600;
        assert_eq!(vertical_dpi(&profile, 150, DataType::Gray, 8), 150);
    }

    #[test]
    fn ccd_color_line_distance() {
        let profile = DeviceProfile::plustek_ut12();
        let (regs, setup, plan) = planned(&profile, &color_request(300));
        let param = setup.param;
        assert_eq!(param.phy_dpi, Xy::new(300, 300));
        assert_eq!(regs[address::HORIZONTAL_RESOLUTION] & 7, 2);
        assert_eq!(regs[address::HORIZONTAL_RESOLUTION] & 0x38, 0x18);
        assert_eq!(plan.line_distance, 2);
        assert_eq!(plan.lines_discard, 4);
        assert_eq!(param.size.phy_lines, 300 + 4);
        assert_eq!(param.size.phy_bytes, param.size.phy_pixels * 3 + 2);
        assert_eq!(param.size.total_bytes, param.size.phy_bytes * param.size.phy_lines);
        assert_eq!(plan.lines_to_skip, 6);
    }

    #[test]
    fn window_start_is_even() {
        let profile = DeviceProfile::plustek_ut12();
        for x in 0..20 {
            let mut request = color_request(150);
            request.area.x = x;
            let (regs, _, _) = planned(&profile, &request);
            assert_eq!(regs.data_pixels_start() % 2, 0);
            assert!(regs.data_pixels_end() > regs.data_pixels_start());
        }
    }

    #[test]
    fn step_size_minimum() {
        for profile in [
            DeviceProfile::plustek_ut12(),
            DeviceProfile::epson_1250(),
            DeviceProfile::canon_d660u(),
            DeviceProfile::canon_lide25(),
        ] {
            for dpi in [50, 75, 150, 300, 600, 1200] {
                let (regs, _, plan) = planned(&profile, &color_request(dpi));
                assert!(plan.step_size >= 2);
                assert_eq!(regs.step_size(), plan.step_size);
            }
        }
    }

    #[test]
    fn mclk_from_table() {
        let profile = DeviceProfile::epson_1250();
        let (regs, setup, plan) = planned(&profile, &color_request(300));
        assert!(approx_eq!(f64, setup.param.mclk, 2.5));
        assert!(approx_eq!(f64, plan.mclk, 2.5));
        assert_eq!(regs[address::MCLK_DIVIDER], 3);
        assert_eq!(regs[address::PWM_FREQUENCY], 2);
        assert_eq!(regs[address::PWM_DUTY], 1);
    }

    #[test]
    fn fast_bus_mclk() {
        let profile = DeviceProfile::plustek_ut12();
        let mut setup =
            ScanParam::from_request(&profile, &color_request(600), &Adjustments::default());
        let mut regs = RegisterSet::from_hardware(&profile.hw);
        let mut planner = Planner::new(&profile);
        planner.set_transfer_rate(FAST_TRANSFER_RATE);
        let plan = planner.plan(&mut regs, &mut setup.param);
        assert!(plan.mclk >= 1.0);
        assert!(plan.mclk <= 32.5);
        // At the full optical resolution the divider has to reach 6.
        assert!(plan.mclk >= 6.0);
    }

    #[test]
    fn pause_limit_bounds() {
        let profile = DeviceProfile::canon_lide25();
        let (regs, _, plan) = planned(&profile, &color_request(1200));
        assert!(regs[address::PAUSE_LIMIT] >= 1);
        assert_eq!(regs[address::RESUME_LIMIT], 1);
        assert!(plan.pause_limit >= 2);
    }

    #[test]
    fn gray_from_color_substitution() {
        let profile = DeviceProfile::canon_d660u();
        let mut request = color_request(300);
        request.image_type = ImageType::Gray8;
        let setup = ScanParam::from_request(&profile, &request, &Adjustments::default());
        assert_eq!(setup.param.data_type, DataType::Color);
        assert_eq!(setup.from_color, Some(FromColor { channel: 1, binary: false }));
        assert_eq!(setup.bytes_per_line, setup.param.size.bytes / 3);

        request.image_type = ImageType::BlackWhite;
        request.flags.insert(ScanFlags::DWORD_BOUNDARY);
        let setup = ScanParam::from_request(&profile, &request, &Adjustments::default());
        assert_eq!(setup.from_color, Some(FromColor { channel: 1, binary: true }));
        assert_eq!(setup.param.size.pixels % 8, 0);
        assert_eq!(setup.bytes_per_line % 4, 0);

        request.flags.insert(ScanFlags::CALIBRATION);
        let setup = ScanParam::from_request(&profile, &request, &Adjustments::default());
        assert_eq!(setup.from_color, None);
        assert_eq!(setup.param.data_type, DataType::BlackWhite);
    }

    #[test]
    fn lm9831_uses_pseudo_16_bit() {
        let mut profile = DeviceProfile::plustek_ut12();
        profile.hw.chip = Chip::Lm9831;
        let mut request = color_request(300);
        request.image_type = ImageType::Color48;
        request.flags.insert(ScanFlags::RIGHT_ALIGN);
        let setup = ScanParam::from_request(&profile, &request, &Adjustments::default());
        assert_eq!(setup.param.bit_depth, 8);
        assert!(setup.flags.contains(ScanFlags::PSEUDO48));
        assert!(setup.flags.contains(ScanFlags::RIGHT_ALIGN));
        assert_eq!(setup.bytes_per_line, setup.param.size.bytes * 2);
    }

    #[test]
    fn origin_includes_source_and_adjustment() {
        let profile = DeviceProfile::plustek_ut12();
        let mut request = color_request(300);
        request.area.x = 100;
        request.area.y = 10;
        request.source = ScanSource::Transparency;
        let adjustments = Adjustments {
            transparency: crate::device::Offset { x: -5, y: 3 },
            ..Adjustments::default()
        };
        let setup = ScanParam::from_request(&profile, &request, &adjustments);
        assert_eq!(setup.param.origin, Xy::new(100 + 1055 - 5, 10 + 712 + 3));
    }

    #[test]
    fn tokyo600_shifts() {
        assert_eq!(tokyo600_origin_shift(75, DataType::Color), 20);
        assert_eq!(tokyo600_origin_shift(100, DataType::Gray), -6);
        assert_eq!(tokyo600_origin_shift(100, DataType::Color), 0);
        assert_eq!(tokyo600_origin_shift(300, DataType::Gray), -18);
        assert_eq!(tokyo600_origin_shift(400, DataType::BlackWhite), 4);
        assert_eq!(tokyo600_origin_shift(600, DataType::Gray), 4);
        assert_eq!(tokyo600_origin_shift(600, DataType::Color), 0);
    }

    #[test]
    fn image_sizes() {
        let area = Area {
            x: 0,
            y: 0,
            cx: 300,
            cy: 600,
        };
        let size = image_info(&area, Xy::new(100, 50), ImageType::Color48, None);
        assert_eq!(size.pixels, 100);
        assert_eq!(size.lines, 100);
        assert_eq!(size.bytes, 600);
        let size = image_info(&area, Xy::new(101, 50), ImageType::BlackWhite, None);
        assert_eq!(size.bytes, 13);
        assert_eq!(size.pixels, 104);
    }
}
