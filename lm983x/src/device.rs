// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Static descriptions of scanner models.
//!
//! A device is described by two halves: [`DeviceCaps`] covers what the *scanner* can do (scan
//! areas, optical resolution, sensor layout) while [`HwDef`] covers how the LM983x has to be
//! driven for it (timings, initial register contents, motor model).
use std::path::PathBuf;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::register::color_mode;

/// The crystal driving every LM983x, in Hz.
pub const CRYSTAL_FREQ: f64 = 48_000_000.0;

/// Which member of the LM983x family is on the board.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Chip {
    /// The original part. Its 16-bit mode is broken, and it leaves stale data in DRAM.
    Lm9831,
    Lm9832,
    Lm9833,
}

/// Sensor identifiers.
///
/// The sensor decides the software offset and gain tables used during fine calibration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CcdId {
    Nec3799 = 0,
    Sony518 = 1,
    Sony548 = 2,
    Nec8861 = 3,
    Nec3778 = 4,
    NecSlim = 5,
    Cis650 = 6,
    Cis670 = 7,
    Cis1220 = 8,
    Cis1240 = 9,
    Epson = 10,
}

/// Motor models, in the order of the motor tuning table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MotorModel {
    KaoHsiung = 0,
    HuaLien,
    Tokyo600,
    Epson,
    Mustek600,
    Mustek1200,
    Hp,
    Canon600,
    Canon1200,
    CanonCcd1200,
    CanonLide25,
    Umax,
    Umax1200,
    TravelScan,
    TravelScanA4,
    QuickScan,
    QuickScanA6,
}

impl MotorModel {
    /// Plustek's own 600 dpi motors, which have their own (older) tuning rules.
    pub fn is_plustek(self) -> bool {
        u8::from(self) <= u8::from(MotorModel::Tokyo600)
    }
}

/// The physical order of the color rows on the sensor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SensorOrder {
    Rgb = 0,
    Rbg,
    Gbr,
    Grb,
    Brg,
    Bgr,
}

impl SensorOrder {
    /// The channel index (0 = red, 1 = green, 2 = blue) found at each physical row.
    pub fn rows(self) -> [usize; 3] {
        match self {
            SensorOrder::Rgb => [0, 1, 2],
            SensorOrder::Rbg => [0, 2, 1],
            SensorOrder::Gbr => [1, 2, 0],
            SensorOrder::Grb => [1, 0, 2],
            SensorOrder::Brg => [2, 0, 1],
            SensorOrder::Bgr => [2, 1, 0],
        }
    }
}

/// Where the light for a scan comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanSource {
    Reflection,
    Transparency,
    Negative,
    Adf,
}

impl ScanSource {
    /// Film scans go through the transparency adapter.
    pub fn is_film(self) -> bool {
        matches!(self, ScanSource::Transparency | ScanSource::Negative)
    }
}

/// How the ASIC delivers pixels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum DataType {
    BlackWhite,
    Gray,
    Color,
}

/// What the caller asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageType {
    BlackWhite,
    Gray8,
    Gray16,
    Color24,
    Color48,
}

impl ImageType {
    pub fn data_type(self) -> DataType {
        match self {
            ImageType::BlackWhite => DataType::BlackWhite,
            ImageType::Gray8 | ImageType::Gray16 => DataType::Gray,
            ImageType::Color24 | ImageType::Color48 => DataType::Color,
        }
    }

    pub fn bit_depth(self) -> u8 {
        match self {
            ImageType::BlackWhite => 1,
            ImageType::Gray8 | ImageType::Color24 => 8,
            ImageType::Gray16 | ImageType::Color48 => 16,
        }
    }
}

flag_set! {
    /// Per-model workarounds for quirks of individual scanners.
    Workarounds: u32 {
        /// Pseudo-16 bit data needs no extra shift on this model.
        BSHIFT7_BUG = 0x0001;
        /// Lamps are switched through the misc I/O pins.
        MISC_IO_LAMPS = 0x0002;
        BLACKFINE = 0x0004;
        /// Skip calibration entirely and use fixed defaults.
        BYPASS_CALIBRATION = 0x0008;
        INV_NEGATIVE_MAP = 0x0010;
        /// No fine (shading) calibration.
        SKIP_FINE = 0x0020;
        /// Fine dark calibration only.
        SKIP_WHITEFINE = 0x0040;
        /// Scan color and threshold on the host for black and white.
        BIN_FROM_COLOR = 0x0080;
        /// Scan color and extract a channel on the host for gray.
        GRAY_FROM_COLOR = 0x0100;
        MISC_IO_BUTTONS = 0x0200;
        USE_ALT_DESC = 0x0400;
        /// Treat one-channel CIS color as RGB above the PCB resolution threshold.
        RESET_SO_TO_RGB = 0x0800;
        LOFF_ON_START = 0x1000;
        ONLY_8BIT = 0x2000;
        /// Let the CIS offset search also chase a nonzero dark level.
        INC_DARKTGT = 0x4000;
    }
}

flag_set! {
    /// Which light sources and feeders a device has.
    DeviceFlags: u16 {
        NORMAL = 0x0001;
        POSITIVE = 0x0002;
        NEGATIVE = 0x0004;
        TPA = 0x0006;
        ADF = 0x0008;
        LARGE_TPA = 0x0010;
        SHEET_FED = 0x0020;
    }
}

/// A pair of horizontal and vertical values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Xy {
    pub x: u32,
    pub y: u32,
}

impl Xy {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Geometry of one scan source.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceCaps {
    /// Top-left corner of the scannable area, in 1/300". `x` is counted from the first visible
    /// pixel, `y` from the top of the glass.
    pub data_origin: Xy,

    /// Distance of the white calibration strip from the top of the scanner body, in 1/300".
    pub shading_origin_y: i32,

    /// Position of the dark calibration strip, in 1/300". Negative when there is none, in which
    /// case dark references are taken with the lamp switched off.
    pub dark_shading_origin_y: i32,

    /// Size of the scannable area, in 1/300".
    pub size: Xy,

    pub min_dpi: Xy,
}

impl SourceCaps {
    pub fn has_dark_strip(&self) -> bool {
        self.dark_shading_origin_y >= 0
    }
}

/// What a scanner model can do.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCaps {
    pub normal: SourceCaps,
    pub positive: SourceCaps,
    pub negative: SourceCaps,
    pub adf: SourceCaps,

    /// The optical resolution of the sensor (x) and the motor (y).
    pub optic_dpi: Xy,

    pub flags: DeviceFlags,

    pub sensor_order: SensorOrder,

    /// Distance between the color rows of a CCD, in lines at optical resolution.
    pub sensor_distance: u8,

    pub ccd: CcdId,

    /// PCB revision, or for CIS devices a resolution threshold for the sensor order.
    pub pcb: u16,

    pub workarounds: Workarounds,

    /// Number of front panel buttons. Plustek's own devices with buttons use a different set of
    /// clock settings from the button-less ones.
    pub buttons: u8,
}

impl DeviceCaps {
    /// The geometry to use for a scan source.
    pub fn source(&self, source: ScanSource) -> &SourceCaps {
        match source {
            ScanSource::Reflection => &self.normal,
            ScanSource::Transparency => &self.positive,
            ScanSource::Negative => &self.negative,
            ScanSource::Adf => &self.adf,
        }
    }

    pub fn is_sheet_fed(&self) -> bool {
        self.flags.contains(DeviceFlags::SHEET_FED)
    }
}

/// Lamp on/off timings for the three CIS LEDs, in pixel periods.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LampTiming {
    pub red_on: u16,
    pub red_off: u16,
    pub green_on: u16,
    pub green_off: u16,
    pub blue_on: u16,
    pub blue_off: u16,
}

impl LampTiming {
    /// The register image of the six on/off pairs (0x2c to 0x37).
    pub fn to_registers(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        let values = [
            self.red_on,
            self.red_off,
            self.green_on,
            self.green_off,
            self.blue_on,
            self.blue_off,
        ];
        for (chunk, value) in out.chunks_exact_mut(2).zip(values) {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        out
    }

    pub fn on(&self, channel: usize) -> u16 {
        match channel {
            0 => self.red_on,
            1 => self.green_on,
            _ => self.blue_on,
        }
    }

    pub fn off(&self, channel: usize) -> u16 {
        match channel {
            0 => self.red_off,
            1 => self.green_off,
            _ => self.blue_off,
        }
    }

    pub fn set_off(&mut self, channel: usize, value: u16) {
        match channel {
            0 => self.red_off = value,
            1 => self.green_off = value,
            _ => self.blue_off = value,
        }
    }
}

/// Initial illumination settings for one color mode of a CIS device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Illumination {
    /// Value for the lamp mode register (0x29).
    pub mode: u8,
    pub lamp: LampTiming,
}

/// How to drive the LM983x for a scanner model.
#[derive(Clone, Debug, PartialEq)]
pub struct HwDef {
    /// Maximum scan speed, in inches per second.
    pub max_motor_speed: f64,

    /// Maximum carriage move speed, in inches per second.
    pub max_move_speed: f64,

    pub high_speed: f64,

    /// Integration time with the lamp at low power, in ms.
    pub integration_time_low_lamp: f64,

    /// Integration time with the lamp at full power, in ms.
    pub integration_time_high_lamp: f64,

    /// Full-step resolution of the motor.
    pub motor_dpi: u16,

    /// Size of the on-chip DRAM, in KiB.
    pub dram_size: u16,

    /// Minimum integration time in ms, for high divider codes (low resolutions).
    pub min_integration_time_lowres: f64,

    /// Minimum integration time in ms, for low divider codes (high resolutions).
    pub min_integration_time_highres: f64,

    pub green_pwm_duty_low: u16,
    pub green_pwm_duty_high: u16,

    /// Register 0x0b.
    pub sensor_configuration: u8,
    pub reg_0c: u8,
    pub reg_0d: u8,
    pub reg_0e: u8,

    /// Sensor timing registers 0x0f to 0x18 for gray and black and white.
    pub timing_mono: [u8; 10],

    /// Sensor timing registers 0x0f to 0x18 for color.
    pub timing_color: [u8; 10],

    /// Default color mode register. `ONE_CHANNEL_COLOR` marks a CIS device.
    pub reg_26: u8,
    pub reg_27: u8,

    /// Lamp mode register.
    pub reg_29: u8,

    pub illumination_mono: Illumination,
    pub illumination_color: Illumination,

    pub stepper_phase_correction: u16,
    pub optic_black_start: u8,
    pub optic_black_end: u8,
    pub active_pixels_start: u16,
    pub line_end: u16,

    pub lamp: LampTiming,

    pub reg_45: u8,
    pub steps_after_paper_sensor2: u16,

    /// Steps to reverse when the DRAM buffer is full (0x50).
    pub steps_to_reverse: u8,

    /// Acceleration profile (0x51).
    pub reg_51: u8,

    /// Registers 0x54 to 0x5e: lines to process, kickstart, PWM, paper sense, misc I/O and test.
    pub misc: [u8; 11],

    pub chip: Chip,
    pub motor_model: MotorModel,
}

impl HwDef {
    /// CIS devices deliver all three colors on one channel.
    pub fn is_cis(&self) -> bool {
        self.reg_26 & color_mode::ONE_CHANNEL_COLOR != 0
    }

    pub fn reg_54(&self) -> u8 {
        self.misc[0]
    }

    pub fn reg_58(&self) -> u8 {
        self.misc[4]
    }
}

/// A signed shift of the scan area, in 1/300".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Offset {
    pub x: i32,
    pub y: i32,
}

/// Caller-supplied tuning on top of a [`DeviceProfile`].
#[derive(Clone, Debug, PartialEq)]
pub struct Adjustments {
    /// Save calibration results, and reuse them for later scans.
    pub cache_calibration: bool,

    /// Base path of the calibration cache files. `-coarse.cal` and `-fine.cal` are appended.
    pub cache_path: Option<PathBuf>,

    /// Lamp warmup in seconds. Negative values select the automatic warmup.
    pub warmup: i32,

    /// Fixed AFE gains (0 to 63) instead of the coarse gain search.
    pub gain: Option<[u8; 3]>,

    /// Fixed AFE offsets instead of the coarse offset search.
    pub offset: Option<[u8; 3]>,

    /// CIS lamp off times, in pixel periods.
    pub lamp_off: Option<[u16; 3]>,

    pub normal: Offset,
    pub transparency: Offset,
    pub negative: Offset,

    pub skip_calibration: bool,
    pub skip_fine: bool,
    pub skip_fine_white: bool,
    pub skip_dark_strip: bool,
    pub inc_dark_target: bool,
    pub invert_negatives: bool,

    /// Calibrate every resolution the sensor supports and fill the cache, instead of scanning.
    pub calibration_mode: bool,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            cache_calibration: false,
            cache_path: None,
            warmup: -1,
            gain: None,
            offset: None,
            lamp_off: None,
            normal: Offset::default(),
            transparency: Offset::default(),
            negative: Offset::default(),
            skip_calibration: false,
            skip_fine: false,
            skip_fine_white: false,
            skip_dark_strip: false,
            inc_dark_target: false,
            invert_negatives: false,
            calibration_mode: false,
        }
    }
}

impl Adjustments {
    /// The area offset for a scan source. ADF scans share the flatbed offset.
    pub fn origin_offset(&self, source: ScanSource) -> Offset {
        match source {
            ScanSource::Reflection | ScanSource::Adf => self.normal,
            ScanSource::Transparency => self.transparency,
            ScanSource::Negative => self.negative,
        }
    }
}

/// A complete model description.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub caps: DeviceCaps,
    pub hw: HwDef,
}

impl DeviceProfile {
    pub fn is_cis(&self) -> bool {
        self.hw.is_cis()
    }

    /// Fold the switches in `adj` into the workarounds and geometry of this profile.
    pub fn apply(&mut self, adj: &Adjustments) {
        let flags = &mut self.caps.workarounds;
        if adj.skip_calibration {
            flags.insert(Workarounds::BYPASS_CALIBRATION);
        }
        if adj.skip_fine {
            flags.insert(Workarounds::SKIP_FINE);
        }
        if adj.skip_fine_white {
            flags.insert(Workarounds::SKIP_WHITEFINE);
        }
        if adj.inc_dark_target {
            flags.insert(Workarounds::INC_DARKTGT);
        }
        if adj.invert_negatives {
            flags.insert(Workarounds::INV_NEGATIVE_MAP);
        }
        if adj.skip_dark_strip {
            self.caps.normal.dark_shading_origin_y = -1;
        }
        self.apply_lamp_off(adj);
    }

    /// Load the lamp mode and timings a CIS device uses for color or for monochrome scans.
    ///
    /// Lamp off overrides in `adj` are applied on top.
    pub fn select_illumination(&mut self, data_type: DataType, adj: &Adjustments) {
        if !self.is_cis() {
            return;
        }
        let illumination = if data_type == DataType::Color {
            self.hw.illumination_color
        } else {
            self.hw.illumination_mono
        };
        self.hw.reg_29 = illumination.mode;
        self.hw.lamp = illumination.lamp;
        self.apply_lamp_off(adj);
    }

    fn apply_lamp_off(&mut self, adj: &Adjustments) {
        if let Some(lamp_off) = adj.lamp_off {
            if self.is_cis() {
                for (channel, off) in lamp_off.iter().enumerate() {
                    if *off > 0 {
                        self.hw.lamp.set_off(channel, (*off).min(0x3fff));
                    }
                }
            }
        }
    }

    /// Plustek OpticPro UT12, a 600 dpi CCD on Plustek's own motor.
    pub fn plustek_ut12() -> Self {
        Self {
            name: "Plustek OpticPro UT12",
            caps: DeviceCaps {
                normal: SourceCaps {
                    data_origin: Xy::new(0, 93),
                    shading_origin_y: 0,
                    dark_shading_origin_y: -1,
                    size: Xy::new(2550, 3508),
                    min_dpi: Xy::new(50, 50),
                },
                positive: SourceCaps {
                    data_origin: Xy::new(1040 + 15, 744 - 32),
                    shading_origin_y: 543,
                    dark_shading_origin_y: -1,
                    size: Xy::new(473, 414),
                    min_dpi: Xy::new(150, 150),
                },
                negative: SourceCaps {
                    data_origin: Xy::new(1004 + 55, 744 + 12),
                    shading_origin_y: 537,
                    dark_shading_origin_y: -1,
                    size: Xy::new(567, 414),
                    min_dpi: Xy::new(150, 150),
                },
                adf: SourceCaps {
                    data_origin: Xy::new(0, 95),
                    shading_origin_y: 0,
                    dark_shading_origin_y: -1,
                    size: Xy::new(2550, 3508),
                    min_dpi: Xy::new(50, 50),
                },
                optic_dpi: Xy::new(600, 600),
                flags: DeviceFlags::POSITIVE | DeviceFlags::NEGATIVE,
                sensor_order: SensorOrder::Rgb,
                sensor_distance: 4,
                ccd: CcdId::Nec3799,
                pcb: 0x07,
                workarounds: Workarounds::NONE,
                buttons: 4,
            },
            hw: HwDef {
                max_motor_speed: 1.5,
                max_move_speed: 1.2,
                high_speed: 0.0,
                integration_time_low_lamp: 9.0,
                integration_time_high_lamp: 9.0,
                motor_dpi: 300,
                dram_size: 512,
                min_integration_time_lowres: 4.0,
                min_integration_time_highres: 5.0,
                green_pwm_duty_low: 3000,
                green_pwm_duty_high: 4095,
                sensor_configuration: 0x02,
                reg_0c: 0x04,
                reg_0d: 0x37,
                reg_0e: 0x13,
                timing_mono: [2, 7, 0, 1, 0, 0, 0, 0, 4, 0],
                timing_color: [5, 23, 1, 3, 0, 0, 0, 12, 10, 22],
                reg_26: color_mode::GREEN,
                reg_27: 0,
                reg_29: 1,
                illumination_mono: Illumination::default(),
                illumination_color: Illumination::default(),
                stepper_phase_correction: 1,
                optic_black_start: 14,
                optic_black_end: 62,
                active_pixels_start: 110,
                line_end: 5400,
                lamp: LampTiming {
                    red_on: 0,
                    red_off: 16383,
                    green_on: 0,
                    green_off: 0,
                    blue_on: 0,
                    blue_off: 16383,
                },
                reg_45: 3,
                steps_after_paper_sensor2: 0,
                steps_to_reverse: 0x1e,
                reg_51: 0xa8,
                misc: [0, 0xff, 64, 20, 0x0d, 0x22, 0x82, 0x88, 0, 0, 0],
                chip: Chip::Lm9832,
                motor_model: MotorModel::KaoHsiung,
            },
        }
    }

    /// Epson Perfection 1250, a 1200 dpi CCD.
    pub fn epson_1250() -> Self {
        Self {
            name: "Epson Perfection 1250",
            caps: DeviceCaps {
                normal: SourceCaps {
                    data_origin: Xy::new(25, 85),
                    shading_origin_y: 10,
                    dark_shading_origin_y: -1,
                    size: Xy::new(2550, 3508),
                    min_dpi: Xy::new(100, 100),
                },
                positive: SourceCaps {
                    data_origin: Xy::new(1100, 972),
                    shading_origin_y: 720,
                    dark_shading_origin_y: -1,
                    size: Xy::new(473, 414),
                    min_dpi: Xy::new(150, 150),
                },
                negative: SourceCaps {
                    data_origin: Xy::new(1116, 1049),
                    shading_origin_y: 720,
                    dark_shading_origin_y: -1,
                    size: Xy::new(567, 414),
                    min_dpi: Xy::new(150, 150),
                },
                adf: SourceCaps {
                    dark_shading_origin_y: -1,
                    ..SourceCaps::default()
                },
                optic_dpi: Xy::new(1200, 1200),
                flags: DeviceFlags::NONE,
                sensor_order: SensorOrder::Rgb,
                sensor_distance: 8,
                ccd: CcdId::Epson,
                pcb: 0,
                workarounds: Workarounds::MISC_IO_LAMPS,
                buttons: 0,
            },
            hw: HwDef {
                max_motor_speed: 0.8,
                max_move_speed: 0.8,
                high_speed: 4.1,
                integration_time_low_lamp: 12.0,
                integration_time_high_lamp: 12.0,
                motor_dpi: 600,
                dram_size: 512,
                min_integration_time_lowres: 4.0,
                min_integration_time_highres: 5.0,
                green_pwm_duty_low: 1,
                green_pwm_duty_high: 1,
                sensor_configuration: 0x02,
                reg_0c: 0x04,
                reg_0d: 0x7d,
                reg_0e: 0x37,
                timing_mono: [0x02, 0x07, 0x00, 0x01, 0x04, 0x07, 0x00, 0x00, 0x03, 0x07],
                timing_color: [0x06, 0x16, 0x00, 0x05, 0x0c, 0x17, 0x00, 0x00, 0x0a, 0x17],
                reg_26: color_mode::GREEN,
                reg_27: 0x40,
                reg_29: 3,
                illumination_mono: Illumination::default(),
                illumination_color: Illumination::default(),
                stepper_phase_correction: 1,
                optic_black_start: 0x00,
                optic_black_end: 0x42,
                active_pixels_start: 69,
                line_end: 10758,
                lamp: LampTiming {
                    red_on: 16383,
                    red_off: 0,
                    green_on: 16383,
                    green_off: 0,
                    blue_on: 16383,
                    blue_off: 0,
                },
                reg_45: 3,
                steps_after_paper_sensor2: 0,
                steps_to_reverse: 0x1e,
                reg_51: 0x0c,
                misc: [0, 0x0f, 0x02, 1, 0x0d, 0x41, 0x44, 0x14, 0, 0, 0],
                chip: Chip::Lm9832,
                motor_model: MotorModel::Epson,
            },
        }
    }

    /// Canon CanoScan D660U, a 600 dpi CCD that builds gray and black and white from color.
    pub fn canon_d660u() -> Self {
        Self {
            name: "CanoScan D660U",
            caps: DeviceCaps {
                normal: SourceCaps {
                    data_origin: Xy::new(45, 125),
                    shading_origin_y: 15,
                    dark_shading_origin_y: -1,
                    size: Xy::new(2550, 3508),
                    min_dpi: Xy::new(50, 50),
                },
                positive: SourceCaps {
                    data_origin: Xy::new(1060, 744),
                    shading_origin_y: 510,
                    dark_shading_origin_y: -1,
                    size: Xy::new(473, 414),
                    min_dpi: Xy::new(150, 150),
                },
                negative: SourceCaps {
                    data_origin: Xy::new(1082, 842),
                    shading_origin_y: 610,
                    dark_shading_origin_y: -1,
                    size: Xy::new(567, 414),
                    min_dpi: Xy::new(150, 150),
                },
                adf: SourceCaps::default(),
                optic_dpi: Xy::new(600, 600),
                flags: DeviceFlags::POSITIVE | DeviceFlags::NEGATIVE,
                sensor_order: SensorOrder::Rgb,
                sensor_distance: 4,
                ccd: CcdId::Nec8861,
                pcb: 0,
                workarounds: Workarounds::MISC_IO_LAMPS
                    | Workarounds::BIN_FROM_COLOR
                    | Workarounds::GRAY_FROM_COLOR,
                buttons: 0,
            },
            hw: HwDef {
                max_motor_speed: 1.2,
                max_move_speed: 1.1,
                high_speed: 2.75,
                integration_time_low_lamp: 9.0,
                integration_time_high_lamp: 9.0,
                motor_dpi: 300,
                dram_size: 512,
                min_integration_time_lowres: 8.0,
                min_integration_time_highres: 8.0,
                green_pwm_duty_low: 4095,
                green_pwm_duty_high: 4095,
                sensor_configuration: 0x02,
                reg_0c: 0x60,
                reg_0d: 0x2f,
                reg_0e: 0x13,
                timing_mono: [0x06, 0x17, 0x01, 0x03, 0x05, 0x07, 0x00, 0x00, 0x0b, 0x00],
                timing_color: [0x06, 0x17, 0x01, 0x03, 0x05, 0x07, 0x00, 0x00, 0x0b, 0x00],
                reg_26: color_mode::GREEN,
                reg_27: 0,
                reg_29: 1,
                illumination_mono: Illumination::default(),
                illumination_color: Illumination::default(),
                stepper_phase_correction: 0,
                optic_black_start: 13,
                optic_black_end: 33,
                active_pixels_start: 64,
                line_end: 5440,
                lamp: LampTiming {
                    red_on: 16383,
                    red_off: 1,
                    ..LampTiming::default()
                },
                reg_45: 3,
                steps_after_paper_sensor2: 0,
                steps_to_reverse: 0x20,
                reg_51: 0xfc,
                misc: [0, 0, 0x02, 0x1f, 0x05, 0x44, 0x14, 0x11, 0, 0, 0],
                chip: Chip::Lm9832,
                motor_model: MotorModel::CanonCcd1200,
            },
        }
    }

    /// Canon CanoScan LiDE25, a 1200 dpi CIS with a dark calibration strip.
    pub fn canon_lide25() -> Self {
        let color_lamp = LampTiming {
            red_on: 50,
            red_off: 5600,
            green_on: 50,
            green_off: 7100,
            blue_on: 50,
            blue_off: 4600,
        };
        Self {
            name: "CanoScan LiDE25",
            caps: DeviceCaps {
                normal: SourceCaps {
                    data_origin: Xy::new(0, 100),
                    shading_origin_y: 50,
                    dark_shading_origin_y: 10,
                    size: Xy::new(2550, 3508),
                    min_dpi: Xy::new(75, 75),
                },
                positive: SourceCaps::default(),
                negative: SourceCaps::default(),
                adf: SourceCaps::default(),
                optic_dpi: Xy::new(1200, 1200),
                flags: DeviceFlags::NONE,
                sensor_order: SensorOrder::Rgb,
                sensor_distance: 16,
                ccd: CcdId::Cis1240,
                pcb: 0,
                workarounds: Workarounds::MISC_IO_LAMPS,
                buttons: 0,
            },
            hw: HwDef {
                max_motor_speed: 0.70,
                max_move_speed: 0.25,
                high_speed: 0.0,
                integration_time_low_lamp: 100.0,
                integration_time_high_lamp: 100.0,
                motor_dpi: 1200,
                dram_size: 512,
                min_integration_time_lowres: 3.75,
                min_integration_time_highres: 5.75,
                green_pwm_duty_low: 0,
                green_pwm_duty_high: 0,
                sensor_configuration: 0x11,
                reg_0c: 0x4d,
                reg_0d: 0x2f,
                reg_0e: 0x00,
                timing_mono: [0x00, 0x00, 0x04, 0x05, 0x06, 0x07, 0x00, 0x00, 0x00, 0x07],
                timing_color: [0x00, 0x00, 0x04, 0x05, 0x06, 0x07, 0x00, 0x00, 0x00, 0x07],
                reg_26: color_mode::BLUE | color_mode::ONE_CHANNEL_COLOR,
                reg_27: 0x00,
                reg_29: 2,
                illumination_mono: Illumination {
                    mode: 3,
                    lamp: LampTiming {
                        red_on: 0,
                        red_off: 0,
                        green_on: 50,
                        green_off: 3700,
                        blue_on: 0,
                        blue_off: 0,
                    },
                },
                illumination_color: Illumination {
                    mode: 2,
                    lamp: color_lamp,
                },
                stepper_phase_correction: 1,
                optic_black_start: 0,
                optic_black_end: 0,
                active_pixels_start: 0x7f,
                line_end: 10559,
                lamp: color_lamp,
                reg_45: 3,
                steps_after_paper_sensor2: 0,
                steps_to_reverse: 0x20,
                reg_51: 0xfc,
                misc: [0, 0x0f, 0x08, 0x1f, 0x04, 0x66, 0x16, 0x91, 0x01, 0, 0],
                chip: Chip::Lm9833,
                motor_model: MotorModel::CanonLide25,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plustek_motor_family() {
        assert!(MotorModel::KaoHsiung.is_plustek());
        assert!(MotorModel::Tokyo600.is_plustek());
        assert!(!MotorModel::Epson.is_plustek());
        assert!(!MotorModel::CanonLide25.is_plustek());
    }

    #[test]
    fn enums_from_register_values() {
        assert_eq!(CcdId::try_from(9u8).unwrap(), CcdId::Cis1240);
        assert_eq!(MotorModel::try_from(16u8).unwrap(), MotorModel::QuickScanA6);
        assert!(SensorOrder::try_from(6u8).is_err());
    }

    #[test]
    fn sensor_rows() {
        assert_eq!(SensorOrder::Gbr.rows(), [1, 2, 0]);
        assert_eq!(SensorOrder::Bgr.rows(), [2, 1, 0]);
    }

    #[test]
    fn workaround_flags() {
        let flags = DeviceProfile::canon_d660u().caps.workarounds;
        assert!(flags.contains(Workarounds::GRAY_FROM_COLOR));
        assert!(flags.contains(Workarounds::BIN_FROM_COLOR));
        assert!(!flags.contains(Workarounds::SKIP_FINE));
        assert!(!flags.contains(Workarounds::NONE));
        let mut flags = flags;
        flags.remove(Workarounds::GRAY_FROM_COLOR);
        assert!(!flags.contains(Workarounds::GRAY_FROM_COLOR));
    }

    #[test]
    fn cis_detection() {
        assert!(DeviceProfile::canon_lide25().is_cis());
        assert!(!DeviceProfile::plustek_ut12().is_cis());
        assert!(!DeviceProfile::epson_1250().is_cis());
    }

    #[test]
    fn lamp_registers() {
        let timing = DeviceProfile::canon_lide25().hw.lamp;
        let regs = timing.to_registers();
        assert_eq!(&regs[0..4], &[0, 50, 0x15, 0xe0]);
    }

    #[test]
    fn adjustments_fold_into_profile() {
        let mut profile = DeviceProfile::canon_lide25();
        let adj = Adjustments {
            skip_fine_white: true,
            skip_dark_strip: true,
            lamp_off: Some([0, 0x5000, 3000]),
            ..Adjustments::default()
        };
        profile.apply(&adj);
        assert!(profile.caps.workarounds.contains(Workarounds::SKIP_WHITEFINE));
        assert!(!profile.caps.normal.has_dark_strip());
        assert_eq!(profile.hw.lamp.red_off, 5600);
        assert_eq!(profile.hw.lamp.green_off, 0x3fff);
        assert_eq!(profile.hw.lamp.blue_off, 3000);
        assert_eq!(adj.warmup, -1);
    }

    #[test]
    fn monochrome_illumination() {
        let mut profile = DeviceProfile::canon_lide25();
        let adj = Adjustments {
            lamp_off: Some([0, 3000, 0]),
            ..Adjustments::default()
        };
        profile.select_illumination(DataType::Gray, &adj);
        assert_eq!(profile.hw.reg_29, 3);
        assert_eq!(profile.hw.lamp.red_off, 0);
        assert_eq!(profile.hw.lamp.green_on, 50);
        assert_eq!(profile.hw.lamp.green_off, 3000);

        let mut ccd = DeviceProfile::plustek_ut12();
        ccd.select_illumination(DataType::Gray, &adj);
        assert_eq!(ccd, DeviceProfile::plustek_ut12());
    }

    #[test]
    fn dark_strip() {
        assert!(DeviceProfile::canon_lide25().caps.normal.has_dark_strip());
        assert!(!DeviceProfile::plustek_ut12().caps.normal.has_dark_strip());
    }
}
