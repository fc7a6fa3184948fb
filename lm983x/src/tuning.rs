// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Empirical per-model tuning tables.
//!
//! Every value in here was measured on real hardware. None of it can be derived, so it is kept
//! as plain data, resolved once per session.
use crate::device::{CcdId, Chip, DataType, MotorModel, ScanSource};

/// The vertical resolution brackets the per-motor tables are indexed by.
pub const DPI_RANGES: [u32; 10] = [75, 100, 150, 200, 300, 400, 600, 800, 1200, 2400];

/// Index into the per-motor tables for a physical vertical resolution.
pub fn dpi_bracket(phy_dpi_y: u32) -> usize {
    DPI_RANGES
        .iter()
        .position(|&limit| phy_dpi_y <= limit)
        .unwrap_or(DPI_RANGES.len() - 1)
}

/// Motor PWM settings for one resolution bracket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorSet {
    pub pwm: u8,
    pub pwm_duty: u8,
    /// Sensor lines per motor step.
    pub lines_per_step: u8,
}

/// Tuning for one motor model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorDef {
    pub model: MotorModel,

    /// PWM frequency and duty cycle for fast moves.
    pub pwm_fast: u8,
    pub pwm_duty_fast: u8,
    pub mclk_fast: u8,

    /// At or below this vertical resolution `line_end` replaces the device line end. Zero when
    /// unused.
    pub dpi_thresh: u16,
    pub line_end: u16,

    pub motor_sets: [MotorSet; 10],

    /// Master clock per resolution bracket, for color 8 bit, color 16 bit, gray 8 bit and gray
    /// 16 bit.
    pub color_mclk_8: [f64; 10],
    pub color_mclk_16: [f64; 10],
    pub gray_mclk_8: [f64; 10],
    pub gray_mclk_16: [f64; 10],
}

impl MotorDef {
    /// The master clock to use for a scan, from the static table.
    pub fn mclk(&self, data_type: DataType, bit_depth: u8, phy_dpi_y: u32) -> f64 {
        let idx = dpi_bracket(phy_dpi_y);
        match (data_type == DataType::Color, bit_depth > 8) {
            (true, true) => self.color_mclk_16[idx],
            (true, false) => self.color_mclk_8[idx],
            (false, true) => self.gray_mclk_16[idx],
            (false, false) => self.gray_mclk_8[idx],
        }
    }
}

const fn sets(pwm: u8, pwm_duty: u8, lines_per_step: u8) -> [MotorSet; 10] {
    [MotorSet {
        pwm,
        pwm_duty,
        lines_per_step,
    }; 10]
}

const PLUSTEK_MCLK: [f64; 10] = [2.0, 2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0, 3.0];

macro_rules! motor {
    ($model:ident, ($pwm:expr, $duty:expr, $mclk:expr, $thresh:expr, $line_end:expr),
     $sets:expr, $c8:expr, $c16:expr, $g8:expr, $g16:expr) => {
        MotorDef {
            model: MotorModel::$model,
            pwm_fast: $pwm,
            pwm_duty_fast: $duty,
            mclk_fast: $mclk,
            dpi_thresh: $thresh,
            line_end: $line_end,
            motor_sets: $sets,
            color_mclk_8: $c8,
            color_mclk_16: $c16,
            gray_mclk_8: $g8,
            gray_mclk_16: $g16,
        }
    };
}

/// Motor tuning, in [`MotorModel`] order.
#[rustfmt::skip]
pub const MOTORS: [MotorDef; 17] = [
    motor!(KaoHsiung, (64, 20, 6, 0, 0), sets(0, 0, 0),
        PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK),
    motor!(HuaLien, (64, 20, 6, 0, 0), sets(0, 0, 0),
        PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK),
    motor!(Tokyo600, (4, 4, 6, 0, 0), sets(0, 0, 0),
        PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK, PLUSTEK_MCLK),
    motor!(Epson, (2, 1, 6, 0, 0), sets(2, 1, 1),
        [2.0, 2.0, 2.5, 2.5, 2.5, 2.5, 4.0, 4.0, 6.0, 6.0],
        [2.0, 2.0, 2.5, 2.5, 3.0, 3.0, 3.0, 4.0, 6.0, 6.0],
        [6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 9.0, 9.0, 18.0, 18.0],
        [6.0, 6.0, 6.0, 6.0, 6.0, 8.0, 9.0, 9.0, 18.0, 18.0]),
    motor!(Mustek600, (4, 4, 6, 0, 0), sets(16, 4, 1),
        [4.0, 3.5, 3.5, 4.0, 4.0, 5.0, 5.0, 7.5, 7.5, 7.5],
        [4.0, 3.5, 3.5, 4.0, 4.0, 5.0, 5.0, 7.5, 7.5, 7.5],
        [7.5, 7.0, 6.5, 5.5, 5.5, 5.5, 7.0, 7.0, 7.0, 7.0],
        [7.5, 7.0, 6.5, 5.5, 5.5, 5.5, 7.0, 7.0, 7.0, 7.0]),
    motor!(Mustek1200, (2, 32, 3, 0, 0), sets(2, 32, 1),
        [3.5; 10], [3.5; 10], [10.0; 10], [10.0; 10]),
    motor!(Hp, (8, 60, 6, 0, 0), sets(8, 60, 1),
        [4.0, 4.0, 4.0, 4.0, 3.0, 4.0, 6.0, 6.0, 6.0, 6.0],
        [4.0, 4.0, 4.0, 4.0, 3.0, 4.0, 6.0, 6.0, 6.0, 6.0],
        [8.0, 8.0, 8.0, 8.0, 8.0, 13.0, 13.0, 13.0, 13.0, 13.0],
        [8.0, 8.0, 8.0, 8.0, 8.0, 13.0, 13.0, 13.0, 13.0, 13.0]),
    motor!(Canon600, (8, 31, 12, 0, 0), sets(8, 31, 1),
        [7.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [7.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [15.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0],
        [15.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0]),
    motor!(Canon1200, (8, 31, 8, 0, 0), sets(8, 31, 1),
        [3.0; 10],
        [3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 5.0, 6.0, 6.0, 6.0],
        [8.5, 7.0, 5.0, 4.0, 2.5, 2.5, 2.5, 2.5, 2.5, 2.5],
        [8.5, 6.5, 6.0, 6.0, 6.0, 6.0, 8.0, 12.0, 12.0, 12.0]),
    motor!(CanonCcd1200, (2, 31, 3, 0, 0), sets(2, 31, 1),
        [2.0, 2.0, 2.0, 2.5, 2.5, 2.5, 3.0, 3.5, 5.0, 5.0],
        [2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0, 4.0, 5.0, 5.0],
        [6.0; 10],
        [6.5, 6.5, 6.5, 7.0, 8.0, 8.0, 8.0, 10.0, 10.0, 10.0]),
    motor!(CanonLide25, (8, 31, 3, 0, 0), sets(8, 31, 1),
        [3.0, 3.0, 3.0, 3.0, 3.5, 3.0, 3.0, 3.0, 3.0, 3.0],
        [3.0, 3.0, 3.0, 3.0, 3.5, 3.5, 5.0, 6.0, 6.0, 6.0],
        [8.5, 7.0, 5.0, 4.0, 2.5, 2.5, 2.5, 2.5, 2.5, 2.5],
        [7.5, 6.5, 6.0, 6.0, 6.0, 6.0, 8.0, 12.0, 12.0, 12.0]),
    motor!(Umax, (16, 4, 6, 0, 0), sets(16, 4, 1),
        [3.5; 10], [3.5; 10], [10.5; 10], [10.5; 10]),
    motor!(Umax1200, (16, 4, 6, 0, 0), sets(16, 4, 1),
        [3.0, 3.0, 3.0, 3.0, 3.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [5.0; 10],
        [6.0, 6.0, 6.0, 6.0, 6.0, 13.0, 13.0, 13.0, 13.0, 13.0],
        [13.0; 10]),
    motor!(TravelScan, (2, 22, 6, 75, 4000), sets(2, 22, 1),
        [6.0; 10], [6.0; 10], [16.0; 10], [16.0; 10]),
    motor!(TravelScanA4, (2, 22, 6, 75, 8400), sets(2, 22, 1),
        [6.0; 10], [6.0; 10], [16.0; 10], [16.0; 10]),
    motor!(QuickScan, (8, 21, 6, 300, 4600), sets(8, 21, 1),
        [6.5, 6.5, 6.5, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [6.5, 6.5, 6.5, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [6.5, 6.5, 6.5, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0],
        [6.5, 6.5, 6.5, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0]),
    motor!(QuickScanA6, (8, 15, 6, 0, 0), sets(8, 15, 1),
        [7.5; 10], [7.5; 10], [15.0; 10], [15.0; 10]),
];

/// Look up the tuning for a motor model.
pub fn motor(model: MotorModel) -> &'static MotorDef {
    &MOTORS[u8::from(model) as usize]
}

/// Software offset and gain applied on top of the fine calibration.
///
/// Offsets are added to the dark level, gains are per mille of the white target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorTuning {
    pub offset: [i32; 3],
    pub gain: [u32; 3],
}

impl Default for SensorTuning {
    fn default() -> Self {
        Self {
            offset: [0; 3],
            gain: [1000; 3],
        }
    }
}

/// The parameters [`sensor_tuning`] picks a table entry by.
#[derive(Clone, Copy, Debug)]
pub struct TuningKey {
    pub ccd: CcdId,
    pub pcb: u16,
    pub chip: Chip,
    pub motor: MotorModel,
    pub source: ScanSource,
    pub data_type: DataType,
    pub bit_depth: u8,
    pub phy_dpi_x: u32,
}

const fn tuning(offset: [i32; 3], gain: [u32; 3]) -> SensorTuning {
    SensorTuning { offset, gain }
}

/// Resolve the software offsets and gains for a sensor.
pub fn sensor_tuning(key: &TuningKey) -> SensorTuning {
    // Film has its own, much shorter, table.
    if key.source != ScanSource::Reflection {
        return SensorTuning::default();
    }
    let dpi = key.phy_dpi_x;
    let color = key.data_type == DataType::Color;
    let slim = |dpi: u32| {
        if dpi <= 150 {
            tuning([600, 500, 300], [960, 970, 1000])
        } else if dpi <= 300 {
            tuning([700, 600, 400], [967, 980, 1000])
        } else {
            tuning([900, 850, 620], [965, 980, 1000])
        }
    };
    match key.ccd {
        CcdId::NecSlim => slim(dpi),
        CcdId::Cis670 if color => tuning([1000; 3], [952; 3]),
        CcdId::Nec3799 => {
            if key.pcb == 2 {
                slim(dpi)
            } else if key.motor == MotorModel::KaoHsiung {
                tuning([1950, 1700, 1250], [955, 950, 1000])
            } else {
                match (dpi <= 300, key.bit_depth > 8) {
                    (true, true) => tuning([0, 0, -300], [970, 985, 1050]),
                    (true, false) => tuning([-485, -375, -628], [970, 980, 1050]),
                    (false, true) => tuning([1150, 1000, 700], [990, 1000, 1050]),
                    (false, false) => tuning([-30, 0, -250], [985, 995, 1050]),
                }
            }
        }
        CcdId::Sony548 => {
            if color {
                if dpi <= 75 {
                    tuning([650, 850, 500], [980, 1004, 1036])
                } else if dpi <= 300 {
                    tuning([700, 900, 550], [970, 995, 1020])
                } else if dpi <= 400 {
                    tuning([770, 1010, 600], [970, 993, 1023])
                } else {
                    tuning([380, 920, 450], [957, 980, 1008])
                }
            } else {
                tuning([0, 1250, 0], [1000, 950, 1000])
            }
        }
        CcdId::Nec3778 => {
            let mut t = if key.chip == Chip::Lm9831 && dpi <= 300 {
                tuning([0, 0, 0], [900, 920, 980])
            } else if key.motor == MotorModel::HuaLien && dpi > 800 {
                tuning([0, 0, -200], [980, 930, 1080])
            } else {
                tuning([-304; 3], [910, 920, 975])
            };
            if key.data_type == DataType::BlackWhite && dpi <= 300 {
                t.offset[1] = 1000;
                t.gain[1] = 1000;
            }
            t
        }
        _ => SensorTuning::default(),
    }
}
