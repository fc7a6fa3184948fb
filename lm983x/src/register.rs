// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
use core::ops::{Index, IndexMut, Range};

use paste::paste;

use crate::device::HwDef;
use crate::util::Buffer;

/// The number of registers in the LM983x register file.
pub const REGISTER_COUNT: usize = 0x80;

/// Register addresses used by this crate.
///
/// Only the registers the planner and calibration touch by name are listed here; the remainder of
/// the file is carried along verbatim from the hardware definition.
pub mod address {
    /// Selects which shading table (and which channel) the data port writes into.
    pub const SHADING_SELECT: u8 = 0x03;
    /// DRAM address for the data port, two bytes.
    pub const DRAM_ADDRESS: u8 = 0x04;
    /// Data port for shading and map downloads.
    pub const DATA_PORT: u8 = 0x06;
    /// Command register. Writing 3 starts a scan, 0 stops it.
    pub const COMMAND: u8 = 0x07;
    /// Master clock divider.
    pub const MCLK_DIVIDER: u8 = 0x08;
    /// Horizontal resolution divider and pixel bit depth.
    pub const HORIZONTAL_RESOLUTION: u8 = 0x09;
    /// Preview/turbo mode.
    pub const PREVIEW: u8 = 0x0a;
    pub const SENSOR_CONFIGURATION: u8 = 0x0b;
    pub const SENSOR_CONTROL_0C: u8 = 0x0c;
    pub const SENSOR_CONTROL_0D: u8 = 0x0d;
    pub const SENSOR_CONTROL_0E: u8 = 0x0e;
    /// First of the ten sensor timing registers (0x0f to 0x18).
    pub const SENSOR_TIMING: u8 = 0x0f;
    /// Integration time adjust.
    pub const INTEGRATION_ADJUST: u8 = 0x19;
    pub const STEPPER_PHASE_CORRECTION: u8 = 0x1a;
    pub const LINE_END: u8 = 0x20;
    pub const DATA_PIXELS_START: u8 = 0x22;
    pub const DATA_PIXELS_END: u8 = 0x24;
    /// AFE operation mode and color channel selection.
    pub const COLOR_MODE: u8 = 0x26;
    pub const COLOR_MODE_EXTRA: u8 = 0x27;
    /// Illumination mode.
    pub const LAMP_MODE: u8 = 0x29;
    pub const GREEN_PWM_DUTY: u8 = 0x2a;
    /// First of the six lamp on/off pairs (0x2c to 0x37).
    pub const LAMP_TIMING: u8 = 0x2c;
    /// Red, green and blue AFE offsets.
    pub const AFE_OFFSET: u8 = 0x38;
    /// Red, green and blue AFE gains.
    pub const AFE_GAIN: u8 = 0x3b;
    pub const SHADING_OFFSET: u8 = 0x3e;
    /// Shading mode and pixel-pipeline control, three bytes.
    pub const SHADING_MODE: u8 = 0x40;
    pub const LINES_PER_STEP: u8 = 0x43;
    /// Stepper motor control, bit 4 switches the motor on.
    pub const MOTOR_CONTROL: u8 = 0x45;
    pub const STEP_SIZE: u8 = 0x46;
    pub const FAST_FEED_STEP: u8 = 0x48;
    pub const START_POSITION: u8 = 0x4a;
    pub const FULL_STEPS_TO_SCAN: u8 = 0x4c;
    pub const PAUSE_LIMIT: u8 = 0x4e;
    pub const RESUME_LIMIT: u8 = 0x4f;
    pub const STEPS_TO_REVERSE: u8 = 0x50;
    pub const ACCELERATION_PROFILE: u8 = 0x51;
    pub const DATA_PIXEL_DELAY: u8 = 0x52;
    pub const LINES_TO_PROCESS: u8 = 0x54;
    pub const PWM_FREQUENCY: u8 = 0x56;
    pub const PWM_DUTY: u8 = 0x57;
    pub const PAPER_SENSE: u8 = 0x58;
    pub const MISC_IO: u8 = 0x59;
}

/// Bits of the color mode register (0x26).
pub mod color_mode {
    /// One channel carries all three colors, one after the other (CIS style).
    pub const ONE_CHANNEL_COLOR: u8 = 0x04;
    pub const RED: u8 = 0x00;
    pub const GREEN: u8 = 0x08;
    pub const BLUE: u8 = 0x10;
}

/// Generate big-endian accessors for the two-byte register pairs.
macro_rules! register_pair {
    { $( $name:ident => $address:ident, $doc:literal; )* } => {
        $(
            paste! {
                #[doc = $doc]
                pub fn $name(&self) -> u16 {
                    self.word(address::$address)
                }

                #[doc = $doc]
                pub fn [< set_ $name >](&mut self, value: u16) {
                    self.set_word(address::$address, value)
                }
            }
        )*
    };
}

/// The software copy of the ASIC register file.
///
/// The planner and the calibration engine compute into this copy, and whole ranges of it are then
/// written out through [`RegisterIo`][crate::transport::RegisterIo]. Nothing here talks to the
/// hardware.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterSet {
    regs: [u8; REGISTER_COUNT],
}

impl RegisterSet {
    /// An all-zero register file.
    pub fn new() -> Self {
        Self {
            regs: [0u8; REGISTER_COUNT],
        }
    }

    /// Create the power-on register file for a device.
    ///
    /// The active pixel start is not applied here, the planner adds it to the data pixel window
    /// for the phases that need it.
    pub fn from_hardware(hw: &HwDef) -> Self {
        let mut regs = Self::new();
        regs[address::SENSOR_CONFIGURATION] = hw.sensor_configuration;
        regs[address::SENSOR_CONTROL_0C] = hw.reg_0c;
        regs[address::SENSOR_CONTROL_0D] = hw.reg_0d;
        regs[address::SENSOR_CONTROL_0E] = hw.reg_0e;
        regs.range_mut(address::SENSOR_TIMING, 10)
            .copy_from_slice(&hw.timing_color);
        regs.set_stepper_phase_correction(hw.stepper_phase_correction);
        regs.set_line_end(hw.line_end);
        let black_start = u16::from(hw.optic_black_start);
        regs.set_data_pixels_start(black_start);
        let line_end = (black_start + hw.line_end).max(hw.line_end.saturating_sub(20));
        regs.set_data_pixels_end(line_end);
        regs.set_green_pwm_duty(hw.green_pwm_duty_high);
        regs[address::LAMP_MODE] = hw.reg_29;
        regs.range_mut(address::LAMP_TIMING, 12)
            .copy_from_slice(&hw.lamp.to_registers());
        regs[address::MOTOR_CONTROL] = hw.reg_45;
        regs.set_full_steps_to_scan(hw.steps_after_paper_sensor2);
        regs[address::STEPS_TO_REVERSE] = hw.steps_to_reverse;
        regs[address::ACCELERATION_PROFILE] = hw.reg_51;
        regs.range_mut(address::LINES_TO_PROCESS, hw.misc.len())
            .copy_from_slice(&hw.misc);
        regs
    }

    /// Read a big-endian register pair.
    pub fn word(&self, address: u8) -> u16 {
        let mut pair = self.range(address, 2);
        pair.get_u16()
    }

    /// Write a big-endian register pair.
    pub fn set_word(&mut self, address: u8, value: u16) {
        self.range_mut(address, 2)
            .copy_from_slice(&value.to_be_bytes());
    }

    /// A run of `count` registers starting at `address`.
    pub fn range(&self, address: u8, count: usize) -> &[u8] {
        &self.regs[Self::span(address, count)]
    }

    pub fn range_mut(&mut self, address: u8, count: usize) -> &mut [u8] {
        &mut self.regs[Self::span(address, count)]
    }

    /// Zero a run of registers.
    pub fn clear(&mut self, address: u8, count: usize) {
        self.range_mut(address, count).fill(0);
    }

    pub fn as_bytes(&self) -> &[u8; REGISTER_COUNT] {
        &self.regs
    }

    fn span(address: u8, count: usize) -> Range<usize> {
        let start = address as usize;
        start..(start + count).min(REGISTER_COUNT)
    }

    register_pair! {
        stepper_phase_correction => STEPPER_PHASE_CORRECTION, "Stepper phase correction (0x1a, 0x1b).";
        line_end => LINE_END, "Line end in pixel periods (0x20, 0x21).";
        data_pixels_start => DATA_PIXELS_START, "First data pixel, in pixel-clock units (0x22, 0x23).";
        data_pixels_end => DATA_PIXELS_END, "Last data pixel, in pixel-clock units (0x24, 0x25).";
        green_pwm_duty => GREEN_PWM_DUTY, "Green lamp PWM duty cycle (0x2a, 0x2b).";
        step_size => STEP_SIZE, "Scan step size (0x46, 0x47).";
        fast_feed_step => FAST_FEED_STEP, "Fast feed step size (0x48, 0x49).";
        start_position => START_POSITION, "Vertical start position in motor steps (0x4a, 0x4b).";
        full_steps_to_scan => FULL_STEPS_TO_SCAN, "Full steps to scan (0x4c, 0x4d).";
    }

    /// Raw AFE offset register for a channel, in sign-magnitude form.
    pub fn afe_offset(&self, channel: usize) -> u8 {
        self.regs[address::AFE_OFFSET as usize + channel]
    }

    pub fn afe_gain(&self, channel: usize) -> u8 {
        self.regs[address::AFE_GAIN as usize + channel]
    }

    pub fn set_afe_gain(&mut self, channel: usize, gain: u8) {
        self.regs[address::AFE_GAIN as usize + channel] = gain;
    }

    pub fn set_afe_offset(&mut self, channel: usize, offset: u8) {
        self.regs[address::AFE_OFFSET as usize + channel] = offset;
    }

    /// Set all three AFE gains to the same value.
    pub fn set_all_gains(&mut self, gain: u8) {
        self.range_mut(address::AFE_GAIN, 3).fill(gain);
    }

    pub fn set_all_offsets(&mut self, offset: u8) {
        self.range_mut(address::AFE_OFFSET, 3).fill(offset);
    }

    /// Switch the stepper motor on or off for the next scan (bit 4 of 0x45).
    ///
    /// Calibration strips that have to be read from one spot are scanned with the motor off.
    pub fn set_motor_enabled(&mut self, enabled: bool) {
        if enabled {
            self.regs[address::MOTOR_CONTROL as usize] |= 0x10;
        } else {
            self.regs[address::MOTOR_CONTROL as usize] &= !0x10;
        }
    }

    pub fn motor_enabled(&self) -> bool {
        crate::util::is_bit_set(self.regs[address::MOTOR_CONTROL as usize], 4)
    }
}

impl Default for RegisterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<u8> for RegisterSet {
    type Output = u8;

    fn index(&self, address: u8) -> &Self::Output {
        &self.regs[address as usize]
    }
}

impl IndexMut<u8> for RegisterSet {
    fn index_mut(&mut self, address: u8) -> &mut Self::Output {
        &mut self.regs[address as usize]
    }
}

impl core::fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Sixteen registers to a row, the same way the datasheet lays them out.
        let mut list = f.debug_list();
        for row in self.regs.chunks(16) {
            list.entry(&format_args!("{:02x?}", row));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::DeviceProfile;

    #[test]
    fn word_is_big_endian() {
        let mut regs = RegisterSet::new();
        regs.set_step_size(0x1234);
        assert_eq!(regs[0x46], 0x12);
        assert_eq!(regs[0x47], 0x34);
        assert_eq!(regs.step_size(), 0x1234);
    }

    #[test]
    fn from_hardware() {
        let profile = DeviceProfile::plustek_ut12();
        let regs = RegisterSet::from_hardware(&profile.hw);
        assert_eq!(regs[address::SENSOR_CONFIGURATION], 0x02);
        assert_eq!(regs[address::SENSOR_CONTROL_0D], 0x37);
        assert_eq!(regs.line_end(), 5400);
        assert_eq!(regs.data_pixels_start(), 14);
        assert_eq!(regs.data_pixels_end(), 5414);
        assert_eq!(regs.green_pwm_duty(), 4095);
        assert_eq!(regs[address::ACCELERATION_PROFILE], 0xa8);
        assert_eq!(regs[address::PWM_FREQUENCY], 64);
        assert_eq!(regs[address::PWM_DUTY], 20);
    }

    #[test]
    fn motor_bit() {
        let mut regs = RegisterSet::new();
        regs[address::MOTOR_CONTROL] = 0x03;
        regs.set_motor_enabled(true);
        assert_eq!(regs[address::MOTOR_CONTROL], 0x13);
        assert!(regs.motor_enabled());
        regs.set_motor_enabled(false);
        assert_eq!(regs[address::MOTOR_CONTROL], 0x03);
    }

    #[test]
    fn ranges_are_clamped() {
        let mut regs = RegisterSet::new();
        regs.clear(0x7e, 10);
        assert_eq!(regs.range(0x7e, 10).len(), 2);
    }
}
