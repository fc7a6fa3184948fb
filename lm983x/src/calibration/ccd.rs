// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Calibration of CCD sensors.
//!
//! The coarse gain search works from a single brightest-block estimate per round, moving the
//! master clock when the gain register runs out of range. The coarse offset search is a
//! successive approximation over five rounds, keeping whichever register value came closest to
//! [`IDEAL_OFFSET`].
use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use tracing::{debug, info, trace, warn};

use super::{
    CalibrationSession, CalibrationState, StripLayout, IDEAL_GAIN_NORMAL, IDEAL_GAIN_POSITIVE,
    IDEAL_OFFSET, MAX_GAIN_LOOPS,
};
use crate::device::{CcdId, Chip, DataType, DeviceCaps, MotorModel, ScanSource, Workarounds};
use crate::error::Error;
use crate::geometry::{Phase, ScanParam};
use crate::register::address;
use crate::shading::{
    average_lines, dark_plane, trimmed_sums, white_coefficient, DarkProfile,
};
use crate::transport::Scanner;

/// The highest AFE gain register value.
const MAX_GAIN: u8 = 0x3f;

/// Lines left out at either end when summing the white strip.
const WHITE_TRIM: usize = 4;

/// How the brightest part of a gain strip is found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GainSearch {
    /// Brightest 10-pixel block of each channel.
    Peak,
    /// Brightest 20-pixel block by luminance, as needed for negative film.
    Film {
        /// Consider every block. Otherwise only blocks where red outshines green count, which
        /// keeps the orange film mask from dominating.
        any_block: bool,
    },
}

/// The AFE gain register value that brings `w_max`, read with gain `current`, up to `ideal`.
///
/// Gains below 32 amplify by `0.93 + 0.067 * gain`, gains from 32 up by three times that (of
/// `gain - 32`). Of the two neighbouring register values the one landing closer to `ideal` is
/// picked, unless the brighter one would clip.
pub fn new_gain(w_max: u16, current: u8, ideal: u32) -> u8 {
    let w_max = f64::from(w_max.max(1));
    let amp = 0.93 + 0.067 * f64::from(current);
    let ideal = f64::from(ideal);
    let unamplified = w_max / amp;
    let ratio = ideal / unamplified;
    let gain = if ratio < 3.0 {
        let step = (ideal * amp / w_max - 0.93) / 0.067;
        let up = step.ceil();
        if up > f64::from(MAX_GAIN) {
            return MAX_GAIN;
        }
        let down = step.floor();
        let reached = |gain: f64| ((0.93 + gain * 0.067) * unamplified) as u32;
        let inc = reached(up);
        let dec = reached(down);
        let ideal = ideal as u32;
        if inc >= 0xff00 || inc.abs_diff(ideal) > dec.abs_diff(ideal) {
            down
        } else {
            up
        }
    } else {
        let amp = ((ratio / 3.0 - 0.93) / 0.067).floor().min(31.0);
        amp + 32.0
    };
    gain.clamp(0.0, f64::from(MAX_GAIN)) as u8
}

/// One round of the coarse offset search.
///
/// `offset` is the signed offset tried last, `register` the value it was written as and `level`
/// the black level that came back. The best register value so far is kept in `best` along with
/// its distance from the target. Returns the register value for the next round.
fn next_offset(level: u32, register: u8, step: i8, offset: &mut i8, best: &mut (u32, u8)) -> u8 {
    let diff = level.abs_diff(IDEAL_OFFSET);
    if diff < best.0 {
        *best = (diff, register);
    }
    if level > IDEAL_OFFSET {
        *offset -= step;
    } else {
        *offset += step;
    }
    if *offset >= 0 {
        *offset as u8
    } else {
        (32 - i16::from(*offset)) as u8
    }
}

/// The master clock divider for reflective scans with Plustek's own motors, used for both the
/// session and its calibration.
fn plustek_reflective_mclk(caps: &DeviceCaps, model: MotorModel, param: &ScanParam) -> f64 {
    let phy_x = param.phy_dpi.x;
    let color = param.data_type == DataType::Color;
    if caps.optic_dpi.x != 600 {
        return match (color, phy_x) {
            (false, x) if x > 300 => 6.0,
            (false, _) => 5.0,
            (true, x) if x <= 300 => 2.0,
            (true, x) if x <= 800 => 4.0,
            (true, _) => 5.5,
        };
    }
    if caps.ccd == CcdId::Sony548 {
        return match param.data_type {
            DataType::Color if phy_x <= 75 => 2.5,
            DataType::Color if phy_x <= 300 => 3.0,
            DataType::Color if phy_x <= 400 => 4.0,
            DataType::Color => 6.0,
            DataType::Gray if phy_x <= 75 => 7.0,
            DataType::Gray if phy_x <= 400 => 6.0,
            DataType::Gray => 7.0,
            DataType::BlackWhite if phy_x <= 75 => 7.0,
            DataType::BlackWhite if phy_x <= 100 => 6.0,
            DataType::BlackWhite if phy_x <= 200 => 5.0,
            DataType::BlackWhite if phy_x <= 300 => 4.5,
            DataType::BlackWhite if phy_x <= 400 => 4.0,
            DataType::BlackWhite => 6.0,
        };
    }
    let pick = |color_mclk: f64, mono_mclk: f64| if color { color_mclk } else { mono_mclk };
    if caps.pcb == 2 {
        return if phy_x > 300 {
            pick(6.0, 16.0)
        } else if phy_x > 150 {
            pick(4.5, 13.5)
        } else {
            pick(3.0, 8.0)
        };
    }
    if caps.buttons == 0 {
        return if phy_x > 300 { pick(3.0, 9.0) } else { pick(2.0, 6.0) };
    }
    match model {
        MotorModel::KaoHsiung if caps.ccd == CcdId::Nec3799 => {
            if phy_x > 300 {
                pick(6.0, 13.0)
            } else if phy_x > 150 {
                pick(4.5, 13.5)
            } else {
                pick(3.0, 6.0)
            }
        }
        MotorModel::KaoHsiung => pick(3.0, 6.0),
        _ => {
            if param.bit_depth > 8 {
                pick(5.0, 13.0)
            } else if phy_x > 300 {
                pick(6.0, 13.0)
            } else {
                pick(3.0, 6.0)
            }
        }
    }
}

impl<S, D> CalibrationSession<S, D>
where
    S: Scanner,
    S::Error: Debug,
    D: DelayMs<u32>,
{
    /// Calibrate a CCD device, or set it up without calibration when `bypass` is set.
    pub(super) fn calibrate_ccd(&mut self, bypass: bool) -> Result<(), Error<S::Error>> {
        let source = self.setup.param.source;
        let shading_y = self.profile.caps.source(source).shading_origin_y;
        self.move_to_strip(shading_y)?;

        self.speed_test()?;
        self.warm_up()?;
        self.prepare_calibration()?;

        if bypass {
            self.bypass();
        } else {
            match source {
                ScanSource::Negative => self.calibrate_negative()?,
                ScanSource::Adf => {
                    self.ideal_gain = IDEAL_GAIN_POSITIVE;
                    let (session, calibration) = self.feeder_mclk();
                    self.set_mclk_pair(session, calibration);
                    self.coarse_and_fine()?;
                }
                ScanSource::Transparency => {
                    self.ideal_gain = IDEAL_GAIN_POSITIVE;
                    if self.is_plustek_motor() {
                        let calibration = if self.profile.caps.optic_dpi.x == 600 {
                            4.0
                        } else {
                            6.0
                        };
                        self.set_mclk_pair(8.0, calibration);
                    } else {
                        self.set_session_mclk();
                    }
                    self.coarse_and_fine()?;
                }
                ScanSource::Reflection => {
                    self.ideal_gain = IDEAL_GAIN_NORMAL;
                    if self.is_plustek_motor() {
                        self.apply_plustek_line_end()?;
                        let mclk = plustek_reflective_mclk(
                            &self.profile.caps,
                            self.profile.hw.motor_model,
                            &self.setup.param,
                        );
                        if self.profile.caps.optic_dpi.x == 1200
                            && self.setup.param.data_type != DataType::Color
                            && self.setup.param.phy_dpi.x <= 300
                        {
                            self.regs[address::PREVIEW] = 1;
                        }
                        self.set_mclk_pair(mclk, mclk);
                    } else {
                        self.set_session_mclk();
                    }
                    self.coarse_and_fine()?;
                }
            }
        }
        self.park()
    }

    /// Session and calibration master clock for the sheet feeder.
    fn feeder_mclk(&self) -> (f64, f64) {
        let param = &self.setup.param;
        let phy_x = param.phy_dpi.x;
        if param.data_type == DataType::BlackWhite {
            match phy_x {
                0..=200 => (4.5, 4.0),
                201..=300 => (4.0, 3.5),
                301..=400 => (5.0, 4.0),
                _ => (6.0, 4.0),
            }
        } else if phy_x <= 400 {
            (6.0, 4.5)
        } else {
            (9.0, 7.0)
        }
    }

    /// The HuaLien boards with buttons need a longer line for 8-bit color at 200 and 300 dpi.
    fn apply_plustek_line_end(&mut self) -> Result<(), Error<S::Error>> {
        let caps = &self.profile.caps;
        let param = &self.setup.param;
        if caps.optic_dpi.x != 600
            || caps.ccd == CcdId::Sony548
            || caps.pcb == 2
            || caps.buttons == 0
            || self.profile.hw.motor_model != MotorModel::HuaLien
        {
            return Ok(());
        }
        let line_end = if param.data_type == DataType::Color
            && param.bit_depth == 8
            && matches!(param.phy_dpi.x, 200 | 300)
        {
            7000
        } else {
            5384
        };
        debug!(line_end, "line end for HuaLien");
        self.profile.hw.line_end = line_end;
        self.regs.set_line_end(line_end);
        self.write_registers(address::LINE_END, 2)
    }

    /// Coarse gain and offset, then the dark and white shading.
    fn coarse_and_fine(&mut self) -> Result<(), Error<S::Error>> {
        if !self.skip_coarse {
            self.adjust_gain(GainSearch::Peak)?;
            self.adjust_offset()?;
        }
        if self.fine_shading_from_cache()? {
            return Ok(());
        }
        self.adjust_dark_shading()?;
        self.adjust_white_shading()
    }

    /// Negative film needs the gain found under the film mask, but shading read at unity gain.
    fn calibrate_negative(&mut self) -> Result<(), Error<S::Error>> {
        self.ideal_gain = IDEAL_GAIN_NORMAL;
        if self.is_plustek_motor() {
            self.mclk = if self.profile.caps.optic_dpi.x == 600 { 7.0 } else { 8.0 };
        } else {
            self.set_session_mclk();
        }
        let gains = loop {
            self.adjust_gain(GainSearch::Film { any_block: false })?;
            let gains = [0, 1, 2].map(|channel| self.regs.afe_gain(channel));
            if gains.iter().all(|gain| *gain != 0) {
                break gains;
            }
            self.regs.set_all_gains(1);
            self.mclk -= 1.0;
            if self.mclk < 1.0 {
                return Err(Error::CalibrationFailed("lamp not stable"));
            }
            debug!(mclk = self.mclk, "film too bright, lowering the master clock");
        };
        self.setup.param.mclk = self.mclk;

        self.regs.set_motor_enabled(false);
        self.regs.set_all_gains(1);
        self.adjust_gain(GainSearch::Film { any_block: true })?;
        self.regs.set_all_gains(1);
        self.adjust_offset()?;
        self.adjust_dark_shading()?;
        self.adjust_white_shading()?;

        if self.setup.param.data_type == DataType::Color {
            let amps = gains.map(|gain| 0.93 + 0.067 * f64::from(gain));
            let max = amps.iter().copied().fold(f64::MIN, f64::max);
            let scale = 2.85 / max;
            for (plane, amp) in amps.iter().enumerate() {
                let gain = self.tuning.gain[plane];
                self.shading.resize_white(amp * scale, plane, gain);
            }
        }
        info!(?gains, "negative film calibrated");
        Ok(())
    }

    /// Search the AFE gains so the brightest part of the strip reaches the ideal level.
    fn adjust_gain(&mut self, search: GainSearch) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::CoarseGain;
        if self.apply_fixed_gains() {
            debug!("using fixed gains");
            return Ok(());
        }
        let min_mclk = self.table_mclk(&self.setup.param);
        let caps = &self.profile.caps;
        let optic_x = caps.optic_dpi.x;
        self.strip.size.lines = 1;
        self.strip.size.pixels = caps.normal.size.x * optic_x / 300;
        self.strip.origin.x = u32::from(self.profile.hw.active_pixels_start) * 300 / optic_x;
        self.strip.phase = Phase::Gain;

        let source = caps.source(self.setup.param.source);
        let start = (source.data_origin.x * optic_x / 300) as usize;
        let len = (source.size.x * optic_x / 300) as usize;
        let color = self.setup.param.data_type == DataType::Color;
        let plustek = self.is_plustek_motor();
        let model = self.profile.hw.motor_model;
        let ccd = caps.ccd;
        let mut repeat_ita = true;

        for round in 1..=MAX_GAIN_LOOPS {
            let data = self.scan_line()?;
            let layout = self.strip_layout();
            let end = (start + len).min(layout.pixels);
            let start = start.min(end);

            if let GainSearch::Film { any_block } = search {
                self.film_gains(&layout, &data, start, end, any_block);
                break;
            }

            let retry = if color {
                let peaks = layout.block_peaks(&data, start, end, 10);
                for (channel, peak) in peaks.iter().enumerate() {
                    let gain = new_gain(*peak, self.regs.afe_gain(channel), self.ideal_gain);
                    self.regs.set_afe_gain(channel, gain);
                }
                trace!(?peaks, gains = ?self.regs.range(address::AFE_GAIN, 3), "gain round");
                let gains = [0, 1, 2].map(|channel| self.regs.afe_gain(channel));
                let low = gains.contains(&0);
                let high = gains.contains(&MAX_GAIN);
                if !plustek {
                    if low && self.mclk > min_mclk {
                        Some(-0.5)
                    } else if high && self.mclk < 10.0 {
                        Some(0.5)
                    } else {
                        None
                    }
                } else if model == MotorModel::KaoHsiung
                    && ccd == CcdId::Nec3778
                    && self.mclk >= 5.5
                    && gains[1] == 0
                {
                    Some(-1.5)
                } else if model == MotorModel::HuaLien && ccd == CcdId::Nec3799 && repeat_ita {
                    if low && self.mclk > 3.0 {
                        Some(-0.5)
                    } else if high && self.mclk < 10.0 {
                        Some(0.5)
                    } else {
                        self.max_ita = ((self.mclk + 1.0) / 2.0) as u8;
                        repeat_ita = false;
                        None
                    }
                } else {
                    None
                }
            } else {
                let peak = (start..end)
                    .map(|x| layout.sample(&data, 0, 0, x))
                    .max()
                    .unwrap_or(0);
                let gain = new_gain(peak, self.regs.afe_gain(0), self.ideal_gain);
                self.regs.set_all_gains(gain);
                trace!(peak, gain, "gain round");
                if plustek {
                    None
                } else if gain == 0 && self.mclk > min_mclk {
                    Some(-0.5)
                } else if gain == MAX_GAIN && self.mclk < 20.0 {
                    Some(0.5)
                } else {
                    None
                }
            };

            match retry {
                Some(step) if round < MAX_GAIN_LOOPS => {
                    let mclk = self.mclk + step;
                    debug!(mclk, "gain out of range, changing the master clock");
                    self.set_mclk_pair(mclk, mclk);
                    self.regs.set_all_gains(1);
                }
                Some(_) => {
                    warn!(mclk = self.mclk, "gain search did not settle");
                    break;
                }
                None => break,
            }
        }
        debug!(gains = ?self.regs.range(address::AFE_GAIN, 3), mclk = self.mclk, "coarse gain");
        Ok(())
    }

    /// Gains from the brightest luminance block of a film strip.
    fn film_gains(
        &mut self,
        layout: &StripLayout,
        data: &[u16],
        start: usize,
        end: usize,
        any_block: bool,
    ) {
        const BLOCK: usize = 20;
        let blocks = (end - start) / BLOCK;
        if self.setup.param.data_type == DataType::Color {
            let mut best_gray = 0u32;
            let mut hilight = [0u32; 3];
            for block in 0..blocks {
                let first = start + block * BLOCK;
                let mut sums = [0u32; 3];
                for x in first..first + BLOCK {
                    for (channel, sum) in sums.iter_mut().enumerate() {
                        *sum += u32::from(layout.sample(data, 0, channel, x));
                    }
                }
                let gray = (sums[0] * 30 + sums[1] * 59 + sums[2] * 11) / 100;
                if (any_block || sums[0] > sums[1]) && gray > best_gray {
                    best_gray = gray;
                    hilight = sums.map(|sum| sum / BLOCK as u32);
                }
            }
            for (channel, level) in hilight.iter().enumerate() {
                let gain = new_gain(*level as u16, self.regs.afe_gain(channel), self.ideal_gain);
                self.regs.set_afe_gain(channel, gain);
            }
            trace!(?hilight, "film highlight");
        } else {
            let mut best = 0u32;
            for block in 0..blocks {
                let first = start + block * BLOCK;
                let sum: u32 = (first..first + BLOCK)
                    .map(|x| u32::from(layout.sample(data, 0, 0, x)))
                    .sum();
                if (any_block || sum < 0x6000 * BLOCK as u32) && sum > best {
                    best = sum;
                }
            }
            let level = (best / BLOCK as u32) as u16;
            let gain = new_gain(level, self.regs.afe_gain(0), self.ideal_gain);
            self.regs.set_all_gains(gain);
        }
    }

    /// Search the AFE offsets on the optically black pixels at the start of the sensor.
    fn adjust_offset(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::CoarseOffset;
        if self.apply_fixed_offsets() {
            debug!("using fixed offsets");
            return Ok(());
        }
        let hw = &self.profile.hw;
        let black_pixels = usize::from(hw.optic_black_end.saturating_sub(hw.optic_black_start));
        if black_pixels == 0 {
            return Err(Error::CalibrationFailed("no optically black pixels"));
        }
        let optic_x = self.profile.caps.optic_dpi.x;
        self.strip.size.lines = 1;
        self.strip.size.pixels = 2550;
        self.strip.origin.x = u32::from(hw.optic_black_start) * 300 / optic_x;
        self.strip.phase = Phase::Offset;
        self.strip.mclk = self.mclk;
        self.regs.set_all_offsets(0);
        self.set_scan_parameters()?;

        let channels = if self.setup.param.data_type == DataType::Color { 3 } else { 1 };
        let mut offsets = [0i8; 3];
        let mut best = [(0xffff_u32, 0u8); 3];
        let mut step = 16i8;
        while step != 0 {
            let data = self.read_strip(self.strip.size.phy_bytes)?;
            let layout = self.strip_layout();
            let count = black_pixels.min(layout.pixels).max(1);
            for channel in 0..channels {
                let sum: u32 = (0..count)
                    .map(|x| u32::from(layout.sample(&data, 0, channel, x)))
                    .sum();
                let level = sum / count as u32;
                let register = self.regs.afe_offset(channel);
                let next = next_offset(
                    level,
                    register,
                    step,
                    &mut offsets[channel],
                    &mut best[channel],
                );
                trace!(channel, level, register, next, "offset round");
                self.regs.set_afe_offset(channel, next);
            }
            if channels == 1 {
                self.regs.set_all_offsets(self.regs.afe_offset(0));
            }
            self.write_registers(address::AFE_OFFSET, 3)?;
            step >>= 1;
        }
        if channels == 1 {
            self.regs.set_all_offsets(best[0].1);
        } else {
            for (channel, (_, register)) in best.iter().enumerate() {
                self.regs.set_afe_offset(channel, *register);
            }
        }
        debug!(offsets = ?self.regs.range(address::AFE_OFFSET, 3), "coarse offset");
        Ok(())
    }

    /// Capture the dark level of every pixel, from the dark strip or with the lamp off.
    fn adjust_dark_shading(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        if self.profile.caps.workarounds.contains(Workarounds::SKIP_FINE) {
            return Ok(());
        }
        self.state = CalibrationState::FineDark;
        self.prepare_fine_calibration(0, Phase::DarkShading);
        let source = *self.profile.caps.source(self.setup.param.source);
        let dark_strip = source.has_dark_strip();
        if dark_strip {
            self.move_home()?;
            self.move_to_strip(source.dark_shading_origin_y)?;
        } else {
            self.switch_lamp(false)?;
        }
        let data = self.scan_fine_strip();
        if !dark_strip {
            self.switch_lamp(true)?;
        }
        let data = data?;
        if !dark_strip {
            self.delay_ms(500);
        }

        let layout = self.strip_layout();
        let profile = if dark_strip {
            DarkProfile::PerPixel
        } else if self.profile.hw.sensor_configuration & 0x04 != 0 {
            DarkProfile::EvenOdd {
                merge: self.profile.caps.pcb == 2,
            }
        } else {
            DarkProfile::Flat
        };
        if self.setup.param.data_type == DataType::Color {
            for channel in 0..3 {
                let averages = average_lines(&layout.plane(&data, channel), layout.pixels);
                let plane = dark_plane(&averages, profile, self.tuning.offset[channel]);
                fill(self.shading.dark_plane_mut(channel), &plane);
            }
        } else {
            let averages = average_lines(&layout.plane(&data, 0), layout.pixels);
            let plane = dark_plane(&averages, profile, self.tuning.offset[1]);
            fill(self.shading.dark_plane_mut(0), &plane);
            self.shading.replicate_dark(0);
        }
        self.regs.set_motor_enabled(true);
        debug!(?profile, first = ?self.shading.dark().first(), "dark shading");
        Ok(())
    }

    /// Capture the white level of every pixel and turn it into gain coefficients.
    fn adjust_white_shading(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        if self.profile.caps.workarounds.contains(Workarounds::SKIP_FINE) {
            return Ok(());
        }
        self.state = CalibrationState::FineWhite;
        self.prepare_fine_calibration(0, Phase::WhiteShading);
        let lines = self.strip.size.lines;
        let lm9831 = self.profile.hw.chip == Chip::Lm9831;

        // The LM9831 can't hold a whole white strip in its DRAM, so it is read in parts.
        let mut chunk = lines;
        if lm9831 {
            let channels = if self.setup.param.data_type == DataType::Color { 3 } else { 1 };
            let budget = u32::from(self.profile.hw.dram_size.saturating_sub(196)) * 1024;
            let bytes = (self.strip.size.pixels * 2 * channels).max(1);
            while chunk > 1 && budget / bytes < chunk {
                chunk >>= 1;
            }
            debug!(lines, chunk, "white strip in parts");
        }

        let source = *self.profile.caps.source(self.setup.param.source);
        if source.has_dark_strip() {
            self.move_home()?;
            self.move_to_strip(source.shading_origin_y)?;
        }
        self.strip.size.lines = chunk;
        let mut data = Vec::new();
        for _ in 0..(lines / chunk).max(1) {
            if lm9831 {
                self.delay_ms(900);
            }
            data.extend(self.scan_fine_strip()?);
            if lm9831 {
                self.delay_ms(10);
            }
        }

        let layout = self.strip_layout();
        let negative = self.setup.param.source == ScanSource::Negative;
        let color = self.setup.param.data_type == DataType::Color;
        let channels = if color { 3 } else { 1 };
        for channel in 0..channels {
            let plane = layout.plane(&data, channel);
            let (sums, count) = trimmed_sums(&plane, layout.pixels, WHITE_TRIM);
            let count = count.max(1);
            let gain = self.tuning.gain[if color { channel } else { 1 }];
            let values: Vec<u16> = if negative {
                sums.iter().map(|sum| (sum / count) as u16).collect()
            } else {
                sums.iter()
                    .map(|sum| white_coefficient(*sum, count, gain))
                    .collect()
            };
            fill(self.shading.white_plane_mut(channel), &values);
        }
        if !color {
            self.shading.replicate_white(0);
        }
        debug!(first = ?self.shading.white().first(), "white shading");
        self.save_and_project_shading()
    }
}

/// Copy as much of `src` into `dst` as fits.
pub(super) fn fill(dst: &mut [u16], src: &[u16]) {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src[..len]);
}
