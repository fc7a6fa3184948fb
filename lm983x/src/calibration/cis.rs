// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Calibration of CIS sensors.
//!
//! CIS devices have LEDs instead of a lamp, so besides the AFE gain and offset the LED on-time of
//! each color is searched as well. All three searches are bisections between a low and a high
//! bound, stopping once the reading falls into the target window or the bounds meet.
use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use tracing::{debug, info, trace, warn};

use super::ccd::fill;
use super::{CalibrationSession, CalibrationState, StripState, MAX_GAIN_LOOPS};
use crate::device::{DataType, Workarounds};
use crate::error::Error;
use crate::geometry::{ladder_resolution, Phase};
use crate::register::address;
use crate::shading::{average_lines, dark_plane, DarkProfile};
use crate::transport::Scanner;

/// Readings in this window are close enough to the white target.
const WHITE_WINDOW: core::ops::Range<u32> = 53441..61440;

/// Above this a reading counts as too bright.
const WHITE_HIGH: u32 = 57440;

/// The longest LED on-time the lamp registers hold.
const MAX_LAMP_OFF: u32 = 0x3fff;

/// The gain the AFE starts from while the LEDs are tuned, and the most it is raised to when an
/// LED runs out of on-time.
const LAMP_SEARCH_GAIN: u8 = 0x0a;
const MAX_LAMP_SEARCH_GAIN: u8 = 0x0f;

/// Lowest resolution worth calibrating on the ladder.
const MIN_LADDER_DPI: u32 = 50;

/// The state of one bisection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Bracket<T> {
    low: T,
    now: T,
    high: T,
}

/// The result of one bisection step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Step {
    Done,
    Again,
    /// The LED is already on for as long as it can be.
    Saturated,
}

impl Bracket<u32> {
    /// Narrow an LED off time towards a white reading of `value`.
    fn lamp_step(&mut self, value: u32) -> Step {
        if WHITE_WINDOW.contains(&value) {
            return Step::Done;
        }
        if value >= WHITE_HIGH {
            self.high = self.now;
            self.now = (self.now + self.low) / 2;
        } else {
            self.low = self.now;
            self.now = (self.now * 2).min((self.now + self.high) / 2);
            if self.now > MAX_LAMP_OFF {
                self.now = MAX_LAMP_OFF;
                return Step::Saturated;
            }
        }
        self.step_result()
    }

    /// Narrow a gain register towards a white reading of `value`.
    fn gain_step(&mut self, value: u32) -> Step {
        if WHITE_WINDOW.contains(&value) {
            return Step::Done;
        }
        if value > WHITE_HIGH {
            self.high = self.now;
            self.now = (self.now + self.low) / 2;
        } else {
            self.low = self.now;
            self.now = (self.now + self.high) / 2;
        }
        self.step_result()
    }

    fn step_result(&self) -> Step {
        if self.low + 1 >= self.high {
            Step::Done
        } else {
            Step::Again
        }
    }
}

/// Offset search for one channel: a coarse pass on the average black level, then, if asked for,
/// a pass that backs off while too many pixels clip at zero.
#[derive(Clone, Copy, Debug)]
struct OffsetSearch {
    bracket: Bracket<i32>,
    coarse: bool,
}

impl OffsetSearch {
    fn new() -> Self {
        Self {
            bracket: Bracket {
                low: -32,
                now: 0,
                high: 31,
            },
            coarse: true,
        }
    }

    fn register(&self) -> u8 {
        (self.bracket.now & 0x3f) as u8
    }

    /// One step, given the average black `level` and the share of zero samples in percent.
    fn step(&mut self, level: u32, zero_percent: u32, chase_zeros: bool) -> bool {
        let b = &mut self.bracket;
        if self.coarse {
            if level <= 16 {
                b.low = b.now;
                b.now = (b.now + b.high) / 2;
                return b.low + 1 < b.high;
            }
            if level >= 2048 {
                b.high = b.now;
                b.now = (b.now + b.low) / 2;
                return b.low + 1 < b.high;
            }
        }
        if !chase_zeros {
            return false;
        }
        if zero_percent > 1 {
            b.high = b.now;
            b.now = (b.now + b.low) / 2;
            self.coarse = false;
            return b.low + 1 < b.high;
        }
        false
    }
}

/// The white shading coefficient of a CIS pixel: `sum` over `lines` brought up to full scale,
/// scaled by the software gain in per mille.
fn cis_white_coefficient(sum: u64, lines: u64, software_gain: u32) -> u16 {
    let target = 65535 * 1000 / u64::from(software_gain.max(1));
    (target * 16384 * lines / sum.max(1)).min(65535) as u16
}

impl<S, D> CalibrationSession<S, D>
where
    S: Scanner,
    S::Error: Debug,
    D: DelayMs<u32>,
{
    /// Calibrate a CIS device.
    ///
    /// The skip workarounds are lifted for the duration, CIS devices are always fully calibrated
    /// when a quality scan asks for it.
    pub(super) fn calibrate_cis(&mut self) -> Result<(), Error<S::Error>> {
        if self.is_plustek_motor() {
            return Err(Error::CalibrationFailed("CIS calibration needs a Canon motor"));
        }
        let saved = self.profile.caps.workarounds;
        let workarounds = &mut self.profile.caps.workarounds;
        workarounds.remove(Workarounds::SKIP_WHITEFINE);
        workarounds.remove(Workarounds::SKIP_FINE);
        workarounds.remove(Workarounds::BYPASS_CALIBRATION);
        let result = self.run_cis_calibration();
        let bypass_shading = self
            .profile
            .caps
            .workarounds
            .contains(Workarounds::BYPASS_CALIBRATION);
        self.profile.caps.workarounds = saved;
        if bypass_shading {
            self.profile
                .caps
                .workarounds
                .insert(Workarounds::BYPASS_CALIBRATION);
        }
        result
    }

    fn run_cis_calibration(&mut self) -> Result<(), Error<S::Error>> {
        let sheet_fed = self.profile.caps.is_sheet_fed();
        if !self.caching() && !sheet_fed {
            self.speed_test()?;
        }
        self.warm_up()?;
        self.strip_state = StripState::NotReady;
        self.prepare_calibration()?;
        self.set_session_mclk();

        if !self.skip_coarse {
            self.prepare_white_strip(true)?;
            self.regs.set_motor_enabled(false);
            self.adjust_lightsource()?;
            self.prepare_black_strip()?;
            self.adjust_cis_offset()?;
            self.prepare_white_strip(false)?;
            self.adjust_cis_gain()?;
        } else {
            self.strip_state = StripState::WhiteLampOn;
        }

        let mut skip_fine = false;
        let mut ladder_end = 2;
        if self.caching() || sheet_fed {
            skip_fine = self.fine_shading_from_cache()?;
            if self.in_calibration_mode() {
                ladder_end = 9;
                skip_fine = self.setup.param.bit_depth != 8;
            }
            if sheet_fed && !skip_fine {
                debug!("no cached shading for the sheet feeder, bypassing it");
                skip_fine = true;
                self.profile
                    .caps
                    .workarounds
                    .insert(Workarounds::BYPASS_CALIBRATION);
            }
        }

        if skip_fine {
            self.regs.set_motor_enabled(true);
            self.strip_state = StripState::LampOff;
        } else {
            let optic_x = self.profile.caps.optic_dpi.x;
            let shading_y = self.profile.caps.source(self.setup.param.source).shading_origin_y;
            for idx in 1..ladder_end {
                let cal_dpi = if self.in_calibration_mode() {
                    let dpi = ladder_resolution(optic_x, idx);
                    if dpi < MIN_LADDER_DPI {
                        continue;
                    }
                    dpi
                } else {
                    0
                };
                self.prepare_black_strip()?;
                self.regs.set_motor_enabled(true);
                self.cis_dark_shading(cal_dpi)?;
                self.prepare_white_strip(false)?;
                if !sheet_fed {
                    self.move_home()?;
                    self.move_to_strip(shading_y)?;
                }
                self.cis_white_shading(cal_dpi)?;
                self.strip_state = StripState::NotReady;
            }
        }

        self.lamp_on_after_calibration()?;
        self.strip_state = StripState::NotReady;
        if !sheet_fed {
            self.move_home()?;
        }
        info!(
            lamp = ?self.profile.hw.lamp,
            gains = ?self.regs.range(address::AFE_GAIN, 3),
            offsets = ?self.regs.range(address::AFE_OFFSET, 3),
            "CIS calibrated"
        );
        Ok(())
    }

    /// Get to the white strip with the LEDs on. `to_shading` moves a sheet feeder to its
    /// shading position as well.
    fn prepare_white_strip(&mut self, to_shading: bool) -> Result<(), Error<S::Error>> {
        match self.strip_state {
            StripState::NotReady => {
                let sheet_fed = self.profile.caps.is_sheet_fed();
                if !sheet_fed {
                    self.move_home().map_err(|err| {
                        if err.is_cancelled() {
                            err
                        } else {
                            warn!(%err, "could not return home");
                            Error::CalibrationFailed("lamp not in position")
                        }
                    })?;
                }
                if !sheet_fed || to_shading {
                    let source = self.setup.param.source;
                    let shading_y = self.profile.caps.source(source).shading_origin_y;
                    self.move_to_strip(shading_y)?;
                }
            }
            StripState::LampOff => self.switch_lamp(true)?,
            StripState::WhiteLampOn => {}
        }
        self.strip_state = StripState::WhiteLampOn;
        Ok(())
    }

    /// Get to the dark strip, or switch the LEDs off if there is none.
    fn prepare_black_strip(&mut self) -> Result<(), Error<S::Error>> {
        if self.strip_state == StripState::NotReady {
            self.prepare_white_strip(false)?;
        }
        if self.strip_state == StripState::LampOff {
            return Ok(());
        }
        let source = *self.profile.caps.source(self.setup.param.source);
        if source.has_dark_strip() {
            if !self.profile.caps.is_sheet_fed() {
                self.move_home()?;
            }
            self.move_to_strip(source.dark_shading_origin_y)?;
            self.regs.set_motor_enabled(false);
            self.strip_state = StripState::NotReady;
        } else {
            self.switch_lamp(false)?;
            self.strip_state = StripState::LampOff;
        }
        Ok(())
    }

    fn lamp_on_after_calibration(&mut self) -> Result<(), Error<S::Error>> {
        if self.strip_state == StripState::LampOff {
            self.switch_lamp(true)?;
            self.strip_state = StripState::WhiteLampOn;
        }
        Ok(())
    }

    /// Set up a one line strip over the whole sensor for the coarse searches.
    fn coarse_strip(&mut self, phase: Phase, first_pixel: u32) {
        let optic_x = self.profile.caps.optic_dpi.x;
        self.strip.size.lines = 1;
        self.strip.size.pixels = self.profile.caps.normal.size.x * optic_x / 300;
        self.strip.origin.x = first_pixel * 300 / optic_x;
        self.strip.phase = phase;
    }

    /// Tune how long each LED is on, so white lands in the target window at a low gain.
    fn adjust_lightsource(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        if self.adjustments.lamp_off.is_some() {
            debug!("using fixed lamp settings");
            return Ok(());
        }
        self.state = CalibrationState::CoarseGain;
        self.coarse_strip(Phase::Gain, u32::from(self.profile.hw.active_pixels_start));
        let mut brackets = [0, 1, 2].map(|channel| Bracket {
            low: u32::from(self.profile.hw.lamp.on(channel)),
            now: u32::from(self.profile.hw.lamp.off(channel)),
            high: MAX_LAMP_OFF,
        });
        self.regs.set_all_gains(LAMP_SEARCH_GAIN);
        let channels: &[usize] = if self.setup.param.data_type == DataType::Color {
            &[0, 1, 2]
        } else {
            &[1]
        };

        for round in 1.. {
            let data = self.scan_line()?;
            let layout = self.strip_layout();
            let peaks = layout.block_peaks(&data, 0, layout.pixels, 10);
            let mut steps = [Step::Done; 3];
            for &channel in channels {
                let peak = if channels.len() == 1 { peaks[0] } else { peaks[channel] };
                steps[channel] = brackets[channel].lamp_step(u32::from(peak));
                self.profile
                    .hw
                    .lamp
                    .set_off(channel, brackets[channel].now as u16);
            }
            trace!(?peaks, ?steps, lamp = ?self.profile.hw.lamp, "lamp round");
            let active = channels.iter().map(|channel| steps[*channel]);
            if active.clone().all(|step| step == Step::Done)
                || active.clone().all(|step| step == Step::Saturated)
            {
                break;
            }
            for &channel in channels {
                let gain = self.regs.afe_gain(channel);
                if steps[channel] == Step::Saturated && gain < MAX_LAMP_SEARCH_GAIN {
                    self.regs.set_afe_gain(channel, gain + 1);
                }
            }
            if round >= MAX_GAIN_LOOPS {
                warn!("LED search did not settle");
                break;
            }
            self.apply_lamp_timing()?;
        }
        self.apply_lamp_timing()?;
        debug!(lamp = ?self.profile.hw.lamp, "LEDs adjusted");
        Ok(())
    }

    /// Bisect the AFE gains for a white reading in the target window.
    fn adjust_cis_gain(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::CoarseGain;
        if !self.in_calibration_mode() && self.apply_fixed_gains() {
            debug!("using fixed gains");
            return Ok(());
        }
        self.coarse_strip(Phase::Gain, u32::from(self.profile.hw.active_pixels_start));
        let color = self.setup.param.data_type == DataType::Color;
        let mut brackets = [0, 1, 2].map(|channel| Bracket {
            low: 1,
            now: u32::from(self.regs.afe_gain(channel)),
            high: 0x3f,
        });
        for round in 1.. {
            let data = self.scan_line()?;
            let layout = self.strip_layout();
            let again = if color {
                let peaks = layout.block_peaks(&data, 0, layout.pixels, 10);
                let mut again = false;
                for (channel, bracket) in brackets.iter_mut().enumerate() {
                    again |= bracket.gain_step(u32::from(peaks[channel])) == Step::Again;
                    self.regs.set_afe_gain(channel, bracket.now as u8);
                }
                trace!(?peaks, "gain round");
                again
            } else {
                let peak = (0..layout.pixels)
                    .map(|x| layout.sample(&data, 0, 0, x))
                    .max()
                    .unwrap_or(0);
                let again = brackets[1].gain_step(u32::from(peak)) == Step::Again;
                self.regs.set_all_gains(brackets[1].now as u8);
                trace!(peak, "gain round");
                again
            };
            if !again {
                break;
            }
            if round >= MAX_GAIN_LOOPS {
                warn!("gain search did not settle");
                break;
            }
        }
        debug!(gains = ?self.regs.range(address::AFE_GAIN, 3), "coarse gain");
        Ok(())
    }

    /// Bisect the AFE offsets on the dark strip (or with the LEDs off).
    fn adjust_cis_offset(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::CoarseOffset;
        if self.apply_fixed_offsets() {
            debug!("using fixed offsets");
            return Ok(());
        }
        self.coarse_strip(Phase::Offset, u32::from(self.profile.hw.optic_black_start));
        self.strip.mclk = self.mclk;
        self.regs.set_all_offsets(0);
        self.set_scan_parameters()?;

        let color = self.setup.param.data_type == DataType::Color;
        let channels = if color { 3 } else { 1 };
        let chase_zeros = self
            .profile
            .caps
            .workarounds
            .contains(Workarounds::INC_DARKTGT);
        let mut searches = [OffsetSearch::new(); 3];
        for round in 1.. {
            let data = self.read_strip(self.strip.size.phy_bytes)?;
            let layout = self.strip_layout();
            let pixels = layout.pixels.max(1);
            let mut again = false;
            for (channel, search) in searches.iter_mut().enumerate().take(channels) {
                let samples = (0..pixels).map(|x| layout.sample(&data, 0, channel, x));
                let sum: u32 = samples.clone().map(u32::from).sum();
                let zeros = samples.filter(|sample| *sample == 0).count();
                let level = sum / pixels as u32;
                let zero_percent = (zeros * 100 / pixels) as u32;
                again |= search.step(level, zero_percent, chase_zeros);
                trace!(channel, level, zero_percent, offset = search.bracket.now, "offset round");
                self.regs.set_afe_offset(channel, search.register());
            }
            if !color {
                self.regs.set_all_offsets(searches[0].register());
            }
            self.write_registers(address::AFE_OFFSET, 3)?;
            if !again {
                break;
            }
            if round >= MAX_GAIN_LOOPS {
                warn!("offset search did not settle");
                break;
            }
        }
        debug!(offsets = ?self.regs.range(address::AFE_OFFSET, 3), "coarse offset");
        Ok(())
    }

    fn cis_dark_shading(&mut self, cal_dpi: u32) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::FineDark;
        self.prepare_fine_calibration(cal_dpi, Phase::DarkShading);
        let data = self.scan_fine_strip()?;
        let layout = self.strip_layout();
        if self.setup.param.data_type == DataType::Color {
            for channel in 0..3 {
                let averages = average_lines(&layout.plane(&data, channel), layout.pixels);
                let offset = self.tuning.offset[channel];
                let plane = dark_plane(&averages, DarkProfile::PerPixel, offset);
                fill(self.shading.dark_plane_mut(channel), &plane);
            }
        } else {
            let averages = average_lines(&layout.plane(&data, 0), layout.pixels);
            let plane = dark_plane(&averages, DarkProfile::PerPixel, self.tuning.offset[0]);
            fill(self.shading.dark_plane_mut(0), &plane);
            self.shading.replicate_dark(0);
        }
        debug!(cal_dpi, first = ?self.shading.dark().first(), "dark shading");
        Ok(())
    }

    fn cis_white_shading(&mut self, cal_dpi: u32) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.state = CalibrationState::FineWhite;
        self.prepare_fine_calibration(cal_dpi, Phase::WhiteShading);
        let data = self.scan_fine_strip()?;
        let layout = self.strip_layout();
        let lines = layout.lines(&data) as u64;
        let color = self.setup.param.data_type == DataType::Color;
        let channels = if color { 3 } else { 1 };
        for channel in 0..channels {
            let mut sums = vec![0u64; layout.pixels];
            for line in 0..lines as usize {
                for (x, sum) in sums.iter_mut().enumerate() {
                    *sum += u64::from(layout.sample(&data, line, channel, x));
                }
            }
            let gain = self.tuning.gain[channel];
            let coefficients: Vec<u16> = sums
                .iter()
                .map(|sum| cis_white_coefficient(*sum, lines, gain))
                .collect();
            fill(self.shading.white_plane_mut(channel), &coefficients);
        }
        if !color {
            self.shading.replicate_white(0);
        }
        debug!(cal_dpi, first = ?self.shading.white().first(), "white shading");
        self.save_and_project_shading()
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{request, session};
    use super::*;
    use crate::device::{Adjustments, DeviceProfile, ImageType};
    use crate::transport::LampSelect;

    #[test]
    fn lamp_bisection() {
        let mut lamp = Bracket {
            low: 50,
            now: 5600,
            high: MAX_LAMP_OFF,
        };
        // Clipping: halve the on-time.
        assert_eq!(lamp.lamp_step(65535), Step::Again);
        assert_eq!(lamp, Bracket { low: 50, now: 2825, high: 5600 });
        // Too dark: grow it again, but not past the last bright setting.
        assert_eq!(lamp.lamp_step(38000), Step::Again);
        assert_eq!(lamp.now, 4212);
        assert_eq!(lamp.lamp_step(55000), Step::Done);

        let mut dim = Bracket {
            low: 50,
            now: 0x3000,
            high: 0x8000,
        };
        assert_eq!(dim.lamp_step(1000), Step::Saturated);
        assert_eq!(dim.now, MAX_LAMP_OFF);
    }

    #[test]
    fn gain_bisection() {
        let mut gain = Bracket {
            low: 1,
            now: 10,
            high: 0x3f,
        };
        assert_eq!(gain.gain_step(30000), Step::Again);
        assert_eq!(gain.now, 36);
        assert_eq!(gain.gain_step(65000), Step::Again);
        assert_eq!(gain, Bracket { low: 10, now: 23, high: 36 });
        assert_eq!(gain.gain_step(60000), Step::Done);
    }

    #[test]
    fn offset_bisection() {
        let mut search = OffsetSearch::new();
        // Clipped at zero: raise the offset.
        assert!(search.step(0, 100, false));
        assert_eq!(search.bracket.now, 15);
        // Far too high: back off.
        assert!(search.step(3000, 0, false));
        assert_eq!(search.bracket.now, 7);
        // In between, and not chasing clipped pixels: done.
        assert!(!search.step(500, 5, false));
        // Chasing them backs off further, then stays off the coarse pass.
        assert!(search.step(500, 5, true));
        assert_eq!(search.bracket.now, 3);
        assert!(!search.coarse);
        assert_eq!(OffsetSearch::new().register(), 0);
    }

    #[test]
    fn white_coefficients() {
        assert_eq!(cis_white_coefficient(64 * 16384, 64, 1000), 65535);
        assert_eq!(cis_white_coefficient(64 * 32768, 64, 1000), 32767);
        assert_eq!(cis_white_coefficient(0, 64, 1000), 65535);
    }

    #[test]
    fn lide25_color_calibration() {
        let (mut session, scanner, _) = session(
            DeviceProfile::canon_lide25(),
            Adjustments::default(),
            &request(ImageType::Color48, 300),
        );
        session.calibrate().unwrap();
        assert_eq!(session.state(), CalibrationState::Done);
        assert_eq!(session.strip_state, StripState::NotReady);

        let lamp = session.profile().hw.lamp;
        assert_ne!(lamp.off(0), 5600);
        assert!(lamp.off(0) > lamp.on(0));
        let regs = session.registers();
        for channel in 0..3 {
            let gain = regs.afe_gain(channel);
            assert!((1..=0x3f).contains(&gain));
        }
        assert_eq!(regs[address::LAMP_TIMING + 2], (lamp.off(0) >> 8) as u8);

        let shading = session.shading();
        assert_eq!(shading.pixels(), session.setup().param.size.phy_pixels as usize);
        assert!(shading.white().iter().all(|v| *v > 0));
        assert_eq!(scanner.position(), 0);
        assert_eq!(scanner.lamp(), Some(LampSelect::Normal));
        assert_eq!(scanner.register(address::LAMP_MODE), 2);
    }

    #[test]
    fn lide25_gray_uses_green() {
        let (mut session, _, _) = session(
            DeviceProfile::canon_lide25(),
            Adjustments::default(),
            &request(ImageType::Gray16, 300),
        );
        session.calibrate().unwrap();
        let lamp = session.profile().hw.lamp;
        // Red and blue stay dark in gray mode.
        assert_eq!(lamp.off(0), 0);
        assert_ne!(lamp.off(1), 3700);
        let gains = session.registers().range(address::AFE_GAIN, 3);
        assert!(gains.iter().all(|gain| *gain == gains[0]));
        assert_eq!(session.shading().white_plane(0), session.shading().white_plane(2));
    }

    #[test]
    fn fixed_lamp_skips_led_search() {
        let (mut session, _, _) = session(
            DeviceProfile::canon_lide25(),
            Adjustments {
                lamp_off: Some([3000, 3100, 3200]),
                ..Adjustments::default()
            },
            &request(ImageType::Color48, 300),
        );
        session.calibrate().unwrap();
        let lamp = session.profile().hw.lamp;
        assert_eq!([lamp.off(0), lamp.off(1), lamp.off(2)], [3000, 3100, 3200]);
    }

    #[test]
    fn plustek_motor_is_rejected() {
        let mut profile = DeviceProfile::canon_lide25();
        profile.hw.motor_model = crate::device::MotorModel::KaoHsiung;
        let (mut session, _, _) = session(
            profile,
            Adjustments::default(),
            &request(ImageType::Color48, 300),
        );
        assert!(matches!(
            session.calibrate(),
            Err(Error::CalibrationFailed(_))
        ));
    }
}
