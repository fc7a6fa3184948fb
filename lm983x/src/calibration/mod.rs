// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Coarse and fine calibration of the analog front end.
//!
//! Before a quality scan the front end (AFE) gain and offset registers are searched so the white
//! reference lands just under full scale and the black reference just above zero. This is the
//! *coarse* calibration. The *fine* calibration then captures per-pixel dark and white levels,
//! which the ASIC applies while scanning through its shading tables.
//!
//! All of the state this needs lives in a [`CalibrationSession`], which owns the scanner for the
//! duration of one scan. CCD sensors are calibrated by one family of routines, CIS sensors by a
//! bisection based one, and both share the strip handling, lamp switching and carriage moves
//! defined here.
use core::fmt::Debug;
use std::time::Duration;

use embedded_hal::blocking::delay::DelayMs;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheKey, CalibrationCache, CoarseCalibration};
use crate::cancel::{CancelToken, Deadline};
use crate::device::{
    Adjustments, CcdId, Chip, DataType, DeviceFlags, DeviceProfile, MotorModel, ScanSource,
    Workarounds, CRYSTAL_FREQ,
};
use crate::error::Error;
use crate::geometry::{
    horizontal_divider, ImageRequest, Phase, Plan, Planner, ScanFlags, ScanParam, ScanSetup,
    DEFAULT_TRANSFER_RATE,
};
use crate::register::{address, RegisterSet};
use crate::shading::{
    download_plane, ordered_planes, set_shading_mode, ShadingMode, ShadingTable, Table,
};
use crate::transport::{LampSelect, MoveDirection, Scanner, TransportResult};
use crate::tuning::{self, sensor_tuning, SensorTuning, TuningKey};
use crate::util::be_samples;

mod ccd;
mod cis;
mod warmup;

pub use ccd::new_gain;

/// The coarse gain target for reflective scans.
pub const IDEAL_GAIN_NORMAL: u32 = 0xf000;

/// The coarse gain target for positive film and the feeder.
pub const IDEAL_GAIN_POSITIVE: u32 = 0xfe00;

/// The black level the coarse offset search aims for.
pub const IDEAL_OFFSET: u32 = 0x1000;

/// Upper bound for the coarse gain and lamp loops.
const MAX_GAIN_LOOPS: usize = 10;

/// How long the ASIC may take to put scan data into its DRAM.
const DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack on top of the rated travel time of a carriage move.
const MOTION_MARGIN: Duration = Duration::from_secs(5);

const POLL_INTERVAL_MS: u32 = 10;

/// Where a session is in its calibration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalibrationState {
    Idle,
    CoarseGain,
    CoarseOffset,
    FineDark,
    FineWhite,
    /// Calibration finished, the shading tables are valid for the session's scan.
    Done,
    /// Calibration was skipped, fixed defaults are in use.
    Bypassed,
    /// A transport, motion or precondition failure stopped calibration. The shading tables must
    /// not be used.
    Failed,
    Cancelled,
}

/// What the carriage and lamp of a CIS device are currently set up to read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StripState {
    NotReady,
    /// At the white shading position, lamp on.
    WhiteLampOn,
    /// Lamp switched off for a dark reading.
    LampOff,
}

/// How 16-bit samples of a calibration strip are laid out in each line.
#[derive(Clone, Copy, Debug)]
struct StripLayout {
    pixels: usize,
    /// Samples per line, including status words.
    line_len: usize,
    kind: LayoutKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LayoutKind {
    /// Red, green and blue of a pixel next to each other.
    Interleaved,
    /// One plane per color, each followed by a status word.
    Planar,
    Mono,
}

impl StripLayout {
    fn new(param: &ScanParam, cis: bool) -> Self {
        let kind = match (param.data_type, cis) {
            (DataType::Color, true) => LayoutKind::Planar,
            (DataType::Color, false) => LayoutKind::Interleaved,
            _ => LayoutKind::Mono,
        };
        Self {
            pixels: param.size.phy_pixels as usize,
            line_len: (param.size.phy_bytes / 2).max(1) as usize,
            kind,
        }
    }

    fn lines(&self, data: &[u16]) -> usize {
        data.len() / self.line_len
    }

    fn sample(&self, data: &[u16], line: usize, channel: usize, x: usize) -> u16 {
        let base = line * self.line_len;
        let idx = match self.kind {
            LayoutKind::Interleaved => base + x * 3 + channel,
            LayoutKind::Planar => base + channel * (self.pixels + 1) + x,
            LayoutKind::Mono => base + x,
        };
        data.get(idx).copied().unwrap_or(0)
    }

    /// One channel of every line, line after line.
    fn plane(&self, data: &[u16], channel: usize) -> Vec<u16> {
        let lines = self.lines(data);
        let mut plane = Vec::with_capacity(lines * self.pixels);
        for line in 0..lines {
            plane.extend((0..self.pixels).map(|x| self.sample(data, line, channel, x)));
        }
        plane
    }

    /// The brightest `block`-pixel average of each channel in line 0, over `start..end`.
    ///
    /// Mono strips report the same value for all three channels.
    fn block_peaks(&self, data: &[u16], start: usize, end: usize, block: usize) -> [u16; 3] {
        let mut peaks = [0u16; 3];
        let blocks = end.saturating_sub(start) / block.max(1);
        for first in (0..blocks).map(|idx| start + idx * block) {
            for (channel, peak) in peaks.iter_mut().enumerate() {
                let sum: u32 = (first..first + block)
                    .map(|x| u32::from(self.sample(data, 0, channel, x)))
                    .sum();
                *peak = (*peak).max((sum / block as u32) as u16);
            }
        }
        peaks
    }
}

/// Calibration (and the start of the scan that follows it) for one scan request.
///
/// The session owns the scanner and a delay provider until [`CalibrationSession::release`] is
/// called. It is single-use: a new request gets a new session, though the calibration cache can
/// carry results from one session to the next.
#[derive(Debug)]
pub struct CalibrationSession<S, D> {
    scanner: S,
    delay: D,

    /// The device description, with the caller's adjustments folded in.
    profile: DeviceProfile,
    adjustments: Adjustments,
    regs: RegisterSet,

    /// The scan this session is calibrating for.
    setup: ScanSetup,

    /// The strip currently being read, during calibration.
    strip: ScanParam,

    shading: ShadingTable,
    cache: CalibrationCache,
    tuning: SensorTuning,
    cancel: CancelToken,

    /// Measured USB throughput, in bytes per second.
    transfer_rate: u32,
    max_ita: u8,
    ideal_gain: u32,

    /// The master clock divider calibration strips are read at.
    mclk: f64,

    /// Coarse calibration came out of the cache (or is not wanted).
    skip_coarse: bool,
    bypassed: bool,
    state: CalibrationState,
    strip_state: StripState,
}

impl<S, D> CalibrationSession<S, D>
where
    S: Scanner,
    S::Error: Debug,
    D: DelayMs<u32>,
{
    /// Prepare a session for `request`.
    ///
    /// Nothing is sent to the scanner yet. The request is planned once here to find the physical
    /// resolution and line width the shading tables have to cover.
    pub fn new(
        scanner: S,
        delay: D,
        profile: DeviceProfile,
        adjustments: Adjustments,
        request: &ImageRequest,
        cancel: CancelToken,
    ) -> Self {
        let mut profile = profile;
        profile.apply(&adjustments);
        let mut setup = ScanParam::from_request(&profile, request, &adjustments);
        profile.select_illumination(setup.param.data_type, &adjustments);

        let mut scratch = RegisterSet::from_hardware(&profile.hw);
        Planner::new(&profile).plan(&mut scratch, &mut setup.param);

        let param = &setup.param;
        let tuning = sensor_tuning(&TuningKey {
            ccd: profile.caps.ccd,
            pcb: profile.caps.pcb,
            chip: profile.hw.chip,
            motor: profile.hw.motor_model,
            source: param.source,
            data_type: param.data_type,
            bit_depth: param.bit_depth,
            phy_dpi_x: param.phy_dpi.x,
        });
        debug!(
            device = profile.name,
            phy_dpi = ?param.phy_dpi,
            phy_pixels = param.size.phy_pixels,
            ?tuning,
            "new calibration session"
        );
        let ideal_gain = if param.source == ScanSource::Adf {
            IDEAL_GAIN_POSITIVE
        } else {
            IDEAL_GAIN_NORMAL
        };
        let mut cache = CalibrationCache::from_adjustments(&adjustments);
        cache.set_calibration_mode(adjustments.calibration_mode);
        Self {
            scanner,
            delay,
            regs: RegisterSet::from_hardware(&profile.hw),
            shading: ShadingTable::new(param.size.phy_pixels as usize),
            strip: *param,
            mclk: param.mclk,
            setup,
            cache,
            tuning,
            cancel,
            transfer_rate: DEFAULT_TRANSFER_RATE,
            max_ita: 0xff,
            ideal_gain,
            skip_coarse: false,
            bypassed: false,
            state: CalibrationState::Idle,
            strip_state: StripState::NotReady,
            profile,
            adjustments,
        }
    }

    /// Calibrate for the session's scan. Calling it again once calibrated does nothing.
    pub fn calibrate(&mut self) -> Result<(), Error<S::Error>> {
        if self.is_calibrated() {
            return Ok(());
        }
        let result = self.run_calibration();
        if let Err(err) = &result {
            self.state = if err.is_cancelled() {
                CalibrationState::Cancelled
            } else {
                CalibrationState::Failed
            };
            warn!(%err, "calibration stopped");
        }
        result
    }

    fn run_calibration(&mut self) -> Result<(), Error<S::Error>> {
        let quality = self.setup.flags.contains(ScanFlags::QUALITY);
        let bypass = !quality
            || (!self.profile.is_cis()
                && self
                    .profile
                    .caps
                    .workarounds
                    .contains(Workarounds::BYPASS_CALIBRATION));
        info!(
            device = self.profile.name,
            source = ?self.setup.param.source,
            bypass,
            "calibrating"
        );
        if self.profile.is_cis() && !bypass {
            self.calibrate_cis()?;
        } else {
            self.calibrate_ccd(bypass)?;
        }
        if self.caching() && !self.skip_coarse && !self.bypassed {
            let coarse = CoarseCalibration::from_registers(&self.regs);
            self.cache.save_coarse(&self.cache_key(), &coarse)?;
        }
        self.state = if self.bypassed {
            CalibrationState::Bypassed
        } else {
            CalibrationState::Done
        };
        info!(state = ?self.state, "calibration finished");
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::Done | CalibrationState::Bypassed
        )
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// The shading tables, sized for the session's scan.
    pub fn shading(&self) -> &ShadingTable {
        &self.shading
    }

    pub fn registers(&self) -> &RegisterSet {
        &self.regs
    }

    /// The planned scan. The physical sizes are final once [`CalibrationSession::start_scan`]
    /// has run.
    pub fn setup(&self) -> &ScanSetup {
        &self.setup
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The USB throughput measured during calibration, in bytes per second.
    pub fn transfer_rate(&self) -> u32 {
        self.transfer_rate
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Program the calibrated scan and start it.
    ///
    /// Calibration is run first if it hasn't been. The returned [`Plan`] tells the image reader
    /// how many lines to skip and how the color rows are spaced.
    pub fn start_scan(&mut self) -> Result<Plan, Error<S::Error>> {
        self.calibrate()?;
        self.strip = self.setup.param;
        self.strip.phase = Phase::Scan;
        let plan = self.set_scan_parameters()?;
        self.setup.param = self.strip;
        if self.shading.pixels() != self.setup.param.size.phy_pixels as usize && !self.bypassed {
            self.shading.fit(self.setup.param.size.phy_pixels as usize);
        }
        self.begin_strip()?;
        info!(
            phy_lines = self.setup.param.size.phy_lines,
            total_bytes = self.setup.param.size.total_bytes,
            "scan started"
        );
        Ok(plan)
    }

    /// Read the next `buf.len()` bytes of a running scan.
    pub fn read_scan_data(&mut self, buf: &mut [u8]) -> Result<(), Error<S::Error>> {
        self.wait_for_data()?;
        self.scanner.read_raw(buf).transport()
    }

    /// Change the DRAM pause limit of a running scan, in KiB.
    pub fn set_pause_limit(&mut self, limit: u8) -> Result<(), Error<S::Error>> {
        self.regs[address::PAUSE_LIMIT] = limit;
        self.regs[address::RESUME_LIMIT] = 1;
        self.write_registers(address::PAUSE_LIMIT, 2)
    }

    /// Stop the scan, and return the carriage unless the request asked for it to stay.
    pub fn finish_scan(&mut self) -> Result<(), Error<S::Error>> {
        self.scanner.end_scan().transport()?;
        if !self.setup.flags.contains(ScanFlags::STILL_MODULE) {
            self.move_home()?;
        }
        Ok(())
    }

    /// Hand the scanner and delay back.
    pub fn release(self) -> (S, D) {
        (self.scanner, self.delay)
    }

    fn caching(&self) -> bool {
        self.adjustments.cache_calibration
    }

    fn in_calibration_mode(&self) -> bool {
        self.adjustments.calibration_mode
    }

    fn cache_key(&self) -> CacheKey {
        let param = &self.setup.param;
        CacheKey {
            source: param.source,
            data_type: param.data_type,
            bit_depth: param.bit_depth,
        }
    }

    fn is_plustek_motor(&self) -> bool {
        self.profile.hw.motor_model.is_plustek()
    }

    fn lamp_select(&self) -> LampSelect {
        if self.setup.param.source.is_film() {
            LampSelect::Tpa
        } else {
            LampSelect::Normal
        }
    }

    /// The master clock the motor table gives for `param`.
    fn table_mclk(&self, param: &ScanParam) -> f64 {
        tuning::motor(self.profile.hw.motor_model).mclk(
            param.data_type,
            param.bit_depth,
            param.phy_dpi.y,
        )
    }

    /// Use the table master clock of the session's scan for calibration, too.
    fn set_session_mclk(&mut self) {
        self.mclk = self.table_mclk(&self.setup.param);
        self.setup.param.mclk = self.mclk;
    }

    /// Set both the session's master clock and the one calibration runs at.
    fn set_mclk_pair(&mut self, session: f64, calibration: f64) {
        self.setup.param.mclk = session;
        self.mclk = calibration;
    }

    fn write_registers(&mut self, first: u8, count: usize) -> Result<(), Error<S::Error>> {
        self.scanner
            .write(first, self.regs.range(first, count))
            .transport()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Plan the current strip and write every register it depends on.
    fn set_scan_parameters(&mut self) -> Result<Plan, Error<S::Error>> {
        let mut planner = Planner::new(&self.profile);
        planner.set_transfer_rate(self.transfer_rate);
        planner.set_max_ita(self.max_ita);
        let plan = planner.plan(&mut self.regs, &mut self.strip);
        self.write_registers(address::SHADING_SELECT, 3)?;
        self.write_registers(address::MCLK_DIVIDER, 0x78)?;
        Ok(plan)
    }

    /// Start reading the current strip, with the shading mode its phase needs.
    fn begin_strip(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        let feeder_scan = self.strip.phase == Phase::Scan && self.strip.source == ScanSource::Adf;
        self.regs[address::PAPER_SENSE] = if feeder_scan {
            self.profile.hw.reg_58() & !7
        } else {
            0
        };
        self.write_registers(address::PAPER_SENSE, 1)?;
        if self.profile.hw.chip == Chip::Lm9831 {
            self.scanner.clear_data().transport()?;
        }
        self.download_shading(self.strip.phase)?;
        self.scanner.begin_scan().transport()
    }

    fn wait_for_data(&mut self) -> Result<(), Error<S::Error>> {
        let deadline = Deadline::after(DATA_TIMEOUT);
        loop {
            self.cancel.check()?;
            if self.scanner.data_available().transport()? {
                return Ok(());
            }
            if deadline.expired() {
                return Err(Error::DataTimeout);
            }
            self.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// Read one strip of `len` bytes, with the scan already configured.
    fn read_strip(&mut self, len: u32) -> Result<Vec<u16>, Error<S::Error>> {
        self.begin_strip()?;
        let mut buf = vec![0u8; len as usize];
        let read = self
            .wait_for_data()
            .and_then(|_| self.scanner.read_raw(&mut buf).transport());
        let end = self.scanner.end_scan().transport();
        read?;
        end?;
        Ok(be_samples(&buf))
    }

    /// Configure the current strip, then read one line of it.
    fn scan_line(&mut self) -> Result<Vec<u16>, Error<S::Error>> {
        self.strip.mclk = self.mclk;
        self.set_scan_parameters()?;
        self.read_strip(self.strip.size.phy_bytes)
    }

    fn strip_layout(&self) -> StripLayout {
        StripLayout::new(&self.strip, self.profile.is_cis())
    }

    /// Download the shading tables (or set the bypass modes) for a strip or scan in `phase`.
    fn download_shading(&mut self, phase: Phase) -> Result<(), Error<S::Error>> {
        let workarounds = self.profile.caps.workarounds;
        let color = self.setup.param.data_type == DataType::Color;
        let gray_channel = usize::from((self.profile.hw.reg_26 & 0x18) >> 3);
        let mode = match phase {
            Phase::WhiteShading => {
                if color {
                    for channel in 0..3 {
                        download_plane(
                            &mut self.scanner,
                            &mut self.regs,
                            Table::Dark,
                            channel,
                            self.shading.dark_plane(channel),
                        )?;
                    }
                } else {
                    download_plane(
                        &mut self.scanner,
                        &mut self.regs,
                        Table::Dark,
                        gray_channel,
                        self.shading.dark_plane(1),
                    )?;
                }
                ShadingMode::WhiteCapture
            }
            Phase::Scan
                if self.bypassed || workarounds.contains(Workarounds::BYPASS_CALIBRATION) =>
            {
                ShadingMode::Bypass
            }
            Phase::Scan if workarounds.contains(Workarounds::SKIP_FINE) => {
                if self.skip_coarse {
                    self.shading.reset();
                    ShadingMode::SkipFineCleared
                } else {
                    ShadingMode::SkipFine
                }
            }
            Phase::Scan => {
                let dark_only = workarounds.contains(Workarounds::SKIP_WHITEFINE);
                let routes: Vec<(usize, usize)> = if color {
                    ordered_planes(&self.profile.caps, self.setup.param.phy_dpi.x)
                        .iter()
                        .enumerate()
                        .map(|(channel, plane)| (channel, *plane))
                        .collect()
                } else {
                    vec![(gray_channel, 1)]
                };
                for (channel, plane) in routes {
                    download_plane(
                        &mut self.scanner,
                        &mut self.regs,
                        Table::Dark,
                        channel,
                        self.shading.dark_plane(plane),
                    )?;
                    if !dark_only {
                        download_plane(
                            &mut self.scanner,
                            &mut self.regs,
                            Table::White,
                            channel,
                            self.shading.white_plane(plane),
                        )?;
                    }
                }
                if dark_only {
                    ShadingMode::ScanDarkOnly
                } else {
                    ShadingMode::Scan
                }
            }
            _ => ShadingMode::Calibration,
        };
        trace!(?phase, ?mode, "shading mode");
        let (first, count) = set_shading_mode(&mut self.regs, mode, self.profile.hw.dram_size);
        if mode == ShadingMode::Bypass {
            self.write_registers(address::SHADING_SELECT, 1)?;
        }
        self.write_registers(first, count)
    }

    /// Reset the front end and shading for a calibration run, restoring cached coarse results
    /// where there are some.
    fn prepare_calibration(&mut self) -> Result<(), Error<S::Error>> {
        let session = self.setup.param;
        let optic = self.profile.caps.optic_dpi;
        let mut strip = session;
        strip.user_dpi = optic;
        strip.phy_dpi = optic;
        strip.origin.y = 0;
        strip.bit_depth = 16;
        strip.data_type = if session.data_type == DataType::Color {
            DataType::Color
        } else {
            DataType::Gray
        };
        self.mclk = self.table_mclk(&strip);
        strip.mclk = self.mclk;
        self.strip = strip;

        self.regs.set_all_offsets(0);
        self.regs.set_all_gains(1);
        self.regs.set_motor_enabled(false);
        self.shading.reset();

        self.skip_coarse = false;
        if self.caching() {
            if let Some(coarse) = self.cache.load_coarse(&self.cache_key())? {
                debug!(?coarse, "coarse calibration from cache");
                coarse.apply(&mut self.regs);
                self.profile.hw.lamp = coarse.lamp;
                self.skip_coarse = true;
            }
        }
        if self.profile.caps.is_sheet_fed() && !self.skip_coarse && !self.in_calibration_mode() {
            self.skip_coarse = true;
            self.regs.set_all_gains(0x0a);
            self.apply_fixed_offsets();
            self.apply_fixed_gains();
        }
        Ok(())
    }

    /// Apply the caller's fixed gains, if any.
    fn apply_fixed_gains(&mut self) -> bool {
        match self.adjustments.gain {
            Some(gains) => {
                for (channel, gain) in gains.iter().enumerate() {
                    self.regs.set_afe_gain(channel, (*gain).min(0x3f));
                }
                true
            }
            None => false,
        }
    }

    /// Apply the caller's fixed offsets, if any.
    fn apply_fixed_offsets(&mut self) -> bool {
        match self.adjustments.offset {
            Some(offsets) => {
                for (channel, offset) in offsets.iter().enumerate() {
                    self.regs.set_afe_offset(channel, offset & 0x3f);
                }
                true
            }
            None => false,
        }
    }

    /// Zero offsets, unity gains, and the table master clock.
    fn bypass(&mut self) {
        debug!("bypassing calibration");
        self.regs.set_all_offsets(0);
        self.regs.set_all_gains(1);
        self.apply_fixed_gains();
        self.regs.set_motor_enabled(true);
        self.set_session_mclk();
        self.bypassed = true;
    }

    /// Set up a fine calibration strip. `cal_dpi` overrides the horizontal resolution when
    /// filling the cache in calibration mode.
    ///
    /// When caching, the strip covers the whole sensor so the result can be reused for any scan
    /// window later on.
    fn prepare_fine_calibration(&mut self, cal_dpi: u32, phase: Phase) {
        let caps = &self.profile.caps;
        let session = self.setup.param;
        let mut strip = session;
        if self.caching() {
            let (asic_x, _) = horizontal_divider(caps.optic_dpi.x, session.user_dpi.x);
            strip.user_dpi.x = if cal_dpi != 0 { cal_dpi } else { asic_x };
            strip.origin.x = 0;
            let (phy_x, _) = horizontal_divider(caps.optic_dpi.x, strip.user_dpi.x);
            strip.size.pixels = caps.normal.size.x * phy_x / 300;
        }
        strip.size.lines = if session.phy_dpi.x > 75 { 64 } else { 32 };
        strip.origin.y = 0;
        strip.bit_depth = 16;
        strip.user_dpi.y = caps.optic_dpi.y;
        strip.mclk = self.mclk;
        strip.phase = phase;
        self.strip = strip;
    }

    /// Read every line of the current fine calibration strip.
    fn scan_fine_strip(&mut self) -> Result<Vec<u16>, Error<S::Error>> {
        self.set_scan_parameters()?;
        if self.strip.phase == Phase::DarkShading {
            self.shading.resize(self.strip.size.phy_pixels as usize);
        }
        self.read_strip(self.strip.size.total_bytes)
    }

    /// Look up fine calibration results in the cache, cut down to the session's scan window.
    fn fine_shading_from_cache(&mut self) -> Result<bool, Error<S::Error>> {
        if !self.caching() {
            return Ok(false);
        }
        let session = self.setup.param;
        let (xdpi, _) = horizontal_divider(self.profile.caps.optic_dpi.x, session.user_dpi.x);
        let mut table = match self.cache.load_fine(&self.cache_key(), xdpi)? {
            Some(table) => table,
            None => return Ok(false),
        };
        let offset = (session.origin.x * xdpi / 300) as usize;
        match table.sub_range(offset, session.size.phy_pixels as usize) {
            Ok(()) => {
                debug!(xdpi, offset, "fine calibration from cache");
                self.shading = table;
                Ok(true)
            }
            Err(err) => {
                debug!(%err, "cached shading unusable");
                Ok(false)
            }
        }
    }

    /// Cache freshly captured shading, then cut it down to the session's scan window.
    fn save_and_project_shading(&mut self) -> Result<(), Error<S::Error>> {
        let session = self.setup.param;
        let phy_pixels = session.size.phy_pixels as usize;
        if !self.caching() {
            self.shading.fit(phy_pixels);
            return Ok(());
        }
        let optic_x = self.profile.caps.optic_dpi.x;
        let (cal_x, _) = horizontal_divider(optic_x, self.strip.user_dpi.x);
        self.cache
            .save_fine(&self.cache_key(), cal_x, &self.shading)?;
        if self.in_calibration_mode() {
            return Ok(());
        }
        let (xdpi, _) = horizontal_divider(optic_x, session.user_dpi.x);
        let offset = (session.origin.x * xdpi / 300) as usize;
        if let Err(err) = self.shading.sub_range(offset, phy_pixels) {
            warn!(%err, offset, phy_pixels, "scan window outside the shading strip");
            self.shading.fit(phy_pixels);
        }
        Ok(())
    }

    /// Switch the lamp used by the session on or off, along with the lamp mode register.
    fn switch_lamp(&mut self, on: bool) -> Result<(), Error<S::Error>> {
        self.regs[address::LAMP_MODE] = if on { self.profile.hw.reg_29 } else { 0 };
        self.scanner
            .set_lamp(self.lamp_select(), on)
            .transport()?;
        self.write_registers(address::LAMP_MODE, 1)
    }

    /// Write the CIS lamp on/off timings from the hardware description.
    fn apply_lamp_timing(&mut self) -> Result<(), Error<S::Error>> {
        if !self.profile.is_cis() {
            return Ok(());
        }
        self.regs
            .range_mut(address::LAMP_TIMING, 12)
            .copy_from_slice(&self.profile.hw.lamp.to_registers());
        self.write_registers(address::LAMP_TIMING, 12)
    }

    fn wait_for_motion(&mut self, deadline: Deadline) -> Result<(), Error<S::Error>> {
        loop {
            self.cancel.check()?;
            if !self.scanner.is_moving().transport()? {
                return Ok(());
            }
            if deadline.expired() {
                return Err(Error::MotionTimeout("carriage move"));
            }
            self.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// Move the carriage forward by `steps` at 300 dpi, and wait for it to stop.
    fn move_forward(&mut self, steps: u32) -> Result<(), Error<S::Error>> {
        if steps == 0 {
            return Ok(());
        }
        self.cancel.check()?;
        trace!(steps, "moving forward");
        self.scanner
            .move_by(MoveDirection::Forward, steps)
            .transport()?;
        let deadline = Deadline::for_travel(
            f64::from(steps) / 300.0,
            self.profile.hw.max_move_speed,
            MOTION_MARGIN,
        );
        self.wait_for_motion(deadline)
    }

    /// Move to a signed position from the calibration strip origin. Negative values mean the
    /// source has no such position.
    fn move_to_strip(&mut self, origin_y: i32) -> Result<(), Error<S::Error>> {
        match u32::try_from(origin_y) {
            Ok(steps) => self.move_forward(steps),
            Err(_) => Ok(()),
        }
    }

    /// Return the carriage to its home sensor at fast-feed speed.
    fn move_home(&mut self) -> Result<(), Error<S::Error>> {
        if self.profile.caps.is_sheet_fed() {
            return Ok(());
        }
        if self.scanner.is_at_home().transport()? {
            return Ok(());
        }
        let (pwm, duty, mclk_div) = self.home_motor_settings();
        let hw = &self.profile.hw;
        let fast_step = (CRYSTAL_FREQ
            / (f64::from(mclk_div) * 8.0 * hw.max_motor_speed * 4.0 * f64::from(hw.motor_dpi)))
            as u16;
        self.regs[address::PWM_FREQUENCY] = pwm;
        self.regs[address::PWM_DUTY] = duty;
        self.regs[address::MCLK_DIVIDER] = mclk_div.saturating_sub(1) * 2;
        self.regs.set_fast_feed_step(fast_step);
        self.regs.set_start_position(0);
        self.regs.set_motor_enabled(true);
        self.write_registers(address::MCLK_DIVIDER, 1)?;
        self.write_registers(address::MOTOR_CONTROL, 7)?;
        self.write_registers(address::PWM_FREQUENCY, 2)?;

        let travel = {
            let normal = &self.profile.caps.normal;
            f64::from(normal.data_origin.y + normal.size.y) / 300.0
        };
        let deadline = Deadline::for_travel(travel, self.profile.hw.max_move_speed, MOTION_MARGIN);
        debug!(fast_step, "returning home");
        self.scanner.move_to_home().transport()?;
        loop {
            self.cancel.check()?;
            if self.scanner.is_at_home().transport()? {
                return Ok(());
            }
            if deadline.expired() {
                return Err(Error::MotionTimeout("carriage did not reach home"));
            }
            self.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// PWM frequency, PWM duty and master clock divider for the return to home.
    fn home_motor_settings(&self) -> (u8, u8, u8) {
        let caps = &self.profile.caps;
        let model = self.profile.hw.motor_model;
        if !model.is_plustek() {
            let motor = tuning::motor(model);
            return (motor.pwm_fast, motor.pwm_duty_fast, motor.mclk_fast);
        }
        let (pwm, duty) = if caps.optic_dpi.x == 1200 || caps.pcb == 2 {
            (1, 63)
        } else {
            match model {
                MotorModel::Tokyo600 => (4, 4),
                MotorModel::HuaLien if caps.flags.contains(DeviceFlags::ADF) => (64, 4),
                MotorModel::HuaLien => (32, 16),
                _ => (64, 20),
            }
        };
        (pwm, duty, 6)
    }

    /// Bring the carriage back after calibration.
    fn park(&mut self) -> Result<(), Error<S::Error>> {
        let hw = &self.profile.hw;
        if self.is_plustek_motor() {
            if hw.motor_model != MotorModel::Tokyo600 {
                self.move_forward(u32::from(hw.motor_dpi) / 5)?;
                self.move_home()?;
            }
        } else {
            self.move_forward(10)?;
            self.delay_ms(2);
            self.move_home()?;
        }
        if self.setup.param.source == ScanSource::Adf {
            let steps = if self.profile.caps.ccd == CcdId::Nec3778 {
                1000
            } else {
                3 * 300 + 38
            };
            self.move_forward(steps)?;
            self.regs.set_motor_enabled(false);
            self.write_registers(address::MOTOR_CONTROL, 1)?;
        }
        Ok(())
    }
}
