// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! USB throughput measurement and lamp warmup.
use core::fmt::Debug;
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayMs;
use tracing::{debug, info, trace, warn};

use super::CalibrationSession;
use crate::device::DataType;
use crate::error::Error;
use crate::geometry::{Phase, DEFAULT_TRANSFER_RATE, FAST_TRANSFER_RATE};
use crate::transport::{Scanner, TransportResult};

/// Lines read to measure the transfer rate.
const SPEED_TEST_LINES: u32 = 3;

/// Upper bound on the number of strips read while waiting for the lamp.
const MAX_WARMUP_ROUNDS: usize = 61;

/// A lamp counts as stable after this many rounds without a notable change.
const STABLE_ROUNDS: u32 = 3;

const WARMUP_POLL_MS: u32 = 100;

impl<S, D> CalibrationSession<S, D>
where
    S: Scanner,
    S::Error: Debug,
    D: DelayMs<u32>,
{
    /// Replace the default transfer rate with one measured earlier, skipping the speed test.
    pub fn set_transfer_rate(&mut self, rate: u32) {
        self.transfer_rate = rate;
    }

    /// Time a few lines of 8-bit color to learn how fast the bus really is.
    ///
    /// The planner picks the master clock from this rate, so slow links get a slower scan
    /// instead of a DRAM overflow.
    pub(super) fn speed_test(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.max_ita = 0xff;
        if self.transfer_rate != DEFAULT_TRANSFER_RATE {
            debug!(rate = self.transfer_rate, "transfer rate already known");
            return Ok(());
        }
        self.prepare_calibration()?;
        let optic_x = self.profile.caps.optic_dpi.x;
        self.strip.data_type = DataType::Color;
        self.strip.channels = if self.profile.is_cis() { 1 } else { 3 };
        self.strip.bit_depth = 8;
        self.strip.phase = Phase::Gain;
        self.strip.size.lines = 1;
        self.strip.size.pixels = self.profile.caps.normal.size.x * optic_x / 300;
        self.strip.origin.x = u32::from(self.profile.hw.active_pixels_start) * 300 / optic_x;

        // A fast rate makes the planner derive the clock from the bus instead of the table.
        self.transfer_rate = FAST_TRANSFER_RATE;
        let mut elapsed = Duration::ZERO;
        let mut bytes = 0u64;
        for _ in 0..SPEED_TEST_LINES {
            self.strip.mclk = self.mclk;
            self.set_scan_parameters()?;
            self.begin_strip()?;
            let mut buf = vec![0u8; self.strip.size.phy_bytes as usize];
            let read = self.wait_for_data().and_then(|_| {
                let started = Instant::now();
                let read = self.scanner.read_raw(&mut buf).transport();
                elapsed += started.elapsed();
                read
            });
            let end = self.scanner.end_scan().transport();
            read?;
            end?;
            bytes += buf.len() as u64;
        }
        let seconds = elapsed.as_secs_f64().max(1e-6);
        self.transfer_rate = (bytes as f64 / seconds) as u32;
        info!(rate = self.transfer_rate, "transfer rate");
        Ok(())
    }

    /// Wait for the lamp to warm up.
    ///
    /// A non-negative warmup time in the adjustments is waited out as given. Otherwise strips
    /// are read until the average brightness stops changing. CIS LEDs need no warmup.
    pub(super) fn warm_up(&mut self) -> Result<(), Error<S::Error>> {
        self.cancel.check()?;
        self.max_ita = 0xff;
        if self.profile.is_cis() {
            return Ok(());
        }
        if let Ok(seconds) = u32::try_from(self.adjustments.warmup) {
            debug!(seconds, "timed warmup");
            let mut remaining = seconds * 1000;
            while remaining > 0 {
                self.cancel.check()?;
                let wait = remaining.min(WARMUP_POLL_MS);
                self.delay_ms(wait);
                remaining -= wait;
            }
            return Ok(());
        }

        self.prepare_calibration()?;
        let optic_x = self.profile.caps.optic_dpi.x;
        self.strip.data_type = DataType::Color;
        self.strip.phase = Phase::Gain;
        self.strip.size.lines = 1;
        self.strip.size.pixels = self.profile.caps.normal.size.x * optic_x / 300;
        self.strip.origin.x = u32::from(self.profile.hw.active_pixels_start) * 300 / optic_x;

        let source = self.setup.param.source;
        let (start, len, threshold) = if source.is_film() {
            let film = self.profile.caps.source(source);
            (
                (film.data_origin.x * optic_x / 300) as usize,
                (film.size.x * optic_x / 300) as usize,
                40,
            )
        } else {
            (500, self.strip.size.pixels as usize, 60)
        };

        let mut last = [0i64; 3];
        let mut stable = 0;
        for round in 0..MAX_WARMUP_ROUNDS {
            let data = self.scan_line()?;
            let layout = self.strip_layout();
            let end = (start + len).min(layout.pixels);
            let count = end.saturating_sub(start).max(1) as i64;
            let mut levels = [0i64; 3];
            for (channel, level) in levels.iter_mut().enumerate() {
                let sum: i64 = (start..end)
                    .map(|x| i64::from(layout.sample(&data, 0, channel, x)))
                    .sum();
                *level = sum / count;
            }
            let settled = levels
                .iter()
                .zip(last.iter())
                .all(|(level, last)| level - last < threshold);
            trace!(round, ?levels, stable, "warmup");
            last = levels;
            if settled {
                if stable > STABLE_ROUNDS {
                    info!(round, "lamp warmed up");
                    return Ok(());
                }
                stable += 1;
            } else {
                stable = 0;
            }
            if round != 0 && stable == 0 {
                self.delay_ms(1000);
            }
        }
        warn!("lamp still not stable, continuing anyway");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{request, session};
    use super::*;
    use crate::device::{Adjustments, DeviceProfile, ImageType};

    #[test]
    fn speed_test_measures_the_bus() {
        let (mut session, scanner, _) = session(
            DeviceProfile::plustek_ut12(),
            Adjustments::default(),
            &request(ImageType::Color24, 300),
        );
        session.speed_test().unwrap();
        assert_eq!(scanner.scans_started(), 3);
        assert_ne!(session.transfer_rate(), DEFAULT_TRANSFER_RATE);

        // Once known, the rate is not measured again.
        session.speed_test().unwrap();
        assert_eq!(scanner.scans_started(), 3);
    }

    #[test]
    fn known_rate_skips_speed_test() {
        let (mut session, scanner, _) = session(
            DeviceProfile::plustek_ut12(),
            Adjustments::default(),
            &request(ImageType::Color24, 300),
        );
        session.set_transfer_rate(4_000_000);
        session.speed_test().unwrap();
        assert_eq!(scanner.scans_started(), 0);
        assert_eq!(session.transfer_rate(), 4_000_000);
    }

    #[test]
    fn timed_warmup() {
        let (mut session, scanner, delay) = session(
            DeviceProfile::plustek_ut12(),
            Adjustments {
                warmup: 3,
                ..Adjustments::default()
            },
            &request(ImageType::Color24, 300),
        );
        session.warm_up().unwrap();
        assert_eq!(delay.total_ms(), 3000);
        assert_eq!(scanner.scans_started(), 0);
    }

    #[test]
    fn automatic_warmup_waits_for_a_steady_lamp() {
        let (mut session, scanner, delay) = session(
            DeviceProfile::plustek_ut12(),
            Adjustments::default(),
            &request(ImageType::Color24, 300),
        );
        // A warm lamp settles after the first reading and four steady ones.
        session.warm_up().unwrap();
        assert_eq!(scanner.scans_started(), 6);
        assert!(delay.total_ms() < 1000);
    }

    #[test]
    fn cold_lamp_is_waited_for() {
        let (mut session, scanner, delay) = session(
            DeviceProfile::plustek_ut12(),
            Adjustments::default(),
            &request(ImageType::Color24, 300),
        );
        scanner.set_warmup_scans(10);
        session.warm_up().unwrap();
        assert!(scanner.scans_started() > 10);
        assert!(delay.total_ms() >= 9000);
    }

    #[test]
    fn cis_needs_no_warmup() {
        let (mut session, scanner, delay) = session(
            DeviceProfile::canon_lide25(),
            Adjustments::default(),
            &request(ImageType::Color24, 300),
        );
        session.warm_up().unwrap();
        assert_eq!(scanner.scans_started(), 0);
        assert_eq!(delay.total_ms(), 0);
    }
}
