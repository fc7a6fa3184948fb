// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use tracing::{debug, info, trace};

use super::ring::{ScanRing, DEFAULT_RING_BYTES};
use super::LineProcessor;
use crate::calibration::CalibrationSession;
use crate::device::DeviceFlags;
use crate::error::{Error, LibraryError};
use crate::register::address;
use crate::transport::Scanner;
use crate::util::div_ceil;

/// Raw lines read from the scanner at a time.
const CHUNK_LINES: usize = 32;

/// Chunk size for 600 dpi devices with a feeder, which have less room to spare.
const FEEDER_CHUNK_LINES: usize = 8;

/// Reads the image of a running scan, line by line.
///
/// Creating a reader calibrates (if that hasn't happened yet) and starts the scan. Raw data is
/// pulled from the scanner a chunk at a time into a [`ScanRing`], the lines the motor needs to
/// settle and the lines needed to line up CCD color rows are dropped, and every remaining line is
/// run through a [`LineProcessor`]. When the vertical resolution was rounded up, surplus lines are
/// dropped evenly.
///
/// ```no_run
/// # use embedded_hal::blocking::delay::DelayMs;
/// # use lm983x::{CalibrationSession, Error, ImageReader, Scanner};
/// # fn scan<S, D>(session: &mut CalibrationSession<S, D>) -> Result<Vec<u8>, Error<S::Error>>
/// # where
/// #     S: Scanner,
/// #     S::Error: core::fmt::Debug,
/// #     D: DelayMs<u32>,
/// # {
/// let mut reader = ImageReader::new(session)?;
/// let mut image = vec![0u8; reader.image_bytes()];
/// reader.read_image(&mut image)?;
/// reader.finish()?;
/// # Ok(image)
/// # }
/// ```
#[derive(Debug)]
pub struct ImageReader<'a, S, D> {
    session: &'a mut CalibrationSession<S, D>,
    processor: LineProcessor,
    ring: ScanRing,
    /// Raw bytes the scanner has yet to send.
    remaining_bytes: u64,
    chunk_lines: usize,
    lines_to_skip: u32,
    lines_discard: u32,
    /// Raw lines in the ring that are ready to be processed.
    lines_ready: u32,
    /// Output lines not delivered yet.
    lines_left: u32,
    /// The vertical sampling accumulator, when the scan runs at a higher resolution than asked.
    sum_y: Option<u32>,
    user_y: u32,
    phy_y: u32,
    pause_kib: u64,
    dram_size: u64,
}

impl<'a, S, D> ImageReader<'a, S, D>
where
    S: Scanner,
    S::Error: Debug,
    D: DelayMs<u32>,
{
    /// Start the session's scan, with a ring buffer of the default size.
    pub fn new(session: &'a mut CalibrationSession<S, D>) -> Result<Self, Error<S::Error>> {
        Self::with_ring_bytes(session, DEFAULT_RING_BYTES)
    }

    /// Start the session's scan, reading into a ring buffer of about `ring_bytes` bytes.
    ///
    /// The ring is enlarged if it can't hold the lines needed to line up the color rows.
    pub fn with_ring_bytes(
        session: &'a mut CalibrationSession<S, D>,
        ring_bytes: usize,
    ) -> Result<Self, Error<S::Error>> {
        let plan = session.start_scan()?;
        let setup = *session.setup();
        let param = setup.param;
        let profile = session.profile();
        let caps = &profile.caps;

        if param.size.lines == 0 || param.size.phy_bytes == 0 {
            return Err(LibraryError::InvalidData("empty scan area").into());
        }
        let processor = LineProcessor::new(profile, &setup, &plan);
        let chunk_lines = if caps.flags.contains(DeviceFlags::ADF) && caps.optic_dpi.x == 600 {
            FEEDER_CHUNK_LINES
        } else {
            CHUNK_LINES
        };
        let lead_in = 2 * plan.line_distance as usize + 2 * chunk_lines;
        let min_lines = (ring_bytes / processor.phy_bytes()).max(lead_in);
        let ring = processor.ring(chunk_lines, min_lines);
        let dram_size = u64::from(profile.hw.dram_size);
        let pause_kib = u64::from(session.registers()[address::PAUSE_LIMIT]) * dram_size / 128;

        let sum_y =
            (param.phy_dpi.y > param.user_dpi.y).then(|| param.phy_dpi.y - param.user_dpi.y);
        debug!(
            lines = param.size.lines,
            phy_lines = param.size.phy_lines,
            skip = plan.lines_to_skip,
            discard = plan.lines_discard,
            ring_lines = ring.capacity_lines(),
            sample_y = sum_y.is_some(),
            "reading image"
        );

        let mut reader = Self {
            session,
            processor,
            ring,
            remaining_bytes: u64::from(param.size.total_bytes),
            chunk_lines,
            lines_to_skip: plan.lines_to_skip,
            lines_discard: plan.lines_discard,
            lines_ready: 0,
            lines_left: param.size.lines,
            sum_y,
            user_y: param.user_dpi.y,
            phy_y: param.phy_dpi.y,
            pause_kib,
            dram_size,
        };
        reader.lines_ready = reader.read_data()?;
        if reader.lines_ready == 0 {
            return Err(LibraryError::ShortScan.into());
        }
        Ok(reader)
    }

    /// Bytes in each output line, padding included.
    pub fn bytes_per_line(&self) -> usize {
        self.processor.bytes_per_line()
    }

    /// Output lines not read yet.
    pub fn lines_remaining(&self) -> u32 {
        self.lines_left
    }

    /// Bytes needed for the rest of the image.
    pub fn image_bytes(&self) -> usize {
        self.bytes_per_line() * self.lines_left as usize
    }

    /// Read the next output line into `out`.
    ///
    /// Returns `false` once the whole image has been delivered.
    pub fn read_line(&mut self, out: &mut [u8]) -> Result<bool, Error<S::Error>> {
        let needed = self.bytes_per_line();
        if out.len() < needed {
            return Err(LibraryError::BufferTooSmall {
                needed,
                got: out.len(),
            }
            .into());
        }
        if self.lines_left == 0 {
            return Ok(false);
        }
        loop {
            self.session.cancel_token().check()?;
            if self.lines_ready == 0 {
                self.lines_ready = self.read_data()?;
                if self.lines_ready == 0 {
                    return Err(LibraryError::ShortScan.into());
                }
            }
            let emit = match self.sum_y.as_mut() {
                None => true,
                Some(sum) => {
                    *sum += self.user_y;
                    if *sum >= self.phy_y {
                        *sum -= self.phy_y;
                        true
                    } else {
                        false
                    }
                }
            };
            if emit {
                self.processor.process(&self.ring, out)?;
            }
            self.ring.advance();
            self.lines_ready -= 1;
            if emit {
                self.lines_left -= 1;
                return Ok(true);
            }
        }
    }

    /// Read every remaining line into `image`, honoring bottom-up delivery.
    pub fn read_image(&mut self, image: &mut [u8]) -> Result<(), Error<S::Error>> {
        let line = self.bytes_per_line();
        let lines = self.lines_left as usize;
        let needed = line * lines;
        if image.len() < needed {
            return Err(LibraryError::BufferTooSmall {
                needed,
                got: image.len(),
            }
            .into());
        }
        let bottom_up = self.processor.orientation().bottom_up;
        for idx in 0..lines {
            let row = if bottom_up { lines - 1 - idx } else { idx };
            self.read_line(&mut image[row * line..(row + 1) * line])?;
        }
        info!(lines, "image read");
        Ok(())
    }

    /// Stop the scan and hand the session back.
    pub fn finish(self) -> Result<(), Error<S::Error>> {
        self.session.finish_scan()
    }

    /// Read the next chunk of raw data into the ring.
    ///
    /// Returns the number of lines that became ready, 0 once the scanner has nothing more to send.
    fn read_data(&mut self) -> Result<u32, Error<S::Error>> {
        let phy_bytes = self.processor.phy_bytes() as u64;
        let chunk_bytes = self.chunk_lines as u64 * phy_bytes;
        while self.remaining_bytes > 0 {
            self.session.cancel_token().check()?;
            let bytes = self.remaining_bytes.min(chunk_bytes);
            self.remaining_bytes -= bytes;

            // Let the ASIC pause on the smaller last chunk instead of waiting for data that will
            // never come.
            if self.remaining_bytes == 0 && bytes < self.pause_kib * 1024 {
                let limit = div_ceil(bytes, 4 * self.dram_size.max(1)).clamp(1, 0xff) as u8;
                trace!(limit, "pause limit for the last chunk");
                self.session.set_pause_limit(limit)?;
            }

            while self.lines_to_skip > 0 {
                let mut skip = u64::from(self.lines_to_skip) * phy_bytes;
                if skip > chunk_bytes {
                    skip = chunk_bytes;
                    self.lines_to_skip -= self.chunk_lines as u32;
                } else {
                    self.lines_to_skip = 0;
                }
                trace!(bytes = skip, "skipping lines");
                self.session
                    .read_scan_data(self.ring.chunk_mut(skip as usize))?;
            }

            self.session
                .read_scan_data(self.ring.chunk_mut(bytes as usize))?;
            let mut lines = (bytes / phy_bytes) as u32;
            if self.lines_discard > 0 {
                let dropped = self.lines_discard.min(lines);
                trace!(dropped, "discarding lines");
                self.lines_discard -= dropped;
                lines -= dropped;
            }
            self.ring.commit();
            if lines > 0 {
                return Ok(lines);
            }
        }
        Ok(0)
    }
}
