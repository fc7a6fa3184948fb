// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! The traits the engine drives the scanner through.
//!
//! Moving bytes over USB, stepping the motor and switching lamps are left to the implementer.
//! Everything in this crate is written against these traits, and the [`Scanner`] trait bundles
//! them together for convenience.
use core::fmt::Debug;

use crate::error::Error;

/// The base trait for all of the scanner collaborators, carrying the shared error type.
pub trait Transport {
    type Error: Debug;
}

/// Access to the ASIC register file.
pub trait RegisterIo: Transport {
    /// Read `buf.len()` consecutive registers starting at `address`.
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write consecutive registers starting at `address`.
    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Stream bytes through the data port (register 0x06), after the DRAM address and table
    /// selection registers have been written.
    fn write_data(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// The direction the carriage (or the paper, for sheet-fed devices) moves in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MoveDirection {
    Forward,
    Backward,
}

/// Carriage motion.
pub trait Motion: Transport {
    /// Start moving the carriage by `steps`, counted at 300 dpi. The call returns once the move
    /// has been started; [`Motion::is_moving`] reports when it is done.
    fn move_by(&mut self, direction: MoveDirection, steps: u32) -> Result<(), Self::Error>;

    /// Start returning the carriage to the home sensor.
    fn move_to_home(&mut self) -> Result<(), Self::Error>;

    fn is_at_home(&mut self) -> Result<bool, Self::Error>;

    fn is_moving(&mut self) -> Result<bool, Self::Error>;
}

/// Which lamps an operation applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LampSelect {
    /// The reflective (flatbed) lamp.
    Normal,
    /// The transparency adapter lamp.
    Tpa,
}

/// Lamp control.
pub trait Lamp: Transport {
    fn set_lamp(&mut self, lamp: LampSelect, on: bool) -> Result<(), Self::Error>;

    /// Which lamp is currently lit, if any.
    fn lamp_status(&mut self) -> Result<Option<LampSelect>, Self::Error>;
}

/// Raw scan data transfer.
pub trait RawScan: Transport {
    /// Start the scan configured in the registers written so far.
    fn begin_scan(&mut self) -> Result<(), Self::Error>;

    /// Read exactly `buf.len()` bytes of scan data.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Stop the running scan.
    fn end_scan(&mut self) -> Result<(), Self::Error>;

    /// Whether the ASIC has buffered enough data in its DRAM for a read.
    fn data_available(&mut self) -> Result<bool, Self::Error>;

    /// Read and drop whatever the ASIC still holds in its DRAM.
    fn clear_data(&mut self) -> Result<(), Self::Error>;
}

/// Everything the calibration engine and the image reader need from a scanner.
pub trait Scanner: RegisterIo + Motion + Lamp + RawScan {}

impl<S> Scanner for S where S: RegisterIo + Motion + Lamp + RawScan {}

/// Shorthand for wrapping transport errors.
pub(crate) trait TransportResult<T, E: Debug> {
    fn transport(self) -> Result<T, Error<E>>;
}

impl<T, E: Debug> TransportResult<T, E> for Result<T, E> {
    fn transport(self) -> Result<T, Error<E>> {
        self.map_err(Error::transport)
    }
}
