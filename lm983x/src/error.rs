// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
use core::fmt::Debug;

use thiserror::Error;

/// Errors that don't involve the scanner transport.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// When a value read back from the scanner or the cache is malformed in some way.
    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    /// A calibration cache file exists, but its version or shape doesn't match what is needed.
    ///
    /// This is never surfaced from a load; a mismatching cache is treated like a missing one.
    #[error("calibration cache mismatch: {0}")]
    CacheMismatch(&'static str),

    /// Reading or writing a calibration cache file failed.
    #[error("calibration cache I/O failed")]
    Io(#[from] std::io::Error),

    /// An output buffer can't hold the image data asked for.
    #[error("buffer too small: {needed} bytes needed, {got} given")]
    BufferTooSmall { needed: usize, got: usize },

    /// The scanner stopped sending data before the image was complete.
    #[error("scan data ended early")]
    ShortScan,
}

/// The error type for every fallible operation that touches the scanner.
///
/// `T` is the error type of the [`Transport`][crate::transport::Transport] implementation, so
/// transport failures are passed through untouched.
#[derive(Debug, Error)]
pub enum Error<T: Debug> {
    /// Errors originating from the register, motion, lamp or scan transport.
    #[error("transport error: {0:?}")]
    Transport(T),

    /// The carriage did not reach its home or target position before the deadline.
    #[error("motion did not finish in time: {0}")]
    MotionTimeout(&'static str),

    /// The ASIC did not fill its DRAM with scan data before the deadline.
    #[error("no scan data arrived in time")]
    DataTimeout,

    /// Calibration could not run to completion.
    ///
    /// Non-convergence of a bisection loop is *not* reported this way, the engine carries on with
    /// the best value it found. This covers precondition failures such as a missing black area or
    /// a lamp that never settles.
    #[error("calibration failed: {0}")]
    CalibrationFailed(&'static str),

    /// A [`CancelToken`][crate::cancel::CancelToken] was triggered while the operation was running.
    #[error("operation cancelled")]
    Cancelled,

    /// Errors originating from within this library.
    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl<T: Debug> Error<T> {
    /// Wrap a transport error.
    ///
    /// Transport errors are an associated type without bounds beyond `Debug`, so `From` can't be
    /// implemented for them without conflicting with `From<LibraryError>`.
    pub fn transport(err: T) -> Self {
        Self::Transport(err)
    }

    /// Whether this error is the cooperative cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
