//! Calibration and image reconstruction for USB flatbed scanners built around the National
//! Semiconductor LM9831, LM9832 and LM9833 ASICs.
//!
//! The ASIC does very little on its own. The host has to work out every clock divider, step
//! timing and pixel window, calibrate the analog front end against the scanner's reference strip,
//! and then put the image back together from the raw sensor stream, where the three color rows of
//! a CCD are several lines apart and the horizontal resolution is only ever an integer fraction of
//! the optical one. This crate does all of that, leaving the USB transfers, motor and lamp to the
//! caller through the traits in [`transport`].
//!
//! Blocking waits take an [`embedded-hal`][embedded-hal] `DelayMs` implementation, so the same
//! code can be driven by a real delay or a mock one in tests.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/0.2/embedded_hal/blocking/delay/trait.DelayMs.html
//!
//! # Scanning
//! ```no_run
//! # fn scan<S, D>(scanner: S, delay: D) -> Result<Vec<u8>, lm983x::Error<S::Error>>
//! # where S: lm983x::Scanner, S::Error: core::fmt::Debug, D: embedded_hal::blocking::delay::DelayMs<u32>,
//! # {
//! use lm983x::{
//!     Adjustments, Area, CalibrationSession, CancelToken, DeviceProfile, ImageReader,
//!     ImageRequest, ImageType, ScanFlags, ScanSource, Xy,
//! };
//!
//! let request = ImageRequest {
//!     area: Area { x: 0, y: 0, cx: 2550, cy: 3300 },
//!     dpi: Xy::new(300, 300),
//!     image_type: ImageType::Color24,
//!     source: ScanSource::Reflection,
//!     flags: ScanFlags::QUALITY,
//! };
//! let mut session = CalibrationSession::new(
//!     scanner,
//!     delay,
//!     DeviceProfile::plustek_ut12(),
//!     Adjustments::default(),
//!     &request,
//!     CancelToken::new(),
//! );
//! let mut reader = ImageReader::new(&mut session)?;
//! let mut image = vec![0u8; reader.image_bytes()];
//! reader.read_image(&mut image)?;
//! reader.finish()?;
//! # Ok(image)
//! # }
//! ```
//! Creating the [`ImageReader`] runs the calibration the request asks for (or restores it from the
//! [`cache`]), positions the carriage and starts the scan. Every line handed back has the channels
//! lined up, the resolution asked for and the byte layout of the requested [`ImageType`].
//!
//! # Layers
//! [`geometry`] and [`tuning`] are pure calculations, from a request to the register values for
//! it. [`calibration`] drives the scanner through the coarse and fine calibration phases, keeping
//! the results in [`shading`] tables that [`cache`] can persist between runs. [`pipeline`] turns
//! raw lines into image lines. Each can be used on its own when the high level types don't fit.

#[macro_use]
mod util;

pub mod cache;
pub mod calibration;
pub mod cancel;
pub mod device;
#[doc(hidden)]
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod register;
pub mod shading;
pub mod transport;
pub mod tuning;

#[cfg(test)]
mod test;

pub use cache::CalibrationCache;
pub use calibration::{CalibrationSession, CalibrationState};
pub use cancel::CancelToken;
pub use device::{Adjustments, DeviceProfile, ImageType, ScanSource, Xy};
#[doc(inline)]
pub use error::{Error, LibraryError};
pub use geometry::{Area, ImageRequest, ScanFlags};
#[doc(inline)]
pub use pipeline::{ImageReader, LineProcessor};
pub use register::RegisterSet;
pub use transport::Scanner;
