// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Turning raw scan lines into image lines.
//!
//! What the ASIC sends depends on the sensor, the bit depth and the resolution it scanned at,
//! none of which necessarily match what was asked for. A [`LineProcessor`] is put together once
//! per scan from the [`ScanSetup`] and [`Plan`] and then applied to every line. The
//! [`ImageReader`] keeps a [`ScanRing`] filled and feeds it through the processor.
use arrayvec::ArrayVec;
use tracing::{debug, warn};

use crate::device::{Chip, DataType, DeviceProfile, ScanSource, SensorOrder, Workarounds};
use crate::error::LibraryError;
use crate::geometry::{Plan, ScanFlags, ScanSetup};

mod reader;
mod ring;
mod transform;

pub use reader::ImageReader;
pub use ring::{ChannelCursor, ScanRing, DEFAULT_RING_BYTES};
pub use transform::{
    average_neighbours, ChannelSource, Emitter, Orientation, Resampler, SampleDepth, SCALER,
};

/// Film scans above this physical resolution have neighbouring samples averaged.
const FILM_AVERAGE_DPI: u32 = 800;

/// The per-scan strategy for turning raw lines into output lines.
#[derive(Clone, Debug)]
pub struct LineProcessor {
    source: ChannelSource,
    depth: SampleDepth,
    /// The sample planes written for each output pixel, in output order.
    channels: ArrayVec<usize, 3>,
    resampler: Resampler,
    emitter: Emitter,
    orientation: Orientation,
    average: bool,
    phy_pixels: usize,
    phy_bytes: usize,
    bytes_per_line: usize,
    samples: ArrayVec<Vec<u16>, 3>,
}

impl LineProcessor {
    /// Choose the processing for a planned scan.
    ///
    /// `setup` has to be the one the scan was planned with, so the physical resolution and sizes
    /// are filled in.
    pub fn new(profile: &DeviceProfile, setup: &ScanSetup, plan: &Plan) -> Self {
        let param = &setup.param;
        let caps = &profile.caps;
        let depth = SampleDepth::from_bit_depth(param.bit_depth);

        let source = if param.channels == 3 {
            ChannelSource::Interleaved {
                order: caps.sensor_order,
                line_distance: plan.line_distance as usize,
            }
        } else if param.data_type == DataType::Color {
            let mut order = caps.sensor_order;
            if caps.workarounds.contains(Workarounds::RESET_SO_TO_RGB)
                && caps.pcb != 0
                && param.phy_dpi.x > u32::from(caps.pcb)
            {
                order = SensorOrder::Rgb;
            }
            if !matches!(order, SensorOrder::Rgb | SensorOrder::Gbr) {
                warn!(?order, "no plane layout for this sensor order, using RGB");
            }
            ChannelSource::planes(order)
        } else {
            ChannelSource::Single
        };

        let channels: ArrayVec<usize, 3> = match setup.from_color {
            Some(from) => [from.channel].into_iter().collect(),
            None if source.channels() == 1 => [0].into_iter().collect(),
            None if setup.flags.contains(ScanFlags::BGR) => [2, 1, 0].into_iter().collect(),
            None => [0, 1, 2].into_iter().collect(),
        };

        let mirror = param.source == ScanSource::Adf;
        let right_align = setup.flags.contains(ScanFlags::RIGHT_ALIGN);
        let binary = param.data_type == DataType::BlackWhite
            || setup.from_color.map_or(false, |from| from.binary);
        let emitter = if binary {
            Emitter::Bit { pad: mirror }
        } else if param.bit_depth > 8 {
            let shift = match (right_align, profile.hw.chip) {
                (true, Chip::Lm9831 | Chip::Lm9832) => 2,
                _ => 0,
            };
            Emitter::Word { shift }
        } else if setup.flags.contains(ScanFlags::PSEUDO48) {
            let shift = if right_align {
                5
            } else if caps.workarounds.contains(Workarounds::BSHIFT7_BUG) {
                0
            } else {
                7
            };
            Emitter::Pseudo16 { shift }
        } else {
            Emitter::Byte
        };

        let phy_pixels = param.size.phy_pixels as usize;
        let pixels = param.size.pixels as usize;
        let resampler = Resampler::new(param.phy_dpi.x, param.user_dpi.x, phy_pixels, pixels);
        let average = param.source.is_film()
            && param.phy_dpi.x > FILM_AVERAGE_DPI
            && depth != SampleDepth::Bit;
        let bytes_per_line =
            (setup.bytes_per_line as usize).max(emitter.line_bytes(pixels, channels.len()));

        debug!(
            ?source,
            ?depth,
            ?emitter,
            ?channels,
            mirror,
            average,
            scaled = !resampler.is_identity(),
            "line processing"
        );
        Self {
            source,
            depth,
            channels,
            resampler,
            emitter,
            orientation: Orientation {
                mirror,
                bottom_up: setup.flags.contains(ScanFlags::BOTTOM_UP),
            },
            average,
            phy_pixels,
            phy_bytes: param.size.phy_bytes as usize,
            bytes_per_line,
            samples: ArrayVec::new(),
        }
    }

    /// Bytes in each output line, padding included.
    pub fn bytes_per_line(&self) -> usize {
        self.bytes_per_line
    }

    /// Bytes in each raw line.
    pub fn phy_bytes(&self) -> usize {
        self.phy_bytes
    }

    pub fn source(&self) -> &ChannelSource {
        &self.source
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// A ring laid out for this processor, holding at least `min_lines` raw lines.
    pub fn ring(&self, chunk_lines: usize, min_lines: usize) -> ScanRing {
        ScanRing::new(
            self.phy_bytes,
            chunk_lines,
            min_lines,
            self.source.cursors(self.phy_bytes, self.depth),
            self.source.reseeds_together(),
        )
    }

    /// Build one output line from the ring's current read positions into `out`.
    ///
    /// `out` has to hold at least [`LineProcessor::bytes_per_line`] bytes. Padding bytes are
    /// cleared.
    pub fn process(&mut self, ring: &ScanRing, out: &mut [u8]) -> Result<(), LibraryError> {
        if out.len() < self.bytes_per_line {
            return Err(LibraryError::BufferTooSmall {
                needed: self.bytes_per_line,
                got: out.len(),
            });
        }
        self.source
            .gather(ring, self.depth, self.phy_pixels, &mut self.samples);
        if self.average {
            for plane in self.samples.iter_mut() {
                average_neighbours(plane, self.depth);
            }
        }
        let out = &mut out[..self.bytes_per_line];
        let used = self
            .emitter
            .line_bytes(self.resampler.pixels(), self.channels.len());
        let pad = match self.emitter {
            Emitter::Bit { pad: true } => 0xff,
            _ => 0,
        };
        out[used..].fill(pad);
        self.emitter.emit(
            &self.samples,
            &self.channels,
            &self.resampler,
            self.orientation,
            out,
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{Adjustments, ImageType, Xy};
    use crate::geometry::{Area, ImageRequest, Planner, ScanParam};
    use crate::register::RegisterSet;

    /// Plan `request` the way a scan would, returning the processor and the planned setup.
    pub(super) fn planned(
        profile: &DeviceProfile,
        request: &ImageRequest,
    ) -> (LineProcessor, ScanSetup, Plan) {
        let mut setup = ScanParam::from_request(profile, request, &Adjustments::default());
        let mut regs = RegisterSet::from_hardware(&profile.hw);
        let plan = Planner::new(profile).plan(&mut regs, &mut setup.param);
        (LineProcessor::new(profile, &setup, &plan), setup, plan)
    }

    pub(super) fn request(image_type: ImageType, dpi: u32, source: ScanSource) -> ImageRequest {
        ImageRequest {
            area: Area {
                x: 0,
                y: 0,
                cx: 300,
                cy: 30,
            },
            dpi: Xy::new(dpi, dpi),
            image_type,
            source,
            flags: ScanFlags::QUALITY,
        }
    }

    /// Fill a ring with lines where every byte is its line number.
    fn numbered_ring(processor: &LineProcessor, lines: usize) -> ScanRing {
        let bytes = processor.phy_bytes();
        let mut ring = processor.ring(lines, lines);
        let chunk = ring.chunk_mut(bytes * lines);
        for (line, raw) in chunk.chunks_exact_mut(bytes).enumerate() {
            raw.fill(line as u8);
        }
        ring.commit();
        ring
    }

    #[test]
    fn ccd_color_lines_up_the_rows() {
        let profile = DeviceProfile::plustek_ut12();
        let (mut processor, setup, plan) =
            planned(&profile, &request(ImageType::Color24, 600, ScanSource::Reflection));
        assert_eq!(plan.line_distance, 4);
        assert!(matches!(processor.source(), ChannelSource::Interleaved { .. }));
        assert_eq!(processor.emitter(), Emitter::Byte);

        let ring = numbered_ring(&processor, 16);
        let mut out = vec![0u8; processor.bytes_per_line()];
        processor.process(&ring, &mut out).unwrap();
        assert_eq!(out.len(), setup.bytes_per_line as usize);
        // Red from line 0, green four lines on, blue eight.
        assert_eq!(&out[..6], &[0, 4, 8, 0, 4, 8]);
    }

    #[test]
    fn decimated_channels_are_two_distances_apart() {
        let profile = DeviceProfile::plustek_ut12();
        let (processor, setup, plan) =
            planned(&profile, &request(ImageType::Color24, 300, ScanSource::Reflection));
        let phy_bytes = setup.param.size.phy_bytes as usize;
        let cursors = processor.source().cursors(phy_bytes, SampleDepth::Byte);
        assert_eq!(plan.line_distance, 2);
        let blue = cursors[2].seed - cursors[2].shift;
        let red = cursors[0].seed - cursors[0].shift;
        assert_eq!(blue - red, 2 * plan.line_distance as usize * phy_bytes);
        // The lead-in needed to line the rows up is scanned on top of the image.
        let size = setup.param.size;
        assert_eq!(size.phy_lines, size.lines + 2 * plan.line_distance);
    }

    #[test]
    fn processing_is_deterministic() {
        let profile = DeviceProfile::plustek_ut12();
        let (mut processor, _, _) =
            planned(&profile, &request(ImageType::Color24, 150, ScanSource::Reflection));
        let ring = numbered_ring(&processor, 32);
        let mut first = vec![0u8; processor.bytes_per_line()];
        let mut second = vec![0xaau8; processor.bytes_per_line()];
        processor.process(&ring, &mut first).unwrap();
        processor.process(&ring, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn gray_from_color_takes_green() {
        let profile = DeviceProfile::canon_d660u();
        let request = ImageRequest {
            flags: ScanFlags::QUALITY | ScanFlags::DWORD_BOUNDARY,
            ..request(ImageType::Gray8, 75, ScanSource::Reflection)
        };
        let (mut processor, setup, _) = planned(&profile, &request);
        assert!(setup.from_color.is_some());
        let pixels = setup.param.size.pixels as usize;
        assert_eq!(processor.bytes_per_line(), (pixels + 3) & !3);

        let ring = numbered_ring(&processor, 32);
        let mut out = vec![0xffu8; processor.bytes_per_line()];
        processor.process(&ring, &mut out).unwrap();
        let green = processor.source().cursors(processor.phy_bytes(), SampleDepth::Byte)[1];
        let green_line = (green.seed / processor.phy_bytes()) as u8;
        assert!(out[..pixels].iter().all(|&value| value == green_line));
        assert!(out[pixels..].iter().all(|&value| value == 0));
    }

    #[test]
    fn lm9831_deep_color_is_pseudo16() {
        let mut profile = DeviceProfile::plustek_ut12();
        profile.hw.chip = Chip::Lm9831;
        let (processor, setup, _) =
            planned(&profile, &request(ImageType::Color48, 300, ScanSource::Reflection));
        assert!(setup.flags.contains(ScanFlags::PSEUDO48));
        assert_eq!(processor.emitter(), Emitter::Pseudo16 { shift: 7 });

        profile.caps.workarounds.insert(Workarounds::BSHIFT7_BUG);
        let (processor, _, _) =
            planned(&profile, &request(ImageType::Color48, 300, ScanSource::Reflection));
        assert_eq!(processor.emitter(), Emitter::Pseudo16 { shift: 0 });

        let mut request = request(ImageType::Color48, 300, ScanSource::Reflection);
        request.flags.insert(ScanFlags::RIGHT_ALIGN);
        let (processor, _, _) = planned(&profile, &request);
        assert_eq!(processor.emitter(), Emitter::Pseudo16 { shift: 5 });
    }

    #[test]
    fn right_aligned_words() {
        let profile = DeviceProfile::plustek_ut12();
        let mut request = request(ImageType::Color48, 300, ScanSource::Reflection);
        request.flags.insert(ScanFlags::RIGHT_ALIGN);
        let (processor, _, _) = planned(&profile, &request);
        assert_eq!(processor.emitter(), Emitter::Word { shift: 2 });

        let profile = DeviceProfile::canon_lide25();
        let (processor, _, _) = planned(&profile, &request);
        assert_eq!(processor.emitter(), Emitter::Word { shift: 0 });
        assert!(matches!(processor.source(), ChannelSource::Planes { .. }));
    }

    #[test]
    fn cis_planes() {
        let profile = DeviceProfile::canon_lide25();
        let (mut processor, setup, _) =
            planned(&profile, &request(ImageType::Color24, 300, ScanSource::Reflection));
        let phy_bytes = processor.phy_bytes();
        let plane = phy_bytes / 3;
        let mut ring = processor.ring(1, 1);
        let raw = ring.chunk_mut(phy_bytes);
        raw[..plane].fill(10);
        raw[plane..2 * plane].fill(20);
        raw[2 * plane..].fill(30);
        ring.commit();
        let mut out = vec![0u8; processor.bytes_per_line()];
        processor.process(&ring, &mut out).unwrap();
        let pixels = setup.param.size.pixels as usize;
        assert!(out[..pixels * 3].chunks_exact(3).all(|rgb| rgb == [10, 20, 30]));
    }

    #[test]
    fn adf_black_and_white_is_mirrored() {
        let mut profile = DeviceProfile::plustek_ut12();
        profile.caps.adf = profile.caps.normal;
        let (mut processor, setup, _) =
            planned(&profile, &request(ImageType::BlackWhite, 300, ScanSource::Adf));
        assert_eq!(processor.emitter(), Emitter::Bit { pad: true });
        assert!(processor.orientation().mirror);

        let mut ring = processor.ring(1, 1);
        let raw = ring.chunk_mut(processor.phy_bytes());
        raw.fill(0);
        // Only the first physical pixel is set.
        raw[0] = 0x80;
        ring.commit();
        let mut out = vec![0u8; processor.bytes_per_line()];
        processor.process(&ring, &mut out).unwrap();
        let pixels = setup.param.size.pixels as usize;
        let last = pixels - 1;
        assert_eq!(out[last / 8], 0x80 >> (last % 8));
        assert!(out[..last / 8].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn film_averaging_above_800_dpi() {
        let profile = DeviceProfile::epson_1250();
        let (processor, _, _) =
            planned(&profile, &request(ImageType::Color24, 1200, ScanSource::Transparency));
        assert!(processor.average);
        let (processor, _, _) =
            planned(&profile, &request(ImageType::Color24, 600, ScanSource::Transparency));
        assert!(!processor.average);
        let (processor, _, _) =
            planned(&profile, &request(ImageType::Color24, 1200, ScanSource::Reflection));
        assert!(!processor.average);
    }

    #[test]
    fn short_output_is_rejected() {
        let profile = DeviceProfile::plustek_ut12();
        let (mut processor, _, _) =
            planned(&profile, &request(ImageType::Gray8, 300, ScanSource::Reflection));
        let ring = numbered_ring(&processor, 4);
        let needed = processor.bytes_per_line();
        let mut out = vec![0u8; needed - 1];
        let err = processor.process(&ring, &mut out).unwrap_err();
        assert!(matches!(
            err,
            LibraryError::BufferTooSmall { needed: n, got } if n == needed && got == needed - 1
        ));
    }
}
