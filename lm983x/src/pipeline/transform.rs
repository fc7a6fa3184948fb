// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! The parts a [`LineProcessor`][super::LineProcessor] is assembled from.
//!
//! Raw lines go through four stages. A [`ChannelSource`] pulls the samples of each color out of
//! the ring, a [`Resampler`] picks which physical sample each output pixel shows, an [`Emitter`]
//! encodes the result, and an [`Orientation`] decides where in the output line it lands.
use arrayvec::ArrayVec;
use bitvec::prelude::*;

use super::ring::{ChannelCursor, ScanRing};
use crate::device::SensorOrder;
use crate::util::be_u16_at;

/// Fixed point scale of the [`Resampler`] accumulator.
pub const SCALER: i64 = 1000;

/// How wide each raw sample is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleDepth {
    Bit,
    Byte,
    /// Big-endian 16-bit words.
    Word,
}

impl SampleDepth {
    pub fn from_bit_depth(bits: u8) -> Self {
        match bits {
            1 => SampleDepth::Bit,
            2..=8 => SampleDepth::Byte,
            _ => SampleDepth::Word,
        }
    }

    /// Bytes per sample. Bits are rounded up to a byte.
    pub fn bytes(self) -> usize {
        match self {
            SampleDepth::Word => 2,
            _ => 1,
        }
    }

    /// Sample `x` of `data`, where consecutive samples of a channel are `stride` samples apart.
    fn read(self, data: &[u8], stride: usize, x: usize) -> u16 {
        match self {
            SampleDepth::Bit => data
                .view_bits::<Msb0>()
                .get(x)
                .map_or(0, |bit| u16::from(*bit)),
            SampleDepth::Byte => data.get(x * stride).map_or(0, |&byte| u16::from(byte)),
            SampleDepth::Word => {
                let index = x * stride;
                if (index + 1) * 2 <= data.len() {
                    be_u16_at(data, index)
                } else {
                    0
                }
            }
        }
    }
}

/// Where the samples of each color channel are found in the raw data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelSource {
    /// A CCD delivering red, green and blue of a pixel next to each other.
    ///
    /// The color rows sit `line_distance` lines apart on the sensor, in `order`.
    Interleaved {
        order: SensorOrder,
        line_distance: usize,
    },
    /// A CIS sending a whole line of each color in turn. `planes` gives the plane holding red,
    /// green and blue.
    Planes { planes: [usize; 3] },
    /// Gray or black and white.
    Single,
}

impl ChannelSource {
    /// Planes for a one-channel color CIS.
    ///
    /// Only RGB and GBR ordered sensors exist. Anything else is treated as RGB.
    pub fn planes(order: SensorOrder) -> Self {
        let planes = match order {
            SensorOrder::Gbr => [2, 0, 1],
            _ => [0, 1, 2],
        };
        ChannelSource::Planes { planes }
    }

    pub fn channels(&self) -> usize {
        match self {
            ChannelSource::Single => 1,
            _ => 3,
        }
    }

    /// Starting positions for each channel in a ring of `line_bytes` lines.
    pub fn cursors(&self, line_bytes: usize, depth: SampleDepth) -> ArrayVec<ChannelCursor, 3> {
        match *self {
            ChannelSource::Interleaved {
                order,
                line_distance,
            } => {
                let rows = order.rows();
                (0..3)
                    .map(|channel| {
                        let row = rows.iter().position(|&c| c == channel).unwrap_or(channel);
                        let shift = channel * depth.bytes();
                        ChannelCursor::new(row * line_distance * line_bytes + shift, shift)
                    })
                    .collect()
            }
            ChannelSource::Planes { planes } => planes
                .iter()
                .map(|&plane| {
                    let offset = plane * line_bytes / 3;
                    ChannelCursor::new(offset, offset)
                })
                .collect(),
            ChannelSource::Single => {
                let mut cursors = ArrayVec::new();
                cursors.push(ChannelCursor::new(0, 0));
                cursors
            }
        }
    }

    /// Whether a wrap of one channel has to reset all of them.
    pub fn reseeds_together(&self) -> bool {
        matches!(self, ChannelSource::Planes { .. })
    }

    /// Copy `pixels` samples of every channel at the ring's read positions into `samples`.
    pub fn gather(
        &self,
        ring: &ScanRing,
        depth: SampleDepth,
        pixels: usize,
        samples: &mut ArrayVec<Vec<u16>, 3>,
    ) {
        let stride = match self {
            ChannelSource::Interleaved { .. } => 3,
            _ => 1,
        };
        samples.truncate(self.channels());
        while samples.len() < self.channels() {
            samples.push(Vec::with_capacity(pixels));
        }
        for (channel, plane) in samples.iter_mut().enumerate() {
            let data = ring.channel(channel);
            plane.clear();
            plane.extend((0..pixels).map(|x| depth.read(data, stride, x)));
        }
    }
}

/// Replace every sample with the mean of itself and its right neighbour.
///
/// Film scans at high resolutions are noisy enough to need it.
pub fn average_neighbours(samples: &mut [u16], depth: SampleDepth) {
    for x in 0..samples.len().saturating_sub(1) {
        let (here, next) = (samples[x], samples[x + 1]);
        samples[x] = match depth {
            SampleDepth::Word => (((here >> 2) + (next >> 2)) / 2) << 2,
            _ => ((u32::from(here) + u32::from(next)) / 2) as u16,
        };
    }
}

/// Maps output pixels to physical samples.
///
/// An accumulator in units of 1/1000 output pixel steps through the physical samples. It skips
/// samples when the physical resolution is higher than the requested one, repeats them when it is
/// lower, and copies them one to one otherwise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resampler {
    map: Vec<usize>,
}

impl Resampler {
    pub fn new(phy_dpi: u32, user_dpi: u32, phy_pixels: usize, pixels: usize) -> Self {
        let last = phy_pixels.saturating_sub(1);
        if user_dpi == 0 || user_dpi == phy_dpi {
            return Self {
                map: (0..pixels).map(|x| x.min(last)).collect(),
            };
        }
        let ratio = f64::from(user_dpi) / f64::from(phy_dpi);
        let zoom = ((1.0 / ratio * SCALER as f64) as i64).max(1);
        let mut map = Vec::with_capacity(pixels);
        let mut dda = 0i64;
        let mut sample = 0usize;
        while map.len() < pixels {
            dda -= SCALER;
            while dda < 0 && map.len() < pixels {
                map.push(sample.min(last));
                dda += zoom;
            }
            sample += 1;
        }
        Self { map }
    }

    /// The output width.
    pub fn pixels(&self) -> usize {
        self.map.len()
    }

    /// The physical sample output pixel `x` shows.
    pub fn source(&self, x: usize) -> usize {
        self.map[x]
    }

    pub fn is_identity(&self) -> bool {
        self.map.iter().enumerate().all(|(x, &sample)| x == sample)
    }
}

/// Where output pixels and lines land.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Orientation {
    /// Sheet feeders pull the page in backwards, so their lines are mirrored.
    pub mirror: bool,
    /// The image is delivered last line first.
    pub bottom_up: bool,
}

impl Orientation {
    /// The position of output pixel `x` in a line of `pixels`.
    pub fn position(&self, x: usize, pixels: usize) -> usize {
        if self.mirror {
            pixels - 1 - x
        } else {
            x
        }
    }
}

/// How output samples are encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Emitter {
    /// 8-bit samples, one byte each.
    Byte,
    /// 16-bit samples in host byte order, shifted right by `shift`.
    Word { shift: u8 },
    /// 16-bit samples built from 8-bit ones: the sum of a sample and its left neighbour, shifted
    /// left by `shift`.
    Pseudo16 { shift: u8 },
    /// One bit per pixel, most significant bit first, set for any nonzero sample. Unused bits at
    /// the end of the line are `pad`.
    Bit { pad: bool },
}

impl Emitter {
    /// Bytes needed for `pixels` pixels of `channels` channels.
    pub fn line_bytes(&self, pixels: usize, channels: usize) -> usize {
        match self {
            Emitter::Byte => pixels * channels,
            Emitter::Word { .. } | Emitter::Pseudo16 { .. } => pixels * channels * 2,
            Emitter::Bit { .. } => (pixels + 7) / 8,
        }
    }

    /// Encode one line into `out`.
    ///
    /// `channels` lists the sample planes to emit for each pixel, in output order.
    pub fn emit(
        &self,
        samples: &[Vec<u16>],
        channels: &[usize],
        resampler: &Resampler,
        orientation: Orientation,
        out: &mut [u8],
    ) {
        let pixels = resampler.pixels();
        let width = channels.len();
        let at = |plane: usize, x: usize| samples[plane].get(x).copied().unwrap_or(0);
        match *self {
            Emitter::Byte => {
                for x in 0..pixels {
                    let sample = resampler.source(x);
                    let base = orientation.position(x, pixels) * width;
                    for (k, &plane) in channels.iter().enumerate() {
                        out[base + k] = at(plane, sample) as u8;
                    }
                }
            }
            Emitter::Word { shift } => {
                for x in 0..pixels {
                    let sample = resampler.source(x);
                    let base = orientation.position(x, pixels) * width;
                    for (k, &plane) in channels.iter().enumerate() {
                        let value = at(plane, sample) >> shift;
                        let offset = (base + k) * 2;
                        out[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
                    }
                }
            }
            Emitter::Pseudo16 { shift } => {
                for x in 0..pixels {
                    let sample = resampler.source(x);
                    let base = orientation.position(x, pixels) * width;
                    for (k, &plane) in channels.iter().enumerate() {
                        let previous = u32::from(at(plane, sample.saturating_sub(1)));
                        let value = ((previous + u32::from(at(plane, sample))) << shift) as u16;
                        let offset = (base + k) * 2;
                        out[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
                    }
                }
            }
            Emitter::Bit { pad } => {
                let plane = channels.first().copied().unwrap_or(0);
                let bytes = self.line_bytes(pixels, 1).min(out.len());
                out[..bytes].fill(if pad { 0xff } else { 0 });
                let bits = out[..bytes].view_bits_mut::<Msb0>();
                for x in 0..pixels {
                    let set = at(plane, resampler.source(x)) != 0;
                    bits.set(orientation.position(x, pixels), set);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resampler_decimates() {
        let resampler = Resampler::new(600, 300, 8, 4);
        assert_eq!(resampler.map, vec![0, 2, 4, 6]);
    }

    #[test]
    fn resampler_repeats() {
        let resampler = Resampler::new(300, 600, 3, 6);
        assert_eq!(resampler.map, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn resampler_uneven_ratio() {
        // 400 from 600: two of every three samples.
        let resampler = Resampler::new(600, 400, 6, 4);
        assert_eq!(resampler.map, vec![0, 1, 3, 4]);
    }

    #[test]
    fn resampler_identity() {
        let resampler = Resampler::new(300, 300, 5, 5);
        assert!(resampler.is_identity());
        // Never reads past the last physical sample.
        let resampler = Resampler::new(300, 300, 3, 5);
        assert_eq!(resampler.map, vec![0, 1, 2, 2, 2]);
    }

    #[test]
    fn samples_by_depth() {
        let data = [0b1010_0000u8, 0x12, 0x34, 0x56];
        assert_eq!(SampleDepth::Bit.read(&data, 1, 0), 1);
        assert_eq!(SampleDepth::Bit.read(&data, 1, 1), 0);
        assert_eq!(SampleDepth::Bit.read(&data, 1, 2), 1);
        assert_eq!(SampleDepth::Byte.read(&data, 3, 1), 0x56);
        assert_eq!(SampleDepth::Word.read(&data, 1, 1), 0x3456);
        assert_eq!(SampleDepth::Word.read(&data, 1, 2), 0);
    }

    #[test]
    fn film_averaging() {
        let mut bytes = vec![10, 20, 40, 40];
        average_neighbours(&mut bytes, SampleDepth::Byte);
        assert_eq!(bytes, vec![15, 30, 40, 40]);
        let mut words = vec![400, 800];
        average_neighbours(&mut words, SampleDepth::Word);
        assert_eq!(words, vec![600, 800]);
    }

    #[test]
    fn interleaved_cursors_follow_sensor_order() {
        let source = ChannelSource::Interleaved {
            order: SensorOrder::Gbr,
            line_distance: 4,
        };
        let cursors = source.cursors(100, SampleDepth::Byte);
        // Green leads, blue is one distance behind, red two.
        assert_eq!(cursors[0], ChannelCursor::new(800, 0));
        assert_eq!(cursors[1], ChannelCursor::new(1, 1));
        assert_eq!(cursors[2], ChannelCursor::new(402, 2));

        let words = ChannelSource::Interleaved {
            order: SensorOrder::Rgb,
            line_distance: 2,
        }
        .cursors(50, SampleDepth::Word);
        assert_eq!(words[1], ChannelCursor::new(102, 2));
        assert_eq!(words[2], ChannelCursor::new(204, 4));
    }

    #[test]
    fn plane_cursors() {
        let cursors = ChannelSource::planes(SensorOrder::Gbr).cursors(30, SampleDepth::Byte);
        assert_eq!(cursors[0], ChannelCursor::new(20, 20));
        assert_eq!(cursors[1], ChannelCursor::new(0, 0));
        assert_eq!(cursors[2], ChannelCursor::new(10, 10));
    }

    #[test]
    fn pseudo16_adds_the_left_neighbour() {
        let samples = vec![vec![10u16, 20, 30]];
        let resampler = Resampler::new(300, 300, 3, 3);
        let mut out = [0u8; 6];
        let emitter = Emitter::Pseudo16 { shift: 7 };
        emitter.emit(&samples, &[0], &resampler, Orientation::default(), &mut out);
        let values: Vec<u16> = out
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(values, vec![20 << 7, 30 << 7, 50 << 7]);
    }

    #[test]
    fn words_are_host_order_and_shifted() {
        let samples = vec![vec![0xfffcu16, 0x0004]];
        let resampler = Resampler::new(300, 300, 2, 2);
        let mut out = [0u8; 4];
        let emitter = Emitter::Word { shift: 2 };
        emitter.emit(&samples, &[0], &resampler, Orientation::default(), &mut out);
        assert_eq!(u16::from_ne_bytes([out[0], out[1]]), 0x3fff);
        assert_eq!(u16::from_ne_bytes([out[2], out[3]]), 1);
    }

    #[test]
    fn mirrored_bits_pad_with_ones() {
        let samples = vec![vec![1u16, 0, 0, 1, 1]];
        let resampler = Resampler::new(300, 300, 5, 5);
        let mut out = [0u8; 1];
        let emitter = Emitter::Bit { pad: false };
        emitter.emit(&samples, &[0], &resampler, Orientation::default(), &mut out);
        assert_eq!(out[0], 0b1001_1000);

        let mirror = Orientation {
            mirror: true,
            bottom_up: false,
        };
        Emitter::Bit { pad: true }.emit(&samples, &[0], &resampler, mirror, &mut out);
        assert_eq!(out[0], 0b1100_1111);
    }

    #[test]
    fn channel_selection_and_order() {
        let samples = vec![vec![1u16, 2], vec![3, 4], vec![5, 6]];
        let resampler = Resampler::new(300, 300, 2, 2);
        let mut out = [0u8; 6];
        Emitter::Byte.emit(&samples, &[2, 1, 0], &resampler, Orientation::default(), &mut out);
        assert_eq!(out, [5, 3, 1, 6, 4, 2]);

        let mut gray = [0u8; 2];
        let mirror = Orientation {
            mirror: true,
            bottom_up: false,
        };
        Emitter::Byte.emit(&samples, &[1], &resampler, mirror, &mut gray);
        assert_eq!(gray, [4, 3]);
    }
}
