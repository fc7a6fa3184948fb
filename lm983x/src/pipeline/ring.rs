// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! The host side buffer raw scan lines are read into.
use arrayvec::ArrayVec;
use tracing::trace;

/// Bytes reserved for the ring when the caller doesn't ask for a particular size.
pub const DEFAULT_RING_BYTES: usize = 8 * 1024 * 1024;

/// Where one color channel is read from.
///
/// `seed` is the byte position of the channel's first sample, `shift` the position within a line
/// it returns to when the ring wraps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelCursor {
    pub seed: usize,
    pub shift: usize,
}

impl ChannelCursor {
    pub fn new(seed: usize, shift: usize) -> Self {
        Self { seed, shift }
    }
}

/// A ring of raw scan lines, filled a chunk at a time and drained a line at a time.
///
/// Every channel has its own read position. CCD color channels start a few lines apart so the
/// three sensor rows, which see the page at different times, line up again. When a read position
/// runs off the end it starts over at the beginning of the ring, at its offset within a line.
#[derive(Clone, Debug)]
pub struct ScanRing {
    buf: Vec<u8>,
    line_bytes: usize,
    chunk_lines: usize,
    write: usize,
    cursors: ArrayVec<ChannelCursor, 3>,
    positions: ArrayVec<usize, 3>,
    reseed_together: bool,
}

impl ScanRing {
    /// A ring of at least `min_lines` lines, rounded up to whole chunks.
    ///
    /// `reseed_together` makes a wrap of any channel reset all of them, for sensors that deliver
    /// all three colors in the same line.
    pub fn new(
        line_bytes: usize,
        chunk_lines: usize,
        min_lines: usize,
        cursors: ArrayVec<ChannelCursor, 3>,
        reseed_together: bool,
    ) -> Self {
        let chunk_lines = chunk_lines.max(1);
        let chunks = ((min_lines + chunk_lines - 1) / chunk_lines).max(1);
        let lines = chunks * chunk_lines;
        trace!(lines, line_bytes, "ring allocated");
        let positions = cursors.iter().map(|cursor| cursor.seed).collect();
        Self {
            buf: vec![0; lines * line_bytes],
            line_bytes,
            chunk_lines,
            write: 0,
            cursors,
            positions,
            reseed_together,
        }
    }

    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    pub fn chunk_lines(&self) -> usize {
        self.chunk_lines
    }

    pub fn capacity_lines(&self) -> usize {
        self.buf.len() / self.line_bytes.max(1)
    }

    /// The space the next chunk is read into.
    ///
    /// `bytes` is clamped to one chunk. Calling this again without [`ScanRing::commit`] hands out
    /// the same space, which is how lines that are thrown away get read.
    pub fn chunk_mut(&mut self, bytes: usize) -> &mut [u8] {
        let len = bytes.min(self.chunk_lines * self.line_bytes);
        &mut self.buf[self.write..self.write + len]
    }

    /// Keep the chunk last handed out by [`ScanRing::chunk_mut`].
    pub fn commit(&mut self) {
        self.write += self.chunk_lines * self.line_bytes;
        if self.write >= self.buf.len() {
            self.write = 0;
        }
    }

    /// The bytes from the read position of `channel` to the end of the ring.
    pub fn channel(&self, channel: usize) -> &[u8] {
        let start = self.positions.get(channel).copied().unwrap_or(0);
        &self.buf[start.min(self.buf.len())..]
    }

    /// Move every channel on by one line.
    ///
    /// Returns whether any channel wrapped.
    pub fn advance(&mut self) -> bool {
        let end = self.buf.len();
        let mut wrapped = false;
        for (position, cursor) in self.positions.iter_mut().zip(self.cursors.iter()) {
            *position += self.line_bytes;
            if *position >= end {
                *position = cursor.shift;
                wrapped = true;
            }
        }
        if wrapped && self.reseed_together {
            for (position, cursor) in self.positions.iter_mut().zip(self.cursors.iter()) {
                *position = cursor.shift;
            }
        }
        wrapped
    }
}
