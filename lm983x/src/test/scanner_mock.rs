// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
use std::cell::{Ref, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;

use crate::cancel::CancelToken;
use crate::device::DeviceProfile;
use crate::geometry::HorizontalDivider;
use crate::register::{address, RegisterSet, REGISTER_COUNT};
use crate::transport::{Lamp, LampSelect, Motion, MoveDirection, RawScan, RegisterIo, Transport};

const RECENT_OPERATIONS_QUEUE_LENGTH: usize = 32;

/// The black level every sample sits on with a zero offset register.
const BLACK_LEVEL: f64 = 2000.0;

/// How far one step of the offset register moves the black level.
const OFFSET_STEP: f64 = 200.0;

/// Full-scale CCD signal per channel at a master clock of 4, before vignetting and gain.
const CCD_SIGNAL: [f64; 3] = [20000.0, 21000.0, 19000.0];

/// How many 1/300" lines the dark calibration strip covers.
const DARK_STRIP_LINES: i64 = 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MockError {
    /// A read was made to fail on purpose.
    ReadFailed,

    /// A register access ran past the end of the register file.
    IllegalAccess(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ScannerOperation {
    Write { address: u8, length: usize },
    Read { address: u8, length: usize },
    WriteData { length: usize },
    Move { direction: MoveDirection, steps: u32 },
    Home,
    Lamp { lamp: LampSelect, on: bool },
    BeginScan,
    ReadRaw { length: usize },
    EndScan,
    ClearData,
}

#[derive(Debug)]
struct MockState {
    profile: DeviceProfile,
    regs: [u8; REGISTER_COUNT],
    lamp: Option<LampSelect>,
    /// Carriage position, in 1/300".
    position: i64,
    scanning: bool,
    generated: VecDeque<u8>,
    scripted: VecDeque<u8>,
    scans_started: usize,
    tables: HashMap<u8, Vec<u8>>,
    last_data: Vec<u8>,
    cancel_after: Option<(CancelToken, usize)>,
    warmup_scans: usize,
    fail_next_read: bool,
}

/// A simulated LM983x scanner.
///
/// The analog front end is modelled as a linear amplifier: every sample is the lamp signal
/// times the gain register's amplification, plus a black level the offset register moves in
/// steps of 200. CCD sensors see nothing left of the active pixel start, CIS sensors see light in
/// proportion to their lamp on-time. Clones share the same state, so a test can keep one handle
/// while the code under test owns another.
#[derive(Clone, Debug)]
pub(crate) struct MockScanner {
    state: Rc<RefCell<MockState>>,
    recent_operations: Rc<RefCell<VecDeque<ScannerOperation>>>,
}

impl MockScanner {
    /// A scanner with its carriage at home, the lamp on and the registers at their power-on
    /// values for `profile`.
    pub(crate) fn new(profile: DeviceProfile) -> Self {
        let regs = *RegisterSet::from_hardware(&profile.hw).as_bytes();
        Self {
            state: Rc::new(RefCell::new(MockState {
                profile,
                regs,
                lamp: Some(LampSelect::Normal),
                position: 0,
                scanning: false,
                generated: VecDeque::new(),
                scripted: VecDeque::new(),
                scans_started: 0,
                tables: HashMap::new(),
                last_data: Vec::new(),
                cancel_after: None,
                warmup_scans: 0,
                fail_next_read: false,
            })),
            recent_operations: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn add_operation(&self, operation: ScannerOperation) {
        let mut ops = self.recent_operations.borrow_mut();
        ops.push_front(operation);
        ops.truncate(RECENT_OPERATIONS_QUEUE_LENGTH);
    }

    /// The most recent operations, newest first.
    pub(crate) fn recent_operations(&self) -> Ref<VecDeque<ScannerOperation>> {
        self.recent_operations.borrow()
    }

    pub(crate) fn clear_recent_operations(&self) {
        self.recent_operations.borrow_mut().clear()
    }

    pub(crate) fn register(&self, address: u8) -> u8 {
        self.state.borrow().regs[address as usize]
    }

    /// The bytes of the most recent data port write.
    pub(crate) fn last_data(&self) -> Vec<u8> {
        self.state.borrow().last_data.clone()
    }

    /// The bytes last written into the shading table selected by `select` (register 0x03).
    pub(crate) fn table_data(&self, select: u8) -> Option<Vec<u8>> {
        self.state.borrow().tables.get(&select).cloned()
    }

    pub(crate) fn position(&self) -> i64 {
        self.state.borrow().position
    }

    pub(crate) fn set_position(&self, position: i64) {
        self.state.borrow_mut().position = position;
    }

    pub(crate) fn lamp(&self) -> Option<LampSelect> {
        self.state.borrow().lamp
    }

    pub(crate) fn scans_started(&self) -> usize {
        self.state.borrow().scans_started
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.borrow().scanning
    }

    /// Raise `token` once `scans` scans have been started.
    pub(crate) fn cancel_after(&self, token: CancelToken, scans: usize) {
        self.state.borrow_mut().cancel_after = Some((token, scans));
    }

    /// Dim the lamp over the first `scans` scans, the way a cold lamp behaves.
    pub(crate) fn set_warmup_scans(&self, scans: usize) {
        self.state.borrow_mut().warmup_scans = scans;
    }

    pub(crate) fn fail_next_read(&self) {
        self.state.borrow_mut().fail_next_read = true;
    }

    /// Serve `data` to the next reads, ahead of any simulated lines.
    pub(crate) fn queue_data(&self, data: &[u8]) {
        self.state.borrow_mut().scripted.extend(data.iter().copied());
    }
}

impl MockState {
    fn word(&self, address: u8) -> u16 {
        let idx = address as usize;
        u16::from_be_bytes([self.regs[idx], self.regs[idx + 1]])
    }

    fn on_dark_strip(&self) -> bool {
        let dark_y = i64::from(self.profile.caps.normal.dark_shading_origin_y);
        dark_y >= 0 && self.position >= dark_y && self.position < dark_y + DARK_STRIP_LINES
    }

    /// The lamp signal for one channel at pixel `idx` of `pixels`, before the front end.
    fn signal(&self, channel: usize, idx: usize, pixels: usize, x: f64) -> f64 {
        let lit = self.lamp.is_some() && self.regs[address::LAMP_MODE as usize] != 0;
        if !lit || self.on_dark_strip() {
            return 0.0;
        }
        let raw = if self.profile.is_cis() {
            let timing = address::LAMP_TIMING + (channel as u8) * 4;
            let on = self.word(timing);
            let off = self.word(timing + 2);
            8.0 * f64::from(off.saturating_sub(on))
        } else if x < f64::from(self.profile.hw.active_pixels_start) {
            0.0
        } else {
            let mclk = f64::from(self.regs[address::MCLK_DIVIDER as usize]) / 2.0 + 1.0;
            CCD_SIGNAL[channel] * mclk / 4.0
        };
        let center = pixels as f64 / 2.0;
        let spread = if center > 0.0 {
            (idx as f64 - center) / center
        } else {
            0.0
        };
        let vignette = 1.0 - 0.1 * spread * spread;
        let remaining = self.warmup_scans.saturating_sub(self.scans_started);
        let warmup = 1.0 - 0.02 * remaining as f64;
        raw * vignette * warmup
    }

    fn sample(&self, channel: usize, idx: usize, pixels: usize, x: f64) -> u16 {
        let gain = f64::from(self.regs[address::AFE_GAIN as usize + channel] & 0x3f);
        let amplification = if gain >= 32.0 {
            3.0 * (0.93 + 0.067 * (gain - 32.0))
        } else {
            0.93 + 0.067 * gain
        };
        let offset = self.regs[address::AFE_OFFSET as usize + channel] & 0x3f;
        let offset = if offset >= 32 {
            -f64::from(offset - 32)
        } else {
            f64::from(offset)
        };
        let value = self.signal(channel, idx, pixels, x) * amplification
            + BLACK_LEVEL
            + offset * OFFSET_STEP;
        value.clamp(0.0, 65535.0) as u16
    }

    /// Generate one line in the layout the current registers select.
    fn line(&self) -> Vec<u8> {
        let afe = self.regs[address::COLOR_MODE as usize] & 7;
        let resolution = self.regs[address::HORIZONTAL_RESOLUTION as usize];
        let bits = if resolution & 0x20 != 0 {
            16
        } else if resolution & 0x18 == 0x18 {
            8
        } else {
            1
        };
        let hdpi = HorizontalDivider::try_from(resolution & 7)
            .map(HorizontalDivider::factor)
            .unwrap_or(1.0);
        let start = self.word(address::DATA_PIXELS_START);
        let end = self.word(address::DATA_PIXELS_END);
        let pixels = (f64::from(end.saturating_sub(start)) / hdpi).round() as usize;
        let x = |idx: usize| f64::from(start) + idx as f64 * hdpi;

        let mut out = Vec::new();
        let mut push = |out: &mut Vec<u8>, value: u16| {
            if bits == 16 {
                out.extend_from_slice(&value.to_be_bytes());
            } else {
                out.push((value >> 8) as u8);
            }
        };
        match (afe, bits) {
            (_, 1) => {
                let mut byte = 0u8;
                for idx in 0..pixels {
                    if self.sample(1, idx, pixels, x(idx)) > 0x8000 {
                        byte |= 0x80 >> (idx % 8);
                    }
                    if idx % 8 == 7 {
                        out.push(byte);
                        byte = 0;
                    }
                }
                if pixels % 8 != 0 {
                    out.push(byte);
                }
                out.extend_from_slice(&[0, 0]);
            }
            (0, _) | (1, _) => {
                for idx in 0..pixels {
                    for channel in 0..3 {
                        push(&mut out, self.sample(channel, idx, pixels, x(idx)));
                    }
                }
                out.extend_from_slice(&[0, 0]);
            }
            (5, _) => {
                for channel in 0..3 {
                    for idx in 0..pixels {
                        push(&mut out, self.sample(channel, idx, pixels, x(idx)));
                    }
                    out.extend_from_slice(&[0, 0]);
                }
            }
            _ => {
                for idx in 0..pixels {
                    push(&mut out, self.sample(1, idx, pixels, x(idx)));
                }
                out.extend_from_slice(&[0, 0]);
            }
        }
        out
    }
}

impl Transport for MockScanner {
    type Error = MockError;
}

impl RegisterIo for MockScanner {
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::Read {
            address,
            length: buf.len(),
        });
        let start = address as usize;
        let state = self.state.borrow();
        let regs = state
            .regs
            .get(start..start + buf.len())
            .ok_or(MockError::IllegalAccess(address))?;
        buf.copy_from_slice(regs);
        Ok(())
    }

    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::Write {
            address,
            length: data.len(),
        });
        let start = address as usize;
        let mut state = self.state.borrow_mut();
        let regs = state
            .regs
            .get_mut(start..start + data.len())
            .ok_or(MockError::IllegalAccess(address))?;
        regs.copy_from_slice(data);
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::WriteData { length: data.len() });
        let mut state = self.state.borrow_mut();
        let select = state.regs[address::SHADING_SELECT as usize];
        state.tables.insert(select, data.to_vec());
        state.last_data = data.to_vec();
        Ok(())
    }
}

impl Motion for MockScanner {
    fn move_by(&mut self, direction: MoveDirection, steps: u32) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::Move { direction, steps });
        let mut state = self.state.borrow_mut();
        match direction {
            MoveDirection::Forward => state.position += i64::from(steps),
            MoveDirection::Backward => state.position = (state.position - i64::from(steps)).max(0),
        }
        Ok(())
    }

    fn move_to_home(&mut self) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::Home);
        self.state.borrow_mut().position = 0;
        Ok(())
    }

    fn is_at_home(&mut self) -> Result<bool, Self::Error> {
        Ok(self.state.borrow().position == 0)
    }

    fn is_moving(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl Lamp for MockScanner {
    fn set_lamp(&mut self, lamp: LampSelect, on: bool) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::Lamp { lamp, on });
        self.state.borrow_mut().lamp = if on { Some(lamp) } else { None };
        Ok(())
    }

    fn lamp_status(&mut self) -> Result<Option<LampSelect>, Self::Error> {
        Ok(self.state.borrow().lamp)
    }
}

impl RawScan for MockScanner {
    fn begin_scan(&mut self) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::BeginScan);
        let mut state = self.state.borrow_mut();
        state.regs[address::COMMAND as usize] = 3;
        state.scanning = true;
        state.generated.clear();
        state.scans_started += 1;
        let started = state.scans_started;
        if let Some((token, after)) = &state.cancel_after {
            if started >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::ReadRaw { length: buf.len() });
        let mut state = self.state.borrow_mut();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(MockError::ReadFailed);
        }
        for byte in buf.iter_mut() {
            if let Some(scripted) = state.scripted.pop_front() {
                *byte = scripted;
                continue;
            }
            if state.generated.is_empty() {
                let line = state.line();
                if line.is_empty() {
                    return Err(MockError::ReadFailed);
                }
                state.generated.extend(line);
            }
            *byte = state.generated.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn end_scan(&mut self) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::EndScan);
        let mut state = self.state.borrow_mut();
        state.regs[address::COMMAND as usize] = 0;
        state.scanning = false;
        Ok(())
    }

    fn data_available(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn clear_data(&mut self) -> Result<(), Self::Error> {
        self.add_operation(ScannerOperation::ClearData);
        self.state.borrow_mut().generated.clear();
        Ok(())
    }
}

/// A delay that only keeps count.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockDelay {
    total_ms: Rc<RefCell<u64>>,
}

impl MockDelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Milliseconds "slept" so far, across all clones.
    pub(crate) fn total_ms(&self) -> u64 {
        *self.total_ms.borrow()
    }
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        *self.total_ms.borrow_mut() += u64::from(ms);
    }
}
