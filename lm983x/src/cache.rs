// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Persisting calibration results between scans.
//!
//! Two text files live next to each other, `<base>-coarse.cal` for the analog front end settings
//! and `<base>-fine.cal` for the shading tables. Both start with a `version=` line, and hold one
//! entry per line after it, keyed by a prefix naming the scan source and data type.
//!
//! ```text
//! version=0x0002
//! color8=12,130,14,131,10,129,0,16383,0,0,0,16383,4095
//! tpa-color:600:dark:dim=15300:4096,4102,...
//! tpa-color:600:white:dim=15300:20123,20011,...
//! ```
//!
//! Anything unexpected in a file (wrong version, missing key, short value list) is treated as a
//! cache miss.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::device::{Adjustments, DataType, LampTiming, ScanSource};
use crate::error::LibraryError;
use crate::register::{address, RegisterSet};
use crate::shading::ShadingTable;

/// The file format version. Files with any other version are ignored, and replaced on save.
pub const CACHE_VERSION: u16 = 0x0002;

const VERSION_KEY: &str = "version=";

/// What a cache entry applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheKey {
    pub source: ScanSource,
    pub data_type: DataType,
    pub bit_depth: u8,
}

impl CacheKey {
    fn prefix(&self) -> String {
        let source = match self.source {
            ScanSource::Transparency => "tpa-",
            ScanSource::Negative => "neg-",
            ScanSource::Adf => "adf-",
            ScanSource::Reflection => "",
        };
        let data_type = match self.data_type {
            DataType::Color => "color",
            _ => "gray",
        };
        format!("{}{}", source, data_type)
    }

    fn coarse_key(&self) -> String {
        format!("{}{}=", self.prefix(), self.bit_depth)
    }

    fn fine_key(&self, dpi: u32) -> String {
        format!("{}:{}:", self.prefix(), dpi)
    }
}

/// The result of coarse calibration, as cached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CoarseCalibration {
    pub gain: [u8; 3],
    pub offset: [u8; 3],
    pub lamp: LampTiming,
    pub green_pwm_duty: u16,
}

impl CoarseCalibration {
    /// Capture the current front end and lamp settings.
    pub fn from_registers(regs: &RegisterSet) -> Self {
        let lamp_word = |idx: u8| regs.word(address::LAMP_TIMING + idx * 2);
        Self {
            gain: [regs.afe_gain(0), regs.afe_gain(1), regs.afe_gain(2)],
            offset: [regs.afe_offset(0), regs.afe_offset(1), regs.afe_offset(2)],
            lamp: LampTiming {
                red_on: lamp_word(0),
                red_off: lamp_word(1),
                green_on: lamp_word(2),
                green_off: lamp_word(3),
                blue_on: lamp_word(4),
                blue_off: lamp_word(5),
            },
            green_pwm_duty: regs.green_pwm_duty(),
        }
    }

    /// Restore the cached settings into a register file.
    pub fn apply(&self, regs: &mut RegisterSet) {
        for channel in 0..3 {
            regs.set_afe_gain(channel, self.gain[channel]);
            regs.set_afe_offset(channel, self.offset[channel]);
        }
        regs.set_green_pwm_duty(self.green_pwm_duty);
        regs.range_mut(address::LAMP_TIMING, 12)
            .copy_from_slice(&self.lamp.to_registers());
    }

    fn format(&self) -> String {
        let l = &self.lamp;
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.gain[0],
            self.offset[0],
            self.gain[1],
            self.offset[1],
            self.gain[2],
            self.offset[2],
            l.red_on,
            l.red_off,
            l.green_on,
            l.green_off,
            l.blue_on,
            l.blue_off,
            self.green_pwm_duty
        )
    }

    fn parse(text: &str) -> Result<Self, LibraryError> {
        let values = text
            .trim()
            .split(',')
            .map(|v| v.trim().parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| LibraryError::CacheMismatch("unparseable coarse values"))?;
        if values.len() != 13 {
            return Err(LibraryError::CacheMismatch("wrong number of coarse values"));
        }
        let byte = |v: u16| v as u8;
        Ok(Self {
            gain: [byte(values[0]), byte(values[2]), byte(values[4])],
            offset: [byte(values[1]), byte(values[3]), byte(values[5])],
            lamp: LampTiming {
                red_on: values[6],
                red_off: values[7],
                green_on: values[8],
                green_off: values[9],
                blue_on: values[10],
                blue_off: values[11],
            },
            green_pwm_duty: values[12],
        })
    }
}

/// Reads and writes the calibration cache files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CalibrationCache {
    base: Option<PathBuf>,
    calibration_mode: bool,
}

impl CalibrationCache {
    /// A cache at `base`. With no base path, every load misses and every save is skipped.
    pub fn new(base: Option<PathBuf>) -> Self {
        Self {
            base,
            calibration_mode: false,
        }
    }

    /// The cache selected by the caller's adjustments. Caching has to be switched on explicitly.
    pub fn from_adjustments(adj: &Adjustments) -> Self {
        Self {
            base: adj.cache_path.clone().filter(|_| adj.cache_calibration),
            calibration_mode: adj.calibration_mode,
        }
    }

    /// In calibration mode nothing is read from the cache, it is only being filled.
    pub fn set_calibration_mode(&mut self, enabled: bool) {
        self.calibration_mode = enabled;
    }

    pub fn coarse_path(&self) -> Option<PathBuf> {
        self.path("-coarse.cal")
    }

    pub fn fine_path(&self) -> Option<PathBuf> {
        self.path("-fine.cal")
    }

    fn path(&self, suffix: &str) -> Option<PathBuf> {
        self.base.as_ref().map(|base| {
            let mut name = base.clone().into_os_string();
            name.push(suffix);
            PathBuf::from(name)
        })
    }

    /// Look up cached coarse calibration results.
    pub fn load_coarse(&self, key: &CacheKey) -> Result<Option<CoarseCalibration>, LibraryError> {
        let text = match self.readable(self.coarse_path())? {
            Some(text) => text,
            None => return Ok(None),
        };
        let found = find_entry(&text, &key.coarse_key())
            .ok_or(LibraryError::CacheMismatch("no coarse entry"))
            .and_then(CoarseCalibration::parse);
        Ok(miss_on_mismatch(found, "coarse"))
    }

    /// Store coarse calibration results, keeping the entries for other keys.
    pub fn save_coarse(&self, key: &CacheKey, cal: &CoarseCalibration) -> Result<(), LibraryError> {
        let path = match self.coarse_path() {
            Some(path) => path,
            None => return Ok(()),
        };
        let entry = key.coarse_key();
        let mut text = version_line();
        text.push_str(&format!("{}{}\n", entry, cal.format()));
        text.push_str(&compatible_entries(&path, &entry)?);
        fs::write(&path, text)?;
        info!(path = %path.display(), "saved coarse calibration");
        Ok(())
    }

    /// Look up a cached shading table, captured at `dpi` across the whole sensor.
    pub fn load_fine(
        &self,
        key: &CacheKey,
        dpi: u32,
    ) -> Result<Option<ShadingTable>, LibraryError> {
        let text = match self.readable(self.fine_path())? {
            Some(text) => text,
            None => return Ok(None),
        };
        let prefix = key.fine_key(dpi);
        let found = parse_samples(&text, &format!("{}dark:dim=", prefix)).and_then(|dark| {
            let white = parse_samples(&text, &format!("{}white:dim=", prefix))?;
            if dark.len() % 3 != 0 || dark.len() != white.len() {
                return Err(LibraryError::CacheMismatch("dark and white sizes differ"));
            }
            ShadingTable::from_parts(dark.len() / 3, dark, white)
        });
        Ok(miss_on_mismatch(found, "fine"))
    }

    /// Store a shading table captured at `dpi`, keeping the entries for other keys.
    pub fn save_fine(
        &self,
        key: &CacheKey,
        dpi: u32,
        table: &ShadingTable,
    ) -> Result<(), LibraryError> {
        let path = match self.fine_path() {
            Some(path) => path,
            None => return Ok(()),
        };
        let prefix = key.fine_key(dpi);
        let mut text = version_line();
        text.push_str(&compatible_entries(&path, &prefix)?);
        text.push_str(&fine_entry(&prefix, "dark", table.dark()));
        text.push_str(&fine_entry(&prefix, "white", table.white()));
        fs::write(&path, text)?;
        info!(path = %path.display(), dpi, "saved fine calibration");
        Ok(())
    }

    /// The contents of a cache file that may be read from, if it exists and has the right version.
    fn readable(&self, path: Option<PathBuf>) -> Result<Option<String>, LibraryError> {
        if self.calibration_mode {
            debug!("calibration mode, not reading the cache");
            return Ok(None);
        }
        let path = match path {
            Some(path) => path,
            None => return Ok(None),
        };
        let text = match read_optional(&path)? {
            Some(text) => text,
            None => {
                debug!(path = %path.display(), "no calibration cache");
                return Ok(None);
            }
        };
        if file_version(&text) != Some(CACHE_VERSION) {
            debug!(path = %path.display(), "calibration cache version mismatch");
            return Ok(None);
        }
        Ok(Some(text))
    }
}

fn miss_on_mismatch<T>(found: Result<T, LibraryError>, which: &str) -> Option<T> {
    match found {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(%err, "{} calibration cache miss", which);
            None
        }
    }
}

/// One `<prefix><name>:dim=<n>:<values>` line of the fine file.
fn fine_entry(prefix: &str, name: &str, values: &[u16]) -> String {
    let joined: Vec<String> = values.iter().map(u16::to_string).collect();
    format!("{}{}:dim={}:{}\n", prefix, name, values.len(), joined.join(","))
}

fn version_line() -> String {
    format!("{}0x{:04X}\n", VERSION_KEY, CACHE_VERSION)
}

fn read_optional(path: &Path) -> Result<Option<String>, LibraryError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn file_version(text: &str) -> Option<u16> {
    let value = find_entry(text, VERSION_KEY)?;
    let hex = value.trim().strip_prefix("0x")?;
    u16::from_str_radix(hex, 16).ok()
}

/// The rest of the first line starting with `key`.
fn find_entry<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| line.strip_prefix(key))
}

/// Every entry of an existing file of the current version, except the ones starting with
/// `except`.
fn compatible_entries(path: &Path, except: &str) -> Result<String, LibraryError> {
    let text = match read_optional(path)? {
        Some(text) if file_version(&text) == Some(CACHE_VERSION) => text,
        _ => return Ok(String::new()),
    };
    let mut kept = String::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(VERSION_KEY) || line.starts_with(except) {
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
    }
    Ok(kept)
}

fn parse_samples(text: &str, key: &str) -> Result<Vec<u16>, LibraryError> {
    let entry = find_entry(text, key).ok_or(LibraryError::CacheMismatch("no fine entry"))?;
    let (dim, values) = entry
        .split_once(':')
        .ok_or(LibraryError::CacheMismatch("no fine dimension"))?;
    let dim: usize = dim
        .trim()
        .parse()
        .map_err(|_| LibraryError::CacheMismatch("unparseable fine dimension"))?;
    let values = values
        .trim()
        .split(',')
        .map(|v| v.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LibraryError::CacheMismatch("unparseable fine values"))?;
    if values.len() != dim {
        return Err(LibraryError::CacheMismatch("short fine value list"));
    }
    Ok(values)
}
