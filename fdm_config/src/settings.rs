//! The persisted settings image.
//!
//! Little-endian, fields packed in a fixed order, prefixed by a version tag
//! and suffixed by a CRC16 over the payload. A version or CRC mismatch on
//! load is a typed error, never a partial read. Writes go through a
//! temp-file rename so a crash mid-save leaves the previous image intact.

use std::io::Write;
use std::path::Path;
use std::{fs, io};

use thiserror::Error;

/// Image format tag; bump on any layout change.
pub const SETTINGS_VERSION: &[u8; 4] = b"FDM3";

/// Everything that survives a power cycle, in image order.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub axis_steps_per_mm: [f32; 4],
    pub max_feedrate_mm_s: [f32; 4],
    pub max_acceleration_mm_s2: [u32; 4],
    pub acceleration: f32,
    pub retract_acceleration: f32,
    pub travel_acceleration: f32,
    pub min_feedrate_mm_s: f32,
    pub min_travel_feedrate_mm_s: f32,
    pub min_segment_time_us: u32,
    pub max_jerk_mm_s: [f32; 4],
    pub home_offset_mm: [f32; 3],
    pub hotend_pid: [f32; 3],
    pub bed_pid: [f32; 3],
    pub min_extrude_temp_c: i16,
    /// (hotend degC, bed degC) presets for the three materials.
    pub preheat_presets: [(u16, u8); 3],
    pub fan_speed: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            axis_steps_per_mm: [80.0, 80.0, 400.0, 100.0],
            max_feedrate_mm_s: [300.0, 300.0, 5.0, 25.0],
            max_acceleration_mm_s2: [1500, 1500, 100, 10_000],
            acceleration: 1000.0,
            retract_acceleration: 3000.0,
            travel_acceleration: 1000.0,
            min_feedrate_mm_s: 0.05,
            min_travel_feedrate_mm_s: 0.05,
            min_segment_time_us: 20_000,
            max_jerk_mm_s: [10.0, 10.0, 0.4, 5.0],
            home_offset_mm: [0.0; 3],
            hotend_pid: [22.2, 1.08, 114.0],
            bed_pid: [10.0, 0.023, 305.4],
            min_extrude_temp_c: 170,
            preheat_presets: [(195, 60), (240, 100), (230, 90)],
            fan_speed: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown settings version")]
    Version,
    #[error("settings image checksum mismatch")]
    Crc,
    #[error("settings image truncated")]
    Truncated,
}

/// CRC16-CCITT (0x1021, MSB-first), the same update the original settings
/// store runs over its payload.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SettingsError> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or(SettingsError::Truncated)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
    fn f32(&mut self) -> Result<f32, SettingsError> {
        Ok(f32::from_le_bytes(self.take::<4>()?))
    }
    fn u32(&mut self) -> Result<u32, SettingsError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }
    fn i16(&mut self) -> Result<i16, SettingsError> {
        Ok(i16::from_le_bytes(self.take::<2>()?))
    }
    fn u16(&mut self) -> Result<u16, SettingsError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }
    fn u8(&mut self) -> Result<u8, SettingsError> {
        Ok(self.take::<1>()?[0])
    }
}

impl Settings {
    /// Serialize to the image payload (no version tag, no CRC).
    fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer { buf: Vec::with_capacity(128) };
        for v in self.axis_steps_per_mm {
            w.f32(v);
        }
        for v in self.max_feedrate_mm_s {
            w.f32(v);
        }
        for v in self.max_acceleration_mm_s2 {
            w.u32(v);
        }
        w.f32(self.acceleration);
        w.f32(self.retract_acceleration);
        w.f32(self.travel_acceleration);
        w.f32(self.min_feedrate_mm_s);
        w.f32(self.min_travel_feedrate_mm_s);
        w.u32(self.min_segment_time_us);
        for v in self.max_jerk_mm_s {
            w.f32(v);
        }
        for v in self.home_offset_mm {
            w.f32(v);
        }
        for v in self.hotend_pid {
            w.f32(v);
        }
        for v in self.bed_pid {
            w.f32(v);
        }
        w.i16(self.min_extrude_temp_c);
        for (hotend, bed) in self.preheat_presets {
            w.u16(hotend);
            w.u8(bed);
        }
        w.u8(self.fan_speed);
        w.buf
    }

    /// Full image: version tag, payload, CRC16 (LE).
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut image = Vec::with_capacity(payload.len() + 6);
        image.extend_from_slice(SETTINGS_VERSION);
        image.extend_from_slice(&payload);
        image.extend_from_slice(&crc16(&payload).to_le_bytes());
        image
    }

    pub fn decode(image: &[u8]) -> Result<Self, SettingsError> {
        if image.len() < SETTINGS_VERSION.len() + 2 {
            return Err(SettingsError::Truncated);
        }
        let (tag, rest) = image.split_at(SETTINGS_VERSION.len());
        if tag != SETTINGS_VERSION {
            return Err(SettingsError::Version);
        }
        let (payload, crc_bytes) = rest.split_at(rest.len() - 2);
        let stored = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if crc16(payload) != stored {
            return Err(SettingsError::Crc);
        }

        let mut r = Reader { buf: payload, pos: 0 };
        let mut axis_steps_per_mm = [0.0f32; 4];
        for v in &mut axis_steps_per_mm {
            *v = r.f32()?;
        }
        let mut max_feedrate_mm_s = [0.0f32; 4];
        for v in &mut max_feedrate_mm_s {
            *v = r.f32()?;
        }
        let mut max_acceleration_mm_s2 = [0u32; 4];
        for v in &mut max_acceleration_mm_s2 {
            *v = r.u32()?;
        }
        let acceleration = r.f32()?;
        let retract_acceleration = r.f32()?;
        let travel_acceleration = r.f32()?;
        let min_feedrate_mm_s = r.f32()?;
        let min_travel_feedrate_mm_s = r.f32()?;
        let min_segment_time_us = r.u32()?;
        let mut max_jerk_mm_s = [0.0f32; 4];
        for v in &mut max_jerk_mm_s {
            *v = r.f32()?;
        }
        let mut home_offset_mm = [0.0f32; 3];
        for v in &mut home_offset_mm {
            *v = r.f32()?;
        }
        let mut hotend_pid = [0.0f32; 3];
        for v in &mut hotend_pid {
            *v = r.f32()?;
        }
        let mut bed_pid = [0.0f32; 3];
        for v in &mut bed_pid {
            *v = r.f32()?;
        }
        let min_extrude_temp_c = r.i16()?;
        let mut preheat_presets = [(0u16, 0u8); 3];
        for preset in &mut preheat_presets {
            preset.0 = r.u16()?;
            preset.1 = r.u8()?;
        }
        let fan_speed = r.u8()?;

        Ok(Self {
            axis_steps_per_mm,
            max_feedrate_mm_s,
            max_acceleration_mm_s2,
            acceleration,
            retract_acceleration,
            travel_acceleration,
            min_feedrate_mm_s,
            min_travel_feedrate_mm_s,
            min_segment_time_us,
            max_jerk_mm_s,
            home_offset_mm,
            hotend_pid,
            bed_pid,
            min_extrude_temp_c,
            preheat_presets,
            fan_speed,
        })
    }
}

/// Write the image through a temp file + rename so the stored settings are
/// always either the old or the new version, never torn.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&settings.encode())?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let image = fs::read(path)?;
    Settings::decode(&image)
}
