//! Fixed-point temperatures and the monotone piecewise-linear
//! ADC-to-temperature conversion.
//!
//! Raw values are in oversampled units: the sampler accumulates
//! `OVERSAMPLE` 10-bit conversions per published reading, so table raws
//! span 0..=1023*OVERSAMPLE. NTC thermistors with a pull-up read *high* when
//! cold: raw ascends as temperature descends.

use std::ops::{Add, Sub};

/// Oversampling factor shared by the sampler and the tables.
pub const OVERSAMPLE: u16 = 16;

/// Temperature in 1/16 degC steps (signed).
///
/// Four fractional bits cover the full printer range in an i32 with room to
/// spare, and keep every controller comparison in one integer unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Celsius(i32);

impl Celsius {
    pub const SCALE: i32 = 16;
    pub const ZERO: Celsius = Celsius(0);

    #[inline]
    pub const fn from_whole(deg: i16) -> Self {
        Celsius(deg as i32 * Self::SCALE)
    }

    #[inline]
    pub fn from_f32(deg: f32) -> Self {
        Celsius((deg * Self::SCALE as f32).round() as i32)
    }

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Celsius(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Celsius {
    type Output = Celsius;
    fn add(self, rhs: Celsius) -> Celsius {
        Celsius(self.0 + rhs.0)
    }
}

impl Sub for Celsius {
    type Output = Celsius;
    fn sub(self, rhs: Celsius) -> Celsius {
        Celsius(self.0 - rhs.0)
    }
}

/// Piecewise-linear (raw, degC) table, raw strictly ascending and degC
/// strictly descending (NTC polarity).
pub struct ThermistorTable {
    entries: &'static [(u16, i16)],
}

const OVR: u16 = OVERSAMPLE;

/// EPCOS-100k-class NTC, 4.7k pull-up, 10-bit ADC, 16x oversampled.
static NTC_100K_ENTRIES: [(u16, i16); 36] = [
    (23 * OVR, 300),
    (27 * OVR, 290),
    (31 * OVR, 280),
    (35 * OVR, 270),
    (41 * OVR, 260),
    (48 * OVR, 250),
    (56 * OVR, 240),
    (66 * OVR, 230),
    (78 * OVR, 220),
    (92 * OVR, 210),
    (109 * OVR, 200),
    (131 * OVR, 190),
    (156 * OVR, 180),
    (187 * OVR, 170),
    (224 * OVR, 160),
    (268 * OVR, 150),
    (320 * OVR, 140),
    (379 * OVR, 130),
    (445 * OVR, 120),
    (516 * OVR, 110),
    (591 * OVR, 100),
    (665 * OVR, 90),
    (737 * OVR, 80),
    (801 * OVR, 70),
    (857 * OVR, 60),
    (903 * OVR, 50),
    (939 * OVR, 40),
    (966 * OVR, 30),
    (977 * OVR, 25),
    (985 * OVR, 20),
    (993 * OVR, 15),
    (999 * OVR, 10),
    (1004 * OVR, 5),
    (1008 * OVR, 0),
    (1012 * OVR, -10),
    (1016 * OVR, -20),
];

pub static HOTEND_TABLE: ThermistorTable = ThermistorTable {
    entries: &NTC_100K_ENTRIES,
};

/// Stock beds use the same thermistor type.
pub static BED_TABLE: ThermistorTable = ThermistorTable {
    entries: &NTC_100K_ENTRIES,
};

impl ThermistorTable {
    /// Clamp a raw reading into the calibrated span.
    pub fn clamp_adc(&self, raw: u16) -> u16 {
        let lo = self.entries[0].0;
        let hi = self.entries[self.entries.len() - 1].0;
        raw.clamp(lo, hi)
    }

    /// Convert an oversampled raw reading to temperature, interpolating
    /// linearly between table vertices and clamping at the ends.
    pub fn adc_to_celsius(&self, raw: u16) -> Celsius {
        let e = self.entries;
        if raw <= e[0].0 {
            return Celsius::from_whole(e[0].1);
        }
        let last = e.len() - 1;
        if raw >= e[last].0 {
            return Celsius::from_whole(e[last].1);
        }
        // Invariant: e[i].0 < raw <= e[i+1].0 for some i.
        let mut i = 0;
        while raw > e[i + 1].0 {
            i += 1;
        }
        let (r0, t0) = e[i];
        let (r1, t1) = e[i + 1];
        let span = i64::from(r1) - i64::from(r0);
        let offset = i64::from(raw) - i64::from(r0);
        let t0_raw = i64::from(Celsius::from_whole(t0).raw());
        let t1_raw = i64::from(Celsius::from_whole(t1).raw());
        let interpolated = t0_raw + (t1_raw - t0_raw) * offset / span;
        Celsius::from_raw(interpolated as i32)
    }

    /// Inverse conversion; exact on table vertices, used by guard-threshold
    /// precomputation and the simulation backends.
    pub fn celsius_to_adc(&self, temp: Celsius) -> u16 {
        let e = self.entries;
        let t = i64::from(temp.raw());
        if t >= i64::from(Celsius::from_whole(e[0].1).raw()) {
            return e[0].0;
        }
        let last = e.len() - 1;
        if t <= i64::from(Celsius::from_whole(e[last].1).raw()) {
            return e[last].0;
        }
        // degC descends with the index; find the bracketing segment.
        let mut i = 0;
        while t < i64::from(Celsius::from_whole(e[i + 1].1).raw()) {
            i += 1;
        }
        let (r0, t0) = e[i];
        let (r1, t1) = e[i + 1];
        let t0_raw = i64::from(Celsius::from_whole(t0).raw());
        let t1_raw = i64::from(Celsius::from_whole(t1).raw());
        let span = t1_raw - t0_raw; // negative
        let raw = i64::from(r0) + (t - t0_raw) * (i64::from(r1) - i64::from(r0)) / span;
        raw as u16
    }

    /// True when `raw` reads a temperature at or above `limit`.
    /// For NTC polarity that means raw at or below the limit's raw.
    pub fn reads_at_or_above(&self, raw: u16, limit: Celsius) -> bool {
        raw <= self.celsius_to_adc(limit)
    }

    /// True when `raw` reads a temperature at or below `limit`.
    pub fn reads_at_or_below(&self, raw: u16, limit: Celsius) -> bool {
        raw >= self.celsius_to_adc(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_round_trips_fractions() {
        let c = Celsius::from_f32(203.5);
        assert_eq!(c.to_f32(), 203.5);
        assert_eq!(Celsius::from_whole(200).to_f32(), 200.0);
    }

    #[test]
    fn conversion_is_monotone_nonincreasing() {
        let mut last = Celsius::from_whole(i16::MAX);
        for raw in 0..=1023 * OVERSAMPLE {
            let t = HOTEND_TABLE.adc_to_celsius(raw);
            assert!(t <= last, "not monotone at raw {raw}");
            last = t;
        }
    }

    #[test]
    fn inverse_is_exact_on_vertices() {
        for &(raw, deg) in NTC_100K_ENTRIES.iter() {
            let t = HOTEND_TABLE.adc_to_celsius(raw);
            assert_eq!(t, Celsius::from_whole(deg));
            assert_eq!(HOTEND_TABLE.celsius_to_adc(t), raw);
        }
    }

    #[test]
    fn guard_comparisons_honor_polarity() {
        let limit = Celsius::from_whole(275);
        let hot_raw = HOTEND_TABLE.celsius_to_adc(Celsius::from_whole(290));
        let cool_raw = HOTEND_TABLE.celsius_to_adc(Celsius::from_whole(200));
        assert!(HOTEND_TABLE.reads_at_or_above(hot_raw, limit));
        assert!(!HOTEND_TABLE.reads_at_or_above(cool_raw, limit));
        let floor = Celsius::from_whole(5);
        let open_circuit = 1023 * OVERSAMPLE; // disconnected sensor reads max
        assert!(HOTEND_TABLE.reads_at_or_below(HOTEND_TABLE.clamp_adc(open_circuit), floor));
    }

    #[test]
    fn out_of_range_raw_clamps() {
        assert_eq!(
            HOTEND_TABLE.adc_to_celsius(0),
            Celsius::from_whole(NTC_100K_ENTRIES[0].1)
        );
        let last = NTC_100K_ENTRIES[NTC_100K_ENTRIES.len() - 1];
        assert_eq!(HOTEND_TABLE.adc_to_celsius(u16::MAX), Celsius::from_whole(last.1));
    }
}
