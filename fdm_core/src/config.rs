//! Core configuration structs.
//!
//! These are the plain, validated values the engine consumes. The TOML and
//! persisted-settings layers live in `fdm_config`; the CLI converts between
//! the two.

use crate::motion::block::NUM_AXES;

/// Motion limits and floors, per axis where applicable (X, Y, Z, E order).
#[derive(Debug, Clone)]
pub struct MotionCfg {
    pub axis_steps_per_mm: [f32; NUM_AXES],
    pub max_feedrate_mm_s: [f32; NUM_AXES],
    pub max_acceleration_mm_per_s2: [u32; NUM_AXES],
    /// Largest instantaneous per-axis speed change at a junction (mm/s).
    pub max_jerk_mm_s: [f32; NUM_AXES],
    /// Default acceleration for printing moves (mm/s^2).
    pub acceleration: f32,
    /// Acceleration for E-only moves (mm/s^2).
    pub retract_acceleration: f32,
    /// Acceleration for non-printing moves (mm/s^2).
    pub travel_acceleration: f32,
    pub min_feedrate_mm_s: f32,
    pub min_travel_feedrate_mm_s: f32,
    /// Segment-time floor used by the drain slowdown (us).
    pub min_segment_time_us: u32,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            axis_steps_per_mm: [80.0, 80.0, 400.0, 100.0],
            max_feedrate_mm_s: [300.0, 300.0, 5.0, 25.0],
            max_acceleration_mm_per_s2: [1500, 1500, 100, 10_000],
            max_jerk_mm_s: [10.0, 10.0, 0.4, 5.0],
            acceleration: 1000.0,
            retract_acceleration: 3000.0,
            travel_acceleration: 1000.0,
            min_feedrate_mm_s: 0.05,
            min_travel_feedrate_mm_s: 0.05,
            min_segment_time_us: 20_000,
        }
    }
}

/// Which control law drives the hotend duty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterManagerKind {
    /// Full power below target - hysteresis, off above target + hysteresis.
    BangBang,
    /// Classic PID on the temperature error, output clamped to 0..=255.
    Pid { kp: f32, ki: f32, kd: f32 },
}

/// Thermal limits and guard timing.
#[derive(Debug, Clone)]
pub struct ThermalCfg {
    pub hotend_min_temp_c: i16,
    pub hotend_max_temp_c: i16,
    pub bed_min_temp_c: i16,
    pub bed_max_temp_c: i16,
    /// Extrusion below this hotend temperature is collapsed (cold extrude).
    pub min_extrude_temp_c: i16,
    pub allow_cold_extrude: bool,
    /// Bang-bang hysteresis band (degC).
    pub hysteresis_c: f32,
    pub manager: HeaterManagerKind,
    /// Watch-rise: expect `watch_increase_c` of rise within `watch_period_ms`
    /// after a setpoint is applied.
    pub watch_period_ms: u64,
    pub watch_increase_c: i16,
    pub bed_watch_period_ms: u64,
    pub bed_watch_increase_c: i16,
    /// Runaway: while Stable, temperature must revisit
    /// target - runaway_hysteresis_c at least every runaway_period_ms.
    pub runaway_period_ms: u64,
    pub runaway_hysteresis_c: f32,
    pub bed_runaway_period_ms: u64,
    pub bed_runaway_hysteresis_c: f32,
}

impl Default for ThermalCfg {
    fn default() -> Self {
        Self {
            hotend_min_temp_c: 5,
            hotend_max_temp_c: 275,
            bed_min_temp_c: 5,
            bed_max_temp_c: 120,
            min_extrude_temp_c: 170,
            allow_cold_extrude: false,
            hysteresis_c: 2.0,
            manager: HeaterManagerKind::BangBang,
            watch_period_ms: 20_000,
            watch_increase_c: 2,
            bed_watch_period_ms: 60_000,
            bed_watch_increase_c: 2,
            runaway_period_ms: 40_000,
            runaway_hysteresis_c: 4.0,
            bed_runaway_period_ms: 20_000,
            bed_runaway_hysteresis_c: 2.0,
        }
    }
}

/// Inactivity housekeeping.
#[derive(Debug, Clone)]
pub struct SafetyCfg {
    /// Disable steppers after this long without a queued move (0 disables).
    pub stepper_inactive_ms: u64,
    /// Maximum E length admitted in one move (mm); longer is collapsed.
    pub max_extrude_length_mm: f32,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            stepper_inactive_ms: 120_000,
            max_extrude_length_mm: 200.0,
        }
    }
}
