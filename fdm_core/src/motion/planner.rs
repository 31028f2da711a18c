//! The block builder: admits Cartesian target positions into the ring as
//! fully planned movement blocks.

use std::sync::Arc;

use fdm_traits::StepperPort;
use tracing::{debug, trace, warn};

use crate::config::{MotionCfg, SafetyCfg};
use crate::error::{BuildError, PlanError};

use super::block::{
    Block, BlockFlags, E_AXIS, FAN_COUNT, MIN_STEPS_PER_SEGMENT, NUM_AXES, X_AXIS, Y_AXIS, Z_AXIS,
};
use super::lookahead;
use super::queue::{BLOCK_BUFFER_SIZE, BlockQueue};
use super::trapezoid::max_allowable_speed;

/// Tool count. The API takes an extruder index so a larger count is a
/// constant change, but the pipeline assumes one command stream.
pub const EXTRUDERS: usize = 1;

/// Logical axis, in motor order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    E = 3,
}

impl Axis {
    pub const ALL: [Axis; NUM_AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The planner: ring buffer ownership, per-axis state carried across
/// admissions, and every runtime-settable limit.
pub struct Planner {
    queue: Arc<BlockQueue>,
    cfg: MotionCfg,
    safety: SafetyCfg,

    // Derived from cfg; refreshed whenever steps/mm or accelerations change.
    steps_to_mm: [f32; NUM_AXES],
    max_acceleration_steps_per_s2: [u32; NUM_AXES],
    /// Above this step_event_count the per-axis acceleration limit switches
    /// from integer to float arithmetic to avoid overflow.
    cutoff_long: u32,

    /// Integer step position reflecting the end of the last queued block.
    position_steps: [i32; NUM_AXES],
    /// Per-axis speed vector of the last enqueued block (mm/s, signed).
    previous_speed: [f32; NUM_AXES],
    previous_nominal_speed: f32,
    previous_safe_speed: f32,

    flow_percentage: [u16; EXTRUDERS],
    volumetric_multiplier: [f32; EXTRUDERS],
    feedrate_percentage: u16,
    fan_speed: [u8; FAN_COUNT],

    stepper: Arc<dyn StepperPort + Send + Sync>,
    /// When this returns true, E deltas are collapsed instead of extruded.
    cold_extrude_check: Option<Box<dyn Fn() -> bool + Send>>,
}

impl Planner {
    /// Validate the limits and build the planner. Derived rates are
    /// divisions by the configured values, so nothing non-finite or
    /// non-positive gets past here.
    pub fn new(
        cfg: MotionCfg,
        safety: SafetyCfg,
        stepper: Arc<dyn StepperPort + Send + Sync>,
    ) -> Result<Self, BuildError> {
        validate_cfg(&cfg)?;
        let mut planner = Self {
            queue: Arc::new(BlockQueue::new()),
            cfg,
            safety,
            steps_to_mm: [0.0; NUM_AXES],
            max_acceleration_steps_per_s2: [0; NUM_AXES],
            cutoff_long: 0,
            position_steps: [0; NUM_AXES],
            previous_speed: [0.0; NUM_AXES],
            previous_nominal_speed: 0.0,
            previous_safe_speed: 0.0,
            flow_percentage: [100; EXTRUDERS],
            volumetric_multiplier: [1.0; EXTRUDERS],
            feedrate_percentage: 100,
            fan_speed: [0; FAN_COUNT],
            stepper,
            cold_extrude_check: None,
        };
        planner.refresh_positioning_derived();
        Ok(planner)
    }

    /// Consumer-side handle to the ring.
    pub fn queue(&self) -> Arc<BlockQueue> {
        Arc::clone(&self.queue)
    }

    pub fn moves_planned(&self) -> usize {
        self.queue.moves_planned()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued block (emergency stop path).
    pub fn flush(&self) {
        self.queue.flush();
    }

    // ── Runtime limit setters ────────────────────────────────────────────

    pub fn set_steps_per_mm(&mut self, axis: Axis, steps: f32) {
        self.cfg.axis_steps_per_mm[axis.index()] = steps;
        self.refresh_positioning_derived();
    }

    pub fn set_max_feedrate(&mut self, axis: Axis, mm_s: f32) {
        self.cfg.max_feedrate_mm_s[axis.index()] = mm_s;
    }

    pub fn set_max_acceleration(&mut self, axis: Axis, mm_s2: u32) {
        self.cfg.max_acceleration_mm_per_s2[axis.index()] = mm_s2;
        self.reset_acceleration_rates();
    }

    pub fn set_max_jerk(&mut self, axis: Axis, mm_s: f32) {
        self.cfg.max_jerk_mm_s[axis.index()] = mm_s;
    }

    pub fn set_acceleration(&mut self, mm_s2: f32) {
        self.cfg.acceleration = mm_s2;
    }

    pub fn set_retract_acceleration(&mut self, mm_s2: f32) {
        self.cfg.retract_acceleration = mm_s2;
    }

    pub fn set_travel_acceleration(&mut self, mm_s2: f32) {
        self.cfg.travel_acceleration = mm_s2;
    }

    pub fn set_min_feedrate(&mut self, mm_s: f32) {
        self.cfg.min_feedrate_mm_s = mm_s;
    }

    pub fn set_min_travel_feedrate(&mut self, mm_s: f32) {
        self.cfg.min_travel_feedrate_mm_s = mm_s;
    }

    pub fn set_min_segment_time(&mut self, us: u32) {
        self.cfg.min_segment_time_us = us;
    }

    pub fn set_flow_percentage(&mut self, extruder: usize, percent: u16) {
        if let Some(slot) = self.flow_percentage.get_mut(extruder) {
            *slot = percent;
        }
    }

    pub fn set_volumetric_multiplier(&mut self, extruder: usize, factor: f32) {
        if let Some(slot) = self.volumetric_multiplier.get_mut(extruder) {
            *slot = factor;
        }
    }

    pub fn set_feedrate_percentage(&mut self, percent: u16) {
        self.feedrate_percentage = percent.max(1);
    }

    pub fn set_fan_speed(&mut self, fan: usize, duty: u8) {
        if let Some(slot) = self.fan_speed.get_mut(fan) {
            *slot = duty;
        }
    }

    pub fn fan_speed(&self, fan: usize) -> u8 {
        self.fan_speed.get(fan).copied().unwrap_or(0)
    }

    pub fn set_cold_extrude_check<F>(&mut self, check: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.cold_extrude_check = Some(Box::new(check));
    }

    pub fn cfg(&self) -> &MotionCfg {
        &self.cfg
    }

    // ── Position management ──────────────────────────────────────────────

    /// Align the planner, the stepper counters, and the junction state to a
    /// known position, e.g. after homing. Resets junction speeds: assumes
    /// start from rest.
    pub fn set_position_mm_all(&mut self, target_mm: [f32; NUM_AXES]) {
        for i in 0..NUM_AXES {
            self.position_steps[i] = lround(target_mm[i] * self.cfg.axis_steps_per_mm[i]);
            self.stepper.set_position(i, self.position_steps[i]);
        }
        self.previous_nominal_speed = 0.0;
        self.previous_safe_speed = 0.0;
        self.previous_speed = [0.0; NUM_AXES];
    }

    pub fn set_position_mm(&mut self, axis: Axis, mm: f32) {
        let i = axis.index();
        self.position_steps[i] = lround(mm * self.cfg.axis_steps_per_mm[i]);
        self.stepper.set_position(i, self.position_steps[i]);
        self.previous_speed[i] = 0.0;
    }

    /// Refresh `position` from the stepper's own counters after an
    /// interrupted move.
    pub fn sync_from_steppers(&mut self) {
        for i in 0..NUM_AXES {
            self.position_steps[i] = self.stepper.position(i);
        }
    }

    pub fn position_steps(&self) -> [i32; NUM_AXES] {
        self.position_steps
    }

    pub fn position_mm(&self) -> [f32; NUM_AXES] {
        let mut out = [0.0; NUM_AXES];
        for i in 0..NUM_AXES {
            out[i] = self.position_steps[i] as f32 * self.steps_to_mm[i];
        }
        out
    }

    /// Recompute steps/s^2 limits and the long-arithmetic cutoff after a
    /// steps-per-mm or acceleration change.
    pub fn reset_acceleration_rates(&mut self) {
        let mut highest_rate = 1u32;
        for i in 0..NUM_AXES {
            let rate =
                (self.cfg.max_acceleration_mm_per_s2[i] as f32 * self.cfg.axis_steps_per_mm[i])
                    as u32;
            self.max_acceleration_steps_per_s2[i] = rate;
            highest_rate = highest_rate.max(rate);
        }
        self.cutoff_long = u32::MAX / highest_rate;
    }

    fn refresh_positioning_derived(&mut self) {
        for i in 0..NUM_AXES {
            self.steps_to_mm[i] = 1.0 / self.cfg.axis_steps_per_mm[i];
        }
        self.reset_acceleration_rates();
    }

    fn cold_extrude_active(&self) -> bool {
        self.cold_extrude_check.as_ref().is_some_and(|check| check())
    }

    // ── Block admission ──────────────────────────────────────────────────

    /// Admit a linear move to `target_mm` at `fr_mm_s`.
    ///
    /// Returns Ok(true) when a block was queued, Ok(false) when the move was
    /// too short and dropped (position still advances), and
    /// `PlanError::QueueFull` when there is no room; callers that want the
    /// blocking behavior wait on `is_full` with their idle routine first.
    pub fn buffer_line(
        &mut self,
        target_mm: [f32; NUM_AXES],
        fr_mm_s: f32,
        extruder: u8,
    ) -> Result<bool, PlanError> {
        if usize::from(extruder) >= EXTRUDERS {
            return Err(PlanError::BadExtruder(extruder));
        }
        if target_mm.iter().any(|v| !v.is_finite()) || !fr_mm_s.is_finite() {
            return Err(PlanError::BadTarget);
        }
        if self.queue.is_full() {
            return Err(PlanError::QueueFull);
        }

        let ext = usize::from(extruder);
        let fr_scaled = fr_mm_s * f32::from(self.feedrate_percentage) * 0.01;

        // Target in absolute steps.
        let mut target = [0i32; NUM_AXES];
        for i in 0..NUM_AXES {
            target[i] = lround(target_mm[i] * self.cfg.axis_steps_per_mm[i]);
        }

        let da = target[X_AXIS] - self.position_steps[X_AXIS];
        let db = target[Y_AXIS] - self.position_steps[Y_AXIS];
        let dc = target[Z_AXIS] - self.position_steps[Z_AXIS];
        let mut de = target[E_AXIS] - self.position_steps[E_AXIS];

        // Cold / overlong extrusion collapses the E component: behave as if
        // the extrusion took place but move nothing.
        if de != 0 {
            if self.cold_extrude_active() {
                self.position_steps[E_AXIS] = target[E_AXIS];
                de = 0;
                warn!("cold extrusion prevented");
            } else if (de.unsigned_abs() as f32 * self.steps_to_mm[E_AXIS])
                > self.safety.max_extrude_length_mm
            {
                self.position_steps[E_AXIS] = target[E_AXIS];
                de = 0;
                warn!("overlong extrusion prevented");
            }
        }

        let mut direction_bits = 0u8;
        if da < 0 {
            direction_bits |= 1 << X_AXIS;
        }
        if db < 0 {
            direction_bits |= 1 << Y_AXIS;
        }
        if dc < 0 {
            direction_bits |= 1 << Z_AXIS;
        }
        if de < 0 {
            direction_bits |= 1 << E_AXIS;
        }

        let esteps_float = de as f32
            * self.volumetric_multiplier[ext]
            * f32::from(self.flow_percentage[ext])
            * 0.01;
        let esteps = (esteps_float.abs() + 0.5) as u32;

        let steps = [
            da.unsigned_abs(),
            db.unsigned_abs(),
            dc.unsigned_abs(),
            esteps,
        ];
        let step_event_count = steps.iter().copied().max().unwrap_or(0);

        // Too short to be worth a block. Not an error; the remainder is
        // absorbed into the next admission by leaving position unchanged.
        if step_event_count < MIN_STEPS_PER_SEGMENT {
            trace!(step_event_count, "segment below minimum, dropped");
            return Ok(false);
        }

        let mut delta_mm = [0.0f32; NUM_AXES];
        delta_mm[X_AXIS] = da as f32 * self.steps_to_mm[X_AXIS];
        delta_mm[Y_AXIS] = db as f32 * self.steps_to_mm[Y_AXIS];
        delta_mm[Z_AXIS] = dc as f32 * self.steps_to_mm[Z_AXIS];
        delta_mm[E_AXIS] = esteps_float * self.steps_to_mm[E_AXIS];

        let millimeters = if steps[X_AXIS] < MIN_STEPS_PER_SEGMENT
            && steps[Y_AXIS] < MIN_STEPS_PER_SEGMENT
            && steps[Z_AXIS] < MIN_STEPS_PER_SEGMENT
        {
            delta_mm[E_AXIS].abs()
        } else {
            (delta_mm[X_AXIS] * delta_mm[X_AXIS]
                + delta_mm[Y_AXIS] * delta_mm[Y_AXIS]
                + delta_mm[Z_AXIS] * delta_mm[Z_AXIS])
                .sqrt()
        };
        let inverse_millimeters = 1.0 / millimeters;

        // Feedrate floors.
        let fr_mm_s = if esteps > 0 {
            fr_scaled.max(self.cfg.min_feedrate_mm_s)
        } else {
            fr_scaled.max(self.cfg.min_travel_feedrate_mm_s)
        };

        let mut inverse_mm_s = fr_mm_s * inverse_millimeters;

        let moves_queued = self.queue.moves_planned();

        // Slow down when the buffer starts to drain rather than stall at a
        // corner waiting for a refill.
        let mut segment_time_us = (1_000_000.0 / inverse_mm_s) as u32;
        if (2..=BLOCK_BUFFER_SIZE / 2 - 1).contains(&moves_queued)
            && segment_time_us < self.cfg.min_segment_time_us
        {
            let deficit = self.cfg.min_segment_time_us - segment_time_us;
            let padded = segment_time_us + 2 * deficit / moves_queued as u32;
            inverse_mm_s = 1_000_000.0 / padded as f32;
            segment_time_us = padded;
        }

        let mut nominal_speed = millimeters * inverse_mm_s;
        let mut nominal_rate = (step_event_count as f32 * inverse_mm_s).ceil() as u32;

        // Per-axis speed clamp: scale everything by the worst violation.
        let mut current_speed = [0.0f32; NUM_AXES];
        for i in 0..NUM_AXES {
            current_speed[i] = delta_mm[i] * inverse_mm_s;
        }
        let mut speed_factor = 1.0f32;
        for i in 0..NUM_AXES {
            let cs = current_speed[i].abs();
            if cs > self.cfg.max_feedrate_mm_s[i] {
                speed_factor = speed_factor.min(self.cfg.max_feedrate_mm_s[i] / cs);
            }
        }
        if speed_factor < 1.0 {
            for speed in &mut current_speed {
                *speed *= speed_factor;
            }
            nominal_speed *= speed_factor;
            nominal_rate = (nominal_rate as f32 * speed_factor) as u32;
        }

        // Acceleration, limited per axis in the step domain.
        let steps_per_mm = step_event_count as f32 * inverse_millimeters;
        let mut accel: u32;
        if steps[X_AXIS] == 0 && steps[Y_AXIS] == 0 && steps[Z_AXIS] == 0 {
            accel = (self.cfg.retract_acceleration * steps_per_mm).ceil() as u32;
        } else {
            let base = if esteps > 0 {
                self.cfg.acceleration
            } else {
                self.cfg.travel_acceleration
            };
            accel = (base * steps_per_mm).ceil() as u32;
            if step_event_count <= self.cutoff_long {
                for i in 0..NUM_AXES {
                    let max_accel = self.max_acceleration_steps_per_s2[i];
                    if steps[i] != 0 && max_accel < accel {
                        let comp = u64::from(max_accel) * u64::from(step_event_count);
                        if u64::from(accel) * u64::from(steps[i]) > comp {
                            accel = (comp / u64::from(steps[i])) as u32;
                        }
                    }
                }
            } else {
                for i in 0..NUM_AXES {
                    let max_accel = self.max_acceleration_steps_per_s2[i];
                    if steps[i] != 0 && max_accel < accel {
                        let comp = max_accel as f32 * step_event_count as f32;
                        if accel as f32 * steps[i] as f32 > comp {
                            accel = (comp / steps[i] as f32) as u32;
                        }
                    }
                }
            }
        }
        let acceleration = accel as f32 / steps_per_mm;

        // Safe speed: the speed from which a full instantaneous halt
        // respects every per-axis jerk limit. The first violating axis sets
        // the floor; later violations shrink it proportionally.
        let mut safe_speed = nominal_speed;
        let mut limited = 0u8;
        for i in 0..NUM_AXES {
            let jerk = current_speed[i].abs();
            let maxj = self.cfg.max_jerk_mm_s[i];
            if jerk > maxj {
                if limited > 0 {
                    let mjerk = maxj * nominal_speed;
                    if jerk * safe_speed > mjerk {
                        safe_speed = mjerk / jerk;
                    }
                } else {
                    limited += 1;
                    safe_speed = maxj;
                }
            }
        }

        // Junction speed with the previous segment.
        let mut flags = BlockFlags::default();
        let mut vmax_junction;
        if moves_queued > 0 && self.previous_nominal_speed > 0.0001 {
            // The junction velocity is shared between the two segments and
            // cannot exceed the smaller nominal speed.
            let prev_speed_larger = self.previous_nominal_speed > nominal_speed;
            let smaller_speed_factor = if prev_speed_larger {
                nominal_speed / self.previous_nominal_speed
            } else {
                self.previous_nominal_speed / nominal_speed
            };
            vmax_junction = if prev_speed_larger {
                nominal_speed
            } else {
                self.previous_nominal_speed
            };
            let mut v_factor = 1.0f32;
            let mut jerk_limited = false;
            for axis in 0..NUM_AXES {
                let mut v_exit = self.previous_speed[axis];
                let mut v_entry = current_speed[axis];
                if prev_speed_larger {
                    v_exit *= smaller_speed_factor;
                }
                if jerk_limited {
                    v_exit *= v_factor;
                    v_entry *= v_factor;
                }

                // Coasting keeps the sign; a reversal pays for the larger
                // of the two magnitudes.
                let jerk = if v_exit > v_entry {
                    if v_entry > 0.0 || v_exit < 0.0 {
                        v_exit - v_entry
                    } else {
                        v_exit.max(-v_entry)
                    }
                } else if v_entry < 0.0 || v_exit > 0.0 {
                    v_entry - v_exit
                } else {
                    (-v_exit).max(v_entry)
                };

                if jerk > self.cfg.max_jerk_mm_s[axis] {
                    v_factor *= self.cfg.max_jerk_mm_s[axis] / jerk;
                    jerk_limited = true;
                }
            }
            if jerk_limited {
                vmax_junction *= v_factor;
            }
            // When both safe speeds already exceed the junction speed the
            // machine effectively stops at the corner anyway; start the
            // segment from its own safe speed.
            let vmax_junction_threshold = vmax_junction * 0.99;
            if self.previous_safe_speed > vmax_junction_threshold
                && safe_speed > vmax_junction_threshold
            {
                flags.set(BlockFlags::START_FROM_FULL_HALT);
                vmax_junction = safe_speed;
            }
        } else {
            flags.set(BlockFlags::START_FROM_FULL_HALT);
            vmax_junction = safe_speed;
        }

        let v_allowable = max_allowable_speed(-acceleration, 0.0, millimeters);
        flags.set(BlockFlags::RECALCULATE);
        if nominal_speed <= v_allowable {
            // Long enough to reach nominal from rest and stop again: the
            // junction speeds at both ends are always attainable.
            flags.set(BlockFlags::NOMINAL_LENGTH);
        }

        let block = Block {
            flags,
            active_extruder: extruder,
            steps,
            step_event_count,
            direction_bits,
            millimeters,
            nominal_speed,
            entry_speed: vmax_junction.min(v_allowable),
            max_entry_speed: vmax_junction,
            acceleration,
            nominal_rate,
            initial_rate: 0,
            final_rate: 0,
            acceleration_steps_per_s2: accel,
            acceleration_rate: 0,
            accelerate_until: 0,
            decelerate_after: 0,
            fan_speed: self.fan_speed,
            segment_time_us,
        };

        if !self.queue.push(block) {
            return Err(PlanError::QueueFull);
        }

        self.previous_speed = current_speed;
        self.previous_nominal_speed = nominal_speed;
        self.previous_safe_speed = safe_speed;
        self.position_steps = target;

        debug!(
            steps = step_event_count,
            mm = millimeters,
            nominal_mm_s = nominal_speed,
            entry_mm_s = block.entry_speed,
            "block queued"
        );

        lookahead::recalculate(&self.queue);
        self.stepper.wake();
        Ok(true)
    }
}

fn validate_cfg(cfg: &MotionCfg) -> Result<(), BuildError> {
    if cfg
        .axis_steps_per_mm
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return Err(BuildError::InvalidConfig("steps_per_mm must be finite and > 0"));
    }
    if cfg
        .max_feedrate_mm_s
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return Err(BuildError::InvalidConfig("max_feedrate must be finite and > 0"));
    }
    if cfg.max_acceleration_mm_per_s2.iter().any(|v| *v == 0) {
        return Err(BuildError::InvalidConfig("max_acceleration must be > 0"));
    }
    if cfg
        .max_jerk_mm_s
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return Err(BuildError::InvalidConfig("max_jerk must be finite and >= 0"));
    }
    for accel in [
        cfg.acceleration,
        cfg.retract_acceleration,
        cfg.travel_acceleration,
    ] {
        if !accel.is_finite() || accel <= 0.0 {
            return Err(BuildError::InvalidConfig(
                "accelerations must be finite and > 0",
            ));
        }
    }
    if !cfg.min_feedrate_mm_s.is_finite()
        || cfg.min_feedrate_mm_s < 0.0
        || !cfg.min_travel_feedrate_mm_s.is_finite()
        || cfg.min_travel_feedrate_mm_s < 0.0
    {
        return Err(BuildError::InvalidConfig("minimum feedrates must be >= 0"));
    }
    Ok(())
}

/// Round-to-nearest for mm→step conversion, ties away from zero.
#[inline]
fn lround(v: f32) -> i32 {
    if v >= 0.0 { (v + 0.5) as i32 } else { (v - 0.5) as i32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lround_ties_away_from_zero() {
        assert_eq!(lround(2.5), 3);
        assert_eq!(lround(-2.5), -3);
        assert_eq!(lround(2.4), 2);
        assert_eq!(lround(-2.4), -2);
    }
}
