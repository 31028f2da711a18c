//! Trapezoid speed-profile math and the per-block commit.
//!
//! The kinematics, in the step-rate domain (s = speed, a = acceleration,
//! d = distance in step events):
//!
//! - distance to reach rate v from rate u at acceleration a:
//!   `(v^2 - u^2) / (2a)`
//! - point to start braking so that accelerating from u and decelerating
//!   to v meet within d: `(2ad - u^2 + v^2) / (4a)`
//! - speed reachable over d towards target v at acceleration a:
//!   `sqrt(v^2 - 2ad)`
//!
//! Intermediates are f64: near-zero single-precision cancellation in the
//! squares must not produce a negative radicand, and the results are
//! clamped non-negative before use.

use super::block::{Block, BlockFlags, MIN_STEP_RATE};

/// Step-timer rate the fixed-point `acceleration_rate` is scaled to.
/// The original target ran its step timer at F_CPU/8 = 2 MHz; this constant
/// must track whatever clock the step generator divides.
pub const STEP_TIMER_HZ: f64 = 2_000_000.0;

/// Distance (in step events) needed to change from `initial_rate` to
/// `target_rate` at `accel` steps/s^2. Zero acceleration yields zero.
#[inline]
pub fn estimate_accel_distance(initial_rate: f64, target_rate: f64, accel: f64) -> f64 {
    if accel == 0.0 {
        return 0.0;
    }
    (target_rate * target_rate - initial_rate * initial_rate) / (2.0 * accel)
}

/// The step-event index at which to stop accelerating (at +accel from
/// `initial_rate`) and start braking so the block ends at `final_rate`
/// after `distance` step events, when there is no cruise phase.
#[inline]
pub fn intersection_distance(initial_rate: f64, final_rate: f64, accel: f64, distance: f64) -> f64 {
    if accel == 0.0 {
        return 0.0;
    }
    (2.0 * accel * distance - initial_rate * initial_rate + final_rate * final_rate) / (4.0 * accel)
}

/// Largest speed allowed at the start of a stretch of `distance` mm so that
/// `target_velocity` is reachable at `accel` (negative = decelerating).
#[inline]
pub fn max_allowable_speed(accel: f32, target_velocity: f32, distance: f32) -> f32 {
    let radicand =
        f64::from(target_velocity) * f64::from(target_velocity) - 2.0 * f64::from(accel) * f64::from(distance);
    radicand.max(0.0).sqrt() as f32
}

/// Compute the accelerate/cruise/decelerate partition for `block` given its
/// entry and exit speeds (mm/s), and commit it to the ring slot.
///
/// The commit is skipped when the consumer has already claimed the block
/// (BUSY): the slot belongs to the stepper from that point on. The caller
/// holds the queue critical section.
pub fn calculate_trapezoid(slot: &mut Block, entry_speed: f32, exit_speed: f32) {
    let mut initial_rate = (entry_speed.max(0.0).ceil() as u32).max(MIN_STEP_RATE);
    let mut final_rate = (exit_speed.max(0.0).ceil() as u32).max(MIN_STEP_RATE);
    initial_rate = initial_rate.min(slot.nominal_rate.max(MIN_STEP_RATE));
    final_rate = final_rate.min(slot.nominal_rate.max(MIN_STEP_RATE));

    let accel = f64::from(slot.acceleration_steps_per_s2);
    let mut accelerate_steps = estimate_accel_distance(
        f64::from(initial_rate),
        f64::from(slot.nominal_rate),
        accel,
    )
    .ceil()
    .max(0.0) as i64;
    let decelerate_steps = estimate_accel_distance(
        f64::from(slot.nominal_rate),
        f64::from(final_rate),
        -accel,
    )
    .floor()
    .max(0.0) as i64;

    let step_events = i64::from(slot.step_event_count);
    let mut plateau_steps = step_events - accelerate_steps - decelerate_steps;

    // No room to cruise: intersect the acceleration and deceleration ramps
    // so the final rate is hit exactly at the end of the block.
    if plateau_steps < 0 {
        accelerate_steps = intersection_distance(
            f64::from(initial_rate),
            f64::from(final_rate),
            accel,
            step_events as f64,
        )
        .ceil() as i64;
        accelerate_steps = accelerate_steps.clamp(0, step_events);
        plateau_steps = 0;
    }

    if slot.is_busy() {
        return;
    }
    slot.accelerate_until = accelerate_steps as u32;
    slot.decelerate_after = (accelerate_steps + plateau_steps) as u32;
    slot.initial_rate = initial_rate;
    slot.final_rate = final_rate;
    slot.acceleration_rate = (accel * f64::from(1u32 << 24) / STEP_TIMER_HZ) as u32;
    slot.flags.clear(BlockFlags::RECALCULATE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accel_distance_symmetry() {
        // 0 -> 4800 steps/s at 80_000 steps/s^2 takes 144 steps.
        let d = estimate_accel_distance(0.0, 4800.0, 80_000.0);
        assert!((d - 144.0).abs() < 1e-9);
        // Decelerating over the same span is the mirror image.
        let d2 = estimate_accel_distance(4800.0, 0.0, -80_000.0);
        assert!((d2 - 144.0).abs() < 1e-9);
    }

    #[test]
    fn zero_accel_means_zero_distance() {
        assert_eq!(estimate_accel_distance(100.0, 5000.0, 0.0), 0.0);
        assert_eq!(intersection_distance(100.0, 100.0, 0.0, 500.0), 0.0);
    }

    #[test]
    fn max_allowable_speed_clamps_negative_radicand() {
        // Tiny distance, huge deceleration request: radicand would go
        // negative in f32; must clamp to zero, not NaN.
        let v = max_allowable_speed(-100_000.0, 0.0, -1e-7);
        assert!(v >= 0.0 && v.is_finite());
    }

    #[test]
    fn trapezoid_with_plateau() {
        let mut b = Block {
            step_event_count: 800,
            nominal_rate: 4800,
            acceleration_steps_per_s2: 80_000,
            acceleration: 1000.0,
            ..Block::default()
        };
        calculate_trapezoid(&mut b, 0.0, 0.0);
        assert_eq!(b.initial_rate, MIN_STEP_RATE);
        assert_eq!(b.final_rate, MIN_STEP_RATE);
        // 144 steps to accelerate, 144 to decelerate, the rest cruises.
        assert!(b.accelerate_until < b.decelerate_after);
        assert!(b.decelerate_after <= b.step_event_count);
        assert!(b.accelerate_until >= 144);
    }

    #[test]
    fn trapezoid_without_plateau_intersects() {
        // Short block that cannot reach nominal: plateau collapses.
        let mut b = Block {
            step_event_count: 100,
            nominal_rate: 8000,
            acceleration_steps_per_s2: 80_000,
            acceleration: 1000.0,
            ..Block::default()
        };
        calculate_trapezoid(&mut b, 0.0, 0.0);
        assert_eq!(b.accelerate_until, b.decelerate_after);
        assert!(b.accelerate_until <= b.step_event_count);
    }

    #[test]
    fn busy_block_is_not_touched() {
        let mut b = Block {
            step_event_count: 800,
            nominal_rate: 4800,
            acceleration_steps_per_s2: 80_000,
            accelerate_until: 7,
            decelerate_after: 9,
            ..Block::default()
        };
        b.flags.set(BlockFlags::BUSY);
        b.flags.set(BlockFlags::RECALCULATE);
        calculate_trapezoid(&mut b, 10.0, 0.0);
        assert_eq!(b.accelerate_until, 7);
        assert_eq!(b.decelerate_after, 9);
        assert!(b.flags.contains(BlockFlags::RECALCULATE));
    }
}
