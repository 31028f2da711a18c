//! Property tests over randomized move streams: every queued block must
//! satisfy the planner's ordering, feasibility, and limit invariants after
//! each admission.

use std::sync::Arc;

use fdm_core::config::{MotionCfg, SafetyCfg};
use fdm_core::mocks::NullStepperPort;
use fdm_core::motion::block::{Block, MIN_STEP_RATE, NUM_AXES};
use fdm_core::motion::planner::Planner;
use proptest::prelude::*;

const EPS: f32 = 1e-3;

#[derive(Debug, Clone)]
struct Move {
    target: [f32; NUM_AXES],
    feedrate: f32,
}

fn move_strategy() -> impl Strategy<Value = Move> {
    (
        -50i32..50,
        -50i32..50,
        0i32..40,
        -20i32..20,
        1u32..2000,
    )
        .prop_map(|(x, y, z, e, f)| Move {
            // Quantized to 0.5 mm so most segments clear the step floor.
            target: [
                x as f32 * 0.5,
                y as f32 * 0.5,
                z as f32 * 0.25,
                e as f32 * 0.5,
            ],
            feedrate: f as f32 * 0.1,
        })
}

fn axis_speed(cfg: &MotionCfg, block: &Block, axis: usize, at_speed: f32) -> f32 {
    if block.millimeters <= 0.0 {
        return 0.0;
    }
    let mut mm = block.steps[axis] as f32 / cfg.axis_steps_per_mm[axis];
    if block.is_negative(axis) {
        mm = -mm;
    }
    mm / block.millimeters * at_speed
}

fn assert_block_invariants(cfg: &MotionCfg, blocks: &[Block]) {
    for b in blocks {
        assert!(b.step_event_count == *b.steps.iter().max().unwrap());
        assert!(b.millimeters > 0.0);
        assert!(b.nominal_speed > 0.0);
        assert!(b.nominal_rate > 0);

        assert!(b.entry_speed >= -EPS);
        assert!(b.entry_speed <= b.max_entry_speed + EPS);
        assert!(b.max_entry_speed <= b.nominal_speed + EPS);

        assert!(b.accelerate_until <= b.decelerate_after);
        assert!(b.decelerate_after <= b.step_event_count);
        assert!(b.initial_rate >= MIN_STEP_RATE);
        assert!(b.final_rate >= MIN_STEP_RATE);

        // Per-axis speed never exceeds the axis feedrate limit.
        for axis in 0..NUM_AXES {
            let speed = axis_speed(cfg, b, axis, b.nominal_speed).abs();
            assert!(
                speed <= cfg.max_feedrate_mm_s[axis] * (1.0 + EPS),
                "axis {axis} speed {speed} over limit"
            );
        }
    }

    // Pairwise: a feasible trajectory exists across every junction, in
    // both directions, under the block's one acceleration. Tolerance is
    // relative: the squared speeds run far past f32 ulp at 1e-3.
    for pair in blocks.windows(2) {
        let (b, c) = (&pair[0], &pair[1]);
        let budget = 2.0 * b.acceleration * b.millimeters;
        let accel_bound = (b.entry_speed * b.entry_speed + budget) * (1.0 + 1e-4) + EPS;
        assert!(
            c.entry_speed * c.entry_speed <= accel_bound,
            "junction not reachable by acceleration"
        );
        let decel_bound = (c.entry_speed * c.entry_speed + budget) * (1.0 + 1e-4) + EPS;
        assert!(
            b.entry_speed * b.entry_speed <= decel_bound,
            "junction not reachable by deceleration"
        );
    }

    // Junction jerk after clamping stays within the per-axis allowance.
    for pair in blocks.windows(2) {
        let (b, c) = (&pair[0], &pair[1]);
        let junction = c.entry_speed;
        if junction <= EPS || b.nominal_speed <= EPS || c.nominal_speed <= EPS {
            continue;
        }
        for axis in 0..NUM_AXES {
            let v_exit = axis_speed(cfg, b, axis, junction);
            let v_entry = axis_speed(cfg, c, axis, junction);
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
            assert!(
                jerk <= cfg.max_jerk_mm_s[axis] * (1.0 + 0.01) + EPS,
                "axis {axis} junction jerk {jerk} over allowance"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn queued_blocks_always_satisfy_invariants(
        moves in proptest::collection::vec(move_strategy(), 1..14)
    ) {
        let cfg = MotionCfg::default();
        let mut planner = Planner::new(
            cfg.clone(),
            SafetyCfg::default(),
            Arc::new(NullStepperPort),
        )
        .unwrap();

        for mv in &moves {
            let _ = planner.buffer_line(mv.target, mv.feedrate, 0).unwrap();
            assert_block_invariants(&cfg, &planner.queue().snapshot());
        }
    }
}
