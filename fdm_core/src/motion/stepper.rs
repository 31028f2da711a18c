//! The consumer side of the ring: a reference step generator.
//!
//! The real machine drives step pulses from a timer interrupt; this
//! executor reproduces the same observable behavior for the CLI and tests:
//! it claims blocks through the §-contract (`get_current_block` /
//! `discard_current_block`), interleaves per-axis steps Bresenham-style,
//! honors the trapezoid's accelerate/cruise/decelerate partition, and
//! maintains the physical per-axis step counters the planner resyncs from
//! after an abort.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use fdm_traits::StepperPort;
use tracing::trace;

use super::block::{Block, NUM_AXES};
use super::queue::BlockQueue;

/// Shared face of the stepper: what the planner and the machine see.
#[derive(Default)]
pub struct StepperHandle {
    positions: [AtomicI32; NUM_AXES],
    stop_requested: AtomicBool,
    woken: AtomicBool,
}

impl StepperHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    pub fn stop_is_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Consume the wake flag. True when the producer published since the
    /// last poll.
    pub fn take_wake(&self) -> bool {
        self.woken.swap(false, Ordering::AcqRel)
    }
}

impl StepperPort for StepperHandle {
    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn position(&self, axis: usize) -> i32 {
        self.positions[axis].load(Ordering::Acquire)
    }

    fn set_position(&self, axis: usize, steps: i32) {
        self.positions[axis].store(steps, Ordering::Release);
    }
}

/// Pops blocks and steps them out, tracking simulated print time.
pub struct StepExecutor {
    queue: Arc<BlockQueue>,
    handle: Arc<StepperHandle>,
    elapsed_s: f64,
    step_events_executed: u64,
}

impl StepExecutor {
    pub fn new(queue: Arc<BlockQueue>, handle: Arc<StepperHandle>) -> Self {
        Self {
            queue,
            handle,
            elapsed_s: 0.0,
            step_events_executed: 0,
        }
    }

    pub fn handle(&self) -> Arc<StepperHandle> {
        Arc::clone(&self.handle)
    }

    /// Simulated wall time spent stepping so far.
    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_s
    }

    pub fn step_events_executed(&self) -> u64 {
        self.step_events_executed
    }

    /// Claim and execute one block to completion (or to a stop request).
    /// Returns true when a block was retired.
    pub fn step_one(&mut self) -> bool {
        if self.handle.stop_is_requested() {
            return false;
        }
        let Some(block) = self.queue.get_current_block() else {
            return false;
        };
        self.execute(&block);
        self.queue.discard_current_block();
        true
    }

    /// Drain every runnable block.
    pub fn run_until_idle(&mut self) -> usize {
        let mut retired = 0;
        while self.step_one() {
            retired += 1;
        }
        retired
    }

    fn execute(&mut self, block: &Block) {
        trace!(
            steps = block.step_event_count,
            initial = block.initial_rate,
            final_rate = block.final_rate,
            "executing block"
        );
        let count = i64::from(block.step_event_count);
        // Bresenham error accumulators, biased by half the event count so
        // steps spread evenly through the block.
        let mut counters = [-(count >> 1); NUM_AXES];

        for event in 0..block.step_event_count {
            if self.handle.stop_is_requested() {
                return;
            }
            for axis in 0..NUM_AXES {
                counters[axis] += i64::from(block.steps[axis]);
                if counters[axis] > 0 {
                    counters[axis] -= count;
                    let delta = if block.is_negative(axis) { -1 } else { 1 };
                    let pos = self.handle.positions[axis].load(Ordering::Relaxed);
                    self.handle.positions[axis].store(pos + delta, Ordering::Release);
                }
            }
            let rate = rate_at(block, event);
            self.elapsed_s += 1.0 / rate;
            self.step_events_executed += 1;
        }
    }
}

/// Instantaneous step rate (steps/s) at step-event index `event`, following
/// the block's trapezoid.
pub fn rate_at(block: &Block, event: u32) -> f64 {
    let accel = f64::from(block.acceleration_steps_per_s2);
    let nominal = f64::from(block.nominal_rate.max(1));
    let initial = f64::from(block.initial_rate.max(1));
    let final_rate = f64::from(block.final_rate.max(1));

    if event < block.accelerate_until {
        let v2 = initial * initial + 2.0 * accel * f64::from(event);
        v2.sqrt().min(nominal)
    } else if event >= block.decelerate_after {
        let travelled = f64::from(event - block.decelerate_after);
        let peak = rate_at_peak(block);
        let v2 = peak * peak - 2.0 * accel * travelled;
        v2.max(final_rate * final_rate).sqrt()
    } else {
        nominal
    }
}

/// Rate at the end of the acceleration phase (the cruise rate, or the ramp
/// intersection when there is no plateau).
fn rate_at_peak(block: &Block) -> f64 {
    let accel = f64::from(block.acceleration_steps_per_s2);
    let nominal = f64::from(block.nominal_rate.max(1));
    let initial = f64::from(block.initial_rate.max(1));
    let v2 = initial * initial + 2.0 * accel * f64::from(block.accelerate_until);
    v2.sqrt().min(nominal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::block::MIN_STEP_RATE;
    use crate::motion::trapezoid::calculate_trapezoid;

    fn trapezoided_block() -> Block {
        let mut b = Block {
            steps: [800, 0, 0, 0],
            step_event_count: 800,
            nominal_rate: 4800,
            acceleration_steps_per_s2: 80_000,
            acceleration: 1000.0,
            millimeters: 10.0,
            nominal_speed: 60.0,
            ..Block::default()
        };
        calculate_trapezoid(&mut b, 0.0, 0.0);
        b
    }

    #[test]
    fn rate_profile_is_trapezoidal() {
        let b = trapezoided_block();
        assert!(rate_at(&b, 0) >= f64::from(MIN_STEP_RATE));
        // Cruise phase runs at nominal.
        let mid = (b.accelerate_until + b.decelerate_after) / 2;
        assert_eq!(rate_at(&b, mid), f64::from(b.nominal_rate));
        // Final event decelerates toward final_rate.
        let last = rate_at(&b, b.step_event_count - 1);
        assert!(last < f64::from(b.nominal_rate));
        assert!(last >= f64::from(b.final_rate));
    }

    #[test]
    fn executor_steps_out_positions() {
        let queue = Arc::new(BlockQueue::new());
        assert!(queue.push(trapezoided_block()));
        let handle = Arc::new(StepperHandle::new());
        let mut exec = StepExecutor::new(Arc::clone(&queue), Arc::clone(&handle));
        assert!(exec.step_one());
        assert_eq!(handle.position(0), 800);
        assert_eq!(handle.position(1), 0);
        assert!(queue.is_empty());
        assert!(exec.elapsed_s() > 0.0);
    }

    #[test]
    fn stop_request_halts_mid_queue() {
        let queue = Arc::new(BlockQueue::new());
        assert!(queue.push(trapezoided_block()));
        assert!(queue.push(trapezoided_block()));
        let handle = Arc::new(StepperHandle::new());
        let mut exec = StepExecutor::new(Arc::clone(&queue), Arc::clone(&handle));
        handle.stop();
        assert!(!exec.step_one());
        assert_eq!(queue.moves_planned(), 2);
    }
}
