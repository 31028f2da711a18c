//! Ring-saturation behavior: the producer blocks in its idle loop when the
//! ring is full and resumes as soon as the consumer retires a block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use fdm_core::config::{MotionCfg, SafetyCfg, ThermalCfg};
use fdm_core::machine::Machine;
use fdm_core::mocks::MockAdc;
use fdm_core::motion::planner::Planner;
use fdm_core::motion::queue::BLOCK_BUFFER_SIZE;
use fdm_core::motion::stepper::StepperHandle;
use fdm_core::thermal::control::{HeaterOutputs, TemperatureController};
use fdm_core::thermal::sampler::AdcSampler;
use fdm_traits::{Clock, MonotonicClock};

fn machine() -> Machine {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    // The sampler is never ticked here: manage_heaters sees no data and the
    // thermal side stays inert, which is exactly what this test needs.
    let (_sampler, feed) = AdcSampler::new(
        MockAdc::fixed(500),
        MockAdc::fixed(500),
        Arc::clone(&clock),
    );
    let thermal = TemperatureController::new(
        ThermalCfg::default(),
        feed,
        HeaterOutputs::default(),
        Arc::clone(&clock),
    );
    let stepper = Arc::new(StepperHandle::new());
    let planner =
        Planner::new(MotionCfg::default(), SafetyCfg::default(), stepper.clone()).unwrap();
    Machine::new(
        planner,
        thermal,
        stepper,
        clock,
        SafetyCfg::default(),
    )
}

#[test]
fn capacity_minus_one_fits_without_blocking() {
    let mut m = machine();
    for i in 0..BLOCK_BUFFER_SIZE - 1 {
        m.enqueue_linear_move([(i + 1) as f32, 0.0, 0.0, 0.0], 60.0, 0)
            .unwrap();
    }
    assert!(m.planner.is_full());
    assert_eq!(m.planner.moves_planned(), BLOCK_BUFFER_SIZE - 1);
}

#[test]
fn saturating_enqueue_blocks_until_a_block_retires() {
    let mut m = machine();
    let queue = m.planner.queue();

    let producer_done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&producer_done);

    let producer = thread::spawn(move || {
        // One more move than the ring can hold: the last call must block.
        for i in 0..BLOCK_BUFFER_SIZE {
            m.enqueue_linear_move([(i + 1) as f32, 0.0, 0.0, 0.0], 60.0, 0)
                .unwrap();
        }
        done_flag.store(true, Ordering::Release);
        m
    });

    // Give the producer ample time to hit the full ring.
    thread::sleep(Duration::from_millis(100));
    assert!(
        !producer_done.load(Ordering::Acquire),
        "producer should be parked on the full ring"
    );

    // Consumer retires one block; the parked enqueue must now complete.
    assert!(queue.get_current_block().is_some());
    queue.discard_current_block();

    let m = producer.join().unwrap();
    assert!(producer_done.load(Ordering::Acquire));
    assert_eq!(m.planner.moves_planned(), BLOCK_BUFFER_SIZE - 1);
}
