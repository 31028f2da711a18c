//! Thermal guard behavior under a deterministic clock: watch-rise,
//! thermal runaway, min/max raw guards, and the target-zero duty rule.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use fdm_core::config::{MotionCfg, SafetyCfg, ThermalCfg};
use fdm_core::error::ThermalFault;
use fdm_core::machine::{Machine, MachineState};
use fdm_core::mocks::{MockAdc, TestClock};
use fdm_core::motion::planner::Planner;
use fdm_core::motion::stepper::StepperHandle;
use fdm_core::thermal::control::{HeaterOutputs, TemperatureController};
use fdm_core::thermal::{Celsius, Trend};
use fdm_core::thermal::sampler::AdcSampler;
use fdm_core::thermal::table::{HOTEND_TABLE, OVERSAMPLE};
use fdm_traits::{Clock, MonotonicClock};

struct Rig {
    sampler: AdcSampler<MockAdc>,
    controller: TemperatureController,
    hotend_cell: Arc<AtomicU16>,
    clock: Arc<TestClock>,
    outputs: HeaterOutputs,
}

/// 10-bit sample corresponding to a hotend temperature.
fn sample_for(deg: i16) -> u16 {
    HOTEND_TABLE.celsius_to_adc(Celsius::from_whole(deg)) / OVERSAMPLE
}

fn rig() -> Rig {
    let clock = Arc::new(TestClock::new());
    let clock_dyn: Arc<dyn Clock + Send + Sync> = clock.clone();
    let (hotend, hotend_cell) = MockAdc::settable(sample_for(25));
    let bed = MockAdc::fixed(sample_for(25));
    let (sampler, feed) = AdcSampler::new(hotend, bed, Arc::clone(&clock_dyn));
    let outputs = HeaterOutputs::default();
    let controller = TemperatureController::new(
        ThermalCfg::default(),
        feed,
        outputs.clone(),
        clock_dyn,
    );
    Rig {
        sampler,
        controller,
        hotend_cell,
        clock,
        outputs,
    }
}

impl Rig {
    /// Publish pairs and run the manager until the oversampled average has
    /// converged on the scripted reading.
    fn settle(&mut self) -> Result<(), ThermalFault> {
        for _ in 0..600 {
            for _ in 0..4 {
                self.sampler.tick();
            }
            self.controller.manage_heaters()?;
        }
        Ok(())
    }

    fn set_temp(&mut self, deg: i16) {
        self.hotend_cell.store(sample_for(deg), Ordering::Relaxed);
    }

    fn one_cycle(&mut self) -> Result<bool, ThermalFault> {
        for _ in 0..4 {
            self.sampler.tick();
        }
        self.controller.manage_heaters()
    }
}

#[test]
fn manage_without_samples_does_nothing() {
    let mut r = rig();
    assert_eq!(r.controller.manage_heaters(), Ok(false));
}

#[test]
fn duty_is_zero_whenever_target_is_zero() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();
    assert_eq!(r.outputs.hotend_duty.load(Ordering::Acquire), 0);

    // Heating drives the duty up; clearing the target drops it to zero on
    // the very next cycle.
    r.controller.set_target_hotend(Celsius::from_whole(200));
    r.one_cycle().unwrap();
    assert_eq!(r.outputs.hotend_duty.load(Ordering::Acquire), 255);

    r.controller.set_target_hotend(Celsius::ZERO);
    r.one_cycle().unwrap();
    assert_eq!(r.outputs.hotend_duty.load(Ordering::Acquire), 0);
}

#[test]
fn watch_rise_failure_is_fatal() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();

    r.controller.set_target_hotend(Celsius::from_whole(200));
    // Temperature never rises. Inside the watch period everything is fine.
    r.clock.advance(Duration::from_secs(10));
    assert!(r.one_cycle().is_ok());

    // Past the watch period with no rise: fatal.
    r.clock.advance(Duration::from_secs(11));
    assert_eq!(r.one_cycle(), Err(ThermalFault::WatchRiseFailed));
    assert_eq!(r.outputs.hotend_duty.load(Ordering::Acquire), 0);
}

#[test]
fn watch_rise_rearms_when_temperature_climbs() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();

    r.controller.set_target_hotend(Celsius::from_whole(200));
    // Rise well past the watch increase before the period expires.
    r.set_temp(60);
    r.settle().unwrap();
    r.clock.advance(Duration::from_secs(21));
    assert!(r.one_cycle().is_ok(), "rise seen, watcher must re-arm");
}

#[test]
fn runaway_trips_when_stable_temperature_collapses() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();

    // Reach the setpoint: the runaway machine goes FirstHeating -> Stable.
    r.controller.set_target_hotend(Celsius::from_whole(200));
    r.set_temp(201);
    r.settle().unwrap();
    assert_eq!(r.controller.trend(), Trend::Up);

    // Sensor falls out of the block: reading collapses below
    // target - hysteresis and stays there past the runaway period.
    r.set_temp(180);
    r.settle().unwrap();
    r.clock.advance(Duration::from_secs(41));
    assert_eq!(r.one_cycle(), Err(ThermalFault::Runaway));
}

#[test]
fn runaway_restarts_on_target_change() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();
    r.controller.set_target_hotend(Celsius::from_whole(200));
    r.set_temp(201);
    r.settle().unwrap();

    // Dropping the setpoint to a value below the current reading restarts
    // the state machine; cooling toward a lower target is not a runaway.
    r.controller.set_target_hotend(Celsius::from_whole(150));
    r.set_temp(180);
    r.settle().unwrap();
    r.clock.advance(Duration::from_secs(60));
    assert!(r.one_cycle().is_ok());
}

#[test]
fn disconnected_sensor_with_target_is_min_temp_fault() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();

    r.controller.set_target_hotend(Celsius::from_whole(200));
    // Open thermistor reads the top of the ADC range (coldest).
    r.hotend_cell.store(1023, Ordering::Relaxed);
    let mut result = Ok(true);
    for _ in 0..600 {
        result = r.one_cycle();
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(ThermalFault::HotendMinTemp));
}

#[test]
fn out_of_range_raw_without_target_is_ignored() {
    let mut r = rig();
    r.hotend_cell.store(1023, Ordering::Relaxed);
    // No target set: a cold machine with a disconnected sensor idles.
    assert!(r.settle().is_ok());
    assert_eq!(r.outputs.hotend_duty.load(Ordering::Acquire), 0);
}

#[test]
fn kill_latches_machine_and_forces_outputs_off() {
    let mut r = rig();
    r.set_temp(25);
    r.settle().unwrap();
    r.controller.set_target_hotend(Celsius::from_whole(200));

    let outputs = r.outputs.clone();
    let stepper = Arc::new(StepperHandle::new());
    let planner =
        Planner::new(MotionCfg::default(), SafetyCfg::default(), stepper.clone()).unwrap();
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let mut machine = Machine::new(planner, r.controller, stepper.clone(), clock, SafetyCfg::default());

    // Let the watch period lapse with no rise, then drive idle(): the
    // machine must kill itself.
    r.clock.advance(Duration::from_secs(25));
    for _ in 0..4 {
        r.sampler.tick();
    }
    let err = machine.idle().unwrap_err();
    assert!(err.to_string().contains("heating failed") || err.downcast_ref::<ThermalFault>().is_some());
    assert!(matches!(machine.state(), MachineState::Killed(_)));
    assert_eq!(outputs.hotend_duty.load(Ordering::Acquire), 0);
    assert!(!outputs.enabled.load(Ordering::Acquire));
    assert!(stepper.stop_is_requested());
    assert!(!machine.is_running());

    // Further admissions are refused.
    assert!(
        machine
            .enqueue_linear_move([1.0, 0.0, 0.0, 0.0], 30.0, 0)
            .is_err()
    );
}
