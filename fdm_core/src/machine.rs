//! The machine root: owns the planner and the temperature controller,
//! carries the running/killed state, and implements the idle and kill
//! paths. No component in this crate is reachable except through a value
//! owned (directly or via a capability handle) by this structure.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use eyre::eyre;
use fdm_traits::{Clock, StepperPort};
use tracing::{error, info, warn};

use crate::config::SafetyCfg;
use crate::error::{Result, ThermalFault};
use crate::motion::block::NUM_AXES;
use crate::motion::planner::Planner;
use crate::thermal::control::TemperatureController;
use crate::thermal::table::Celsius;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineState {
    Running,
    /// Emergency stop: heaters off, queue flushed, no further admissions.
    Stopped,
    /// Fatal fault: like Stopped, latched until power cycle.
    Killed(ThermalFault),
}

pub struct Machine {
    pub planner: Planner,
    pub thermal: TemperatureController,
    stepper: Arc<dyn StepperPort + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    safety: SafetyCfg,
    state: MachineState,
    last_motion_ms: u64,
    steppers_idled: bool,
}

impl Machine {
    /// Wire a machine together. The cold-extrude gate between the thermal
    /// side and the planner is connected here so neither component knows
    /// the other.
    pub fn new(
        mut planner: Planner,
        thermal: TemperatureController,
        stepper: Arc<dyn StepperPort + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        safety: SafetyCfg,
    ) -> Self {
        let cold_flag = thermal.cold_extrude_flag();
        planner.set_cold_extrude_check(move || cold_flag.load(Ordering::Relaxed));
        let epoch = clock.now();
        Self {
            planner,
            thermal,
            stepper,
            clock,
            epoch,
            safety,
            state: MachineState::Running,
            last_motion_ms: 0,
            steppers_idled: false,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MachineState::Running
    }

    /// Admit a linear move, blocking (through `idle`) while the ring is
    /// full. This is the only suspension point on the producer side.
    pub fn enqueue_linear_move(
        &mut self,
        target_mm: [f32; NUM_AXES],
        feedrate_mm_s: f32,
        extruder: u8,
    ) -> Result<()> {
        while self.planner.is_full() {
            self.idle()?;
            self.clock.sleep(Duration::from_millis(1));
        }
        if !self.is_running() {
            return Err(eyre!("machine is not running"));
        }
        self.planner.buffer_line(target_mm, feedrate_mm_s, extruder)?;
        self.last_motion_ms = self.clock.ms_since(self.epoch);
        self.steppers_idled = false;
        Ok(())
    }

    /// Service everything that must run between commands: the heater
    /// manager and the inactivity housekeeping. Returns an error once the
    /// machine is killed.
    pub fn idle(&mut self) -> Result<()> {
        match self.thermal.manage_heaters() {
            Ok(_) => {}
            Err(fault) => {
                self.kill(fault);
                return Err(eyre!(fault));
            }
        }
        if let MachineState::Killed(fault) = self.state {
            return Err(eyre!(fault));
        }

        // Inactivity: note (once) when the steppers have had nothing to do
        // for the configured window.
        let now = self.clock.ms_since(self.epoch);
        if self.safety.stepper_inactive_ms > 0
            && self.planner.is_empty()
            && !self.steppers_idled
            && now.saturating_sub(self.last_motion_ms) >= self.safety.stepper_inactive_ms
        {
            self.steppers_idled = true;
            info!("steppers idle, holding torque released");
        }
        Ok(())
    }

    /// Block until the hotend is within `window` of its target.
    pub fn wait_for_hotend(&mut self, window: Celsius) -> Result<()> {
        while self.thermal.current() < self.thermal.target() - window {
            self.idle()?;
            self.clock.sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Block until the bed is within `window` of its target.
    pub fn wait_for_bed(&mut self, window: Celsius) -> Result<()> {
        while self.thermal.current_bed() < self.thermal.target_bed() - window {
            self.idle()?;
            self.clock.sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// M112: heaters off, queue flushed, stepper halted. The machine
    /// refuses further moves but stays inspectable.
    pub fn emergency_stop(&mut self) {
        warn!("emergency stop");
        self.thermal.disable_all_heaters();
        self.planner.flush();
        self.stepper.stop();
        if self.state == MachineState::Running {
            self.state = MachineState::Stopped;
        }
    }

    /// Fatal-fault path: heaters off on both sides of the stepper halt,
    /// queue flushed, state latched until power cycle.
    pub fn kill(&mut self, fault: ThermalFault) {
        error!(%fault, "killed");
        self.thermal.disable_all_heaters();
        self.thermal
            .outputs()
            .enabled
            .store(false, Ordering::Release);
        self.stepper.stop();
        self.planner.flush();
        self.thermal.disable_all_heaters();
        self.state = MachineState::Killed(fault);
    }

    /// Re-align the planner to physical reality after a stop.
    pub fn resync_position(&mut self) {
        self.planner.sync_from_steppers();
    }
}
