//! The temperature controller: raw-pair consumption, calibration, guard
//! evaluation, and heater duty computation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use fdm_traits::Clock;
use tracing::{debug, error, warn};

use crate::config::{HeaterManagerKind, ThermalCfg};
use crate::error::ThermalFault;

use super::sampler::RawFeed;
use super::table::{BED_TABLE, Celsius, HOTEND_TABLE, ThermistorTable};

/// Direction the measured temperature has been drifting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
}

/// Running mean of signed temperature deltas (1/16 degC units). The sign of
/// the mean is the trend.
#[derive(Debug, Default)]
struct TempTrend {
    mean_sum: i32,
}

const TREND_WINDOW: i32 = 8;

impl TempTrend {
    fn append(&mut self, delta: Celsius) {
        self.mean_sum -= self.mean_sum / TREND_WINDOW;
        self.mean_sum += delta.raw();
    }

    fn direction(&self) -> Trend {
        if self.mean_sum >= 0 { Trend::Up } else { Trend::Down }
    }
}

/// Thermal-runaway protection states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrState {
    Inactive,
    FirstHeating,
    Stable,
    Runaway,
}

struct RunawayGuard {
    state: TrState,
    timer_ms: u64,
    /// Target the machine was last armed for; any change restarts it.
    armed_target: Celsius,
    period_ms: u64,
    hysteresis: Celsius,
}

impl RunawayGuard {
    fn new(period_ms: u64, hysteresis: Celsius) -> Self {
        Self {
            state: TrState::Inactive,
            timer_ms: 0,
            armed_target: Celsius::ZERO,
            period_ms,
            hysteresis,
        }
    }

    /// Advance the state machine. Inactive waits for a target; FirstHeating
    /// waits for the target to be reached; Stable re-arms its timer every
    /// time the temperature revisits target - hysteresis and trips Runaway
    /// when the timer expires below that band.
    fn step(&mut self, current: Celsius, target: Celsius, now_ms: u64) -> Result<(), ThermalFault> {
        if self.armed_target != target {
            self.armed_target = target;
            self.state = if target > Celsius::ZERO {
                TrState::FirstHeating
            } else {
                TrState::Inactive
            };
            self.timer_ms = now_ms + self.period_ms;
        }
        match self.state {
            TrState::Inactive => Ok(()),
            TrState::FirstHeating => {
                if current >= target {
                    self.state = TrState::Stable;
                    self.timer_ms = now_ms + self.period_ms;
                }
                Ok(())
            }
            TrState::Stable => {
                if current >= target - self.hysteresis {
                    self.timer_ms = now_ms + self.period_ms;
                    Ok(())
                } else if now_ms < self.timer_ms {
                    Ok(())
                } else {
                    self.state = TrState::Runaway;
                    Err(ThermalFault::Runaway)
                }
            }
            TrState::Runaway => Err(ThermalFault::Runaway),
        }
    }
}

struct WatchRise {
    /// Temperature that must be reached by the deadline. None = disarmed.
    target: Option<Celsius>,
    deadline_ms: u64,
    period_ms: u64,
    increase: Celsius,
}

impl WatchRise {
    fn new(period_ms: u64, increase: Celsius) -> Self {
        Self {
            target: None,
            deadline_ms: 0,
            period_ms,
            increase,
        }
    }

    /// Arm after a setpoint change: only when the current reading is far
    /// enough below target that a rise must be observable.
    fn arm(&mut self, current: Celsius, target: Celsius, hysteresis: Celsius, now_ms: u64) {
        let margin = self.increase + hysteresis + Celsius::from_whole(1);
        if target > Celsius::ZERO && current < target - margin {
            self.target = Some(current + self.increase);
            self.deadline_ms = now_ms + self.period_ms;
        } else {
            self.target = None;
        }
    }

    /// On expiry: fault if the temperature did not rise enough, else re-arm
    /// from the new reading (the target may still be far off).
    fn check(
        &mut self,
        current: Celsius,
        target: Celsius,
        hysteresis: Celsius,
        now_ms: u64,
    ) -> Result<(), ThermalFault> {
        if let Some(watch_target) = self.target
            && now_ms >= self.deadline_ms
        {
            if current < watch_target {
                return Err(ThermalFault::WatchRiseFailed);
            }
            self.arm(current, target, hysteresis, now_ms);
        }
        Ok(())
    }
}

/// Hotend control law state.
enum Manager {
    BangBang { last_on: bool },
    Pid { kp: f32, ki: f32, kd: f32, i_sum: f32, last_input: f32 },
}

impl Manager {
    fn from_cfg(kind: HeaterManagerKind) -> Self {
        match kind {
            HeaterManagerKind::BangBang => Manager::BangBang { last_on: false },
            HeaterManagerKind::Pid { kp, ki, kd } => Manager::Pid {
                kp,
                ki,
                kd,
                i_sum: 0.0,
                last_input: 0.0,
            },
        }
    }

    fn get_power(&mut self, current: Celsius, target: Celsius, hysteresis: Celsius, dt_s: f32) -> u8 {
        match self {
            Manager::BangBang { last_on } => {
                if current < target - hysteresis {
                    *last_on = true;
                } else if current > target + hysteresis {
                    *last_on = false;
                }
                if *last_on { 255 } else { 0 }
            }
            Manager::Pid {
                kp,
                ki,
                kd,
                i_sum,
                last_input,
            } => {
                let input = current.to_f32();
                let err = target.to_f32() - input;
                *i_sum = (*i_sum + err * *ki * dt_s).clamp(0.0, 255.0);
                let d_term = if dt_s > 0.0 {
                    *kd * (input - *last_input) / dt_s
                } else {
                    0.0
                };
                *last_input = input;
                (*kp * err + *i_sum - d_term).clamp(0.0, 255.0) as u8
            }
        }
    }
}

/// Shared duty/enable cells between the controller (writer) and the
/// soft-PWM tick (reader). Byte-sized stores are single memory
/// transactions on every target this runs on.
#[derive(Clone)]
pub struct HeaterOutputs {
    pub hotend_duty: Arc<AtomicU8>,
    pub bed_duty: Arc<AtomicU8>,
    /// Cleared by the kill path; the PWM tick forces both pins low while
    /// false.
    pub enabled: Arc<AtomicBool>,
}

impl Default for HeaterOutputs {
    fn default() -> Self {
        Self {
            hotend_duty: Arc::new(AtomicU8::new(0)),
            bed_duty: Arc::new(AtomicU8::new(0)),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }
}

pub struct TemperatureController {
    cfg: ThermalCfg,
    feed: RawFeed,
    outputs: HeaterOutputs,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    current: Celsius,
    current_bed: Celsius,
    target: Celsius,
    target_bed: Celsius,

    manager: Manager,
    trend: TempTrend,
    watch: WatchRise,
    bed_watch: WatchRise,
    runaway: RunawayGuard,
    bed_runaway: RunawayGuard,

    /// Published for the planner's cold-extrude closure.
    cold_extrude: Arc<AtomicBool>,
    last_manage_ms: u64,
    stall_warned: bool,
}

/// Feed silence long enough to be worth a warning. Well above the pair
/// cadence; the min/max and runaway guards remain the hard backstop.
const SENSOR_STALL_WARN_MS: u64 = 2_000;

impl TemperatureController {
    pub fn new(
        cfg: ThermalCfg,
        feed: RawFeed,
        outputs: HeaterOutputs,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            manager: Manager::from_cfg(cfg.manager),
            watch: WatchRise::new(cfg.watch_period_ms, Celsius::from_whole(cfg.watch_increase_c)),
            bed_watch: WatchRise::new(
                cfg.bed_watch_period_ms,
                Celsius::from_whole(cfg.bed_watch_increase_c),
            ),
            runaway: RunawayGuard::new(
                cfg.runaway_period_ms,
                Celsius::from_f32(cfg.runaway_hysteresis_c),
            ),
            bed_runaway: RunawayGuard::new(
                cfg.bed_runaway_period_ms,
                Celsius::from_f32(cfg.bed_runaway_hysteresis_c),
            ),
            cfg,
            feed,
            outputs,
            clock,
            epoch,
            current: Celsius::ZERO,
            current_bed: Celsius::ZERO,
            target: Celsius::ZERO,
            target_bed: Celsius::ZERO,
            trend: TempTrend::default(),
            cold_extrude: Arc::new(AtomicBool::new(true)),
            last_manage_ms: 0,
            stall_warned: false,
        }
    }

    pub fn current(&self) -> Celsius {
        self.current
    }

    pub fn current_bed(&self) -> Celsius {
        self.current_bed
    }

    pub fn target(&self) -> Celsius {
        self.target
    }

    pub fn target_bed(&self) -> Celsius {
        self.target_bed
    }

    pub fn trend(&self) -> Trend {
        self.trend.direction()
    }

    pub fn outputs(&self) -> &HeaterOutputs {
        &self.outputs
    }

    /// Shared flag for the planner: true while extrusion must be collapsed.
    pub fn cold_extrude_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cold_extrude)
    }

    pub fn is_cold_extrude(&self) -> bool {
        if self.cfg.allow_cold_extrude {
            return false;
        }
        self.current < Celsius::from_whole(self.cfg.min_extrude_temp_c)
    }

    pub fn set_target_hotend(&mut self, target: Celsius) {
        self.target = target;
        let now = self.clock.ms_since(self.epoch);
        self.watch
            .arm(self.current, target, Celsius::from_f32(self.cfg.hysteresis_c), now);
        debug!(target = target.to_f32(), "hotend target set");
    }

    pub fn set_target_bed(&mut self, target: Celsius) {
        let clamped = target.min(Celsius::from_whole(self.cfg.bed_max_temp_c));
        self.target_bed = clamped;
        let now = self.clock.ms_since(self.epoch);
        self.bed_watch.arm(
            self.current_bed,
            clamped,
            Celsius::from_f32(self.cfg.hysteresis_c),
            now,
        );
        debug!(target = clamped.to_f32(), "bed target set");
    }

    /// Zero both targets and duties. Called on its own by M-code and twice
    /// by the kill path.
    pub fn disable_all_heaters(&mut self) {
        self.target = Celsius::ZERO;
        self.target_bed = Celsius::ZERO;
        self.outputs.hotend_duty.store(0, Ordering::Release);
        self.outputs.bed_duty.store(0, Ordering::Release);
        warn!("all heaters disabled");
    }

    /// Consume the freshest ADC pair and run one control/guard cycle.
    ///
    /// Returns Ok(false) when no new pair was available (nothing done),
    /// Ok(true) after a full cycle, and a fault when a guard trips. On
    /// fault the duties are already zeroed; the caller owns the kill
    /// sequence.
    pub fn manage_heaters(&mut self) -> Result<bool, ThermalFault> {
        let Some(pair) = self.feed.latest() else {
            let now = self.clock.ms_since(self.epoch);
            if now > SENSOR_STALL_WARN_MS
                && self.feed.stalled_for(now) > SENSOR_STALL_WARN_MS
                && !self.stall_warned
            {
                self.stall_warned = true;
                warn!("temperature samples stalled");
            }
            return Ok(false);
        };
        self.stall_warned = false;
        let now = self.clock.ms_since(self.epoch);
        let dt_s = (now.saturating_sub(self.last_manage_ms)) as f32 / 1000.0;
        self.last_manage_ms = now;

        if let Err(fault) = self.check_raw_guards(pair.hotend, pair.bed) {
            self.fault_response(fault);
            return Err(fault);
        }

        let previous = self.current;
        self.current = HOTEND_TABLE.adc_to_celsius(HOTEND_TABLE.clamp_adc(pair.hotend));
        self.current_bed = BED_TABLE.adc_to_celsius(BED_TABLE.clamp_adc(pair.bed));
        self.trend.append(self.current - previous);
        self.cold_extrude
            .store(self.is_cold_extrude(), Ordering::Relaxed);

        // Guards before power: a runaway must never be masked by a duty
        // update in the same cycle.
        if let Err(fault) = self.runaway.step(self.current, self.target, now) {
            self.fault_response(fault);
            return Err(fault);
        }
        if let Err(fault) = self.bed_runaway.step(self.current_bed, self.target_bed, now) {
            self.fault_response(fault);
            return Err(fault);
        }
        let hysteresis = Celsius::from_f32(self.cfg.hysteresis_c);
        if let Err(fault) = self.watch.check(self.current, self.target, hysteresis, now) {
            self.fault_response(fault);
            return Err(fault);
        }
        if let Err(fault) = self
            .bed_watch
            .check(self.current_bed, self.target_bed, hysteresis, now)
        {
            self.fault_response(fault);
            return Err(fault);
        }

        // Hotend duty.
        let hotend_duty = if self.target.is_zero() {
            0
        } else if self.current <= Celsius::from_whole(self.cfg.hotend_min_temp_c)
            || self.current >= Celsius::from_whole(self.cfg.hotend_max_temp_c)
        {
            0
        } else {
            self.manager
                .get_power(self.current, self.target, hysteresis, dt_s)
        };
        self.outputs.hotend_duty.store(hotend_duty, Ordering::Release);

        // Bed: plain bang-bang, forced off outside the calibrated band.
        let bed_in_range = self.current_bed >= Celsius::from_whole(self.cfg.bed_min_temp_c)
            && self.current_bed <= Celsius::from_whole(self.cfg.bed_max_temp_c);
        let bed_duty = if self.target_bed.is_zero() || !bed_in_range {
            0
        } else if self.current_bed < self.target_bed {
            255
        } else {
            0
        };
        self.outputs.bed_duty.store(bed_duty, Ordering::Release);

        Ok(true)
    }

    /// Raw-domain min/max guards. Only armed while the matching target is
    /// nonzero, so a cold idle machine with a disconnected sensor does not
    /// kill itself.
    fn check_raw_guards(&self, hotend_raw: u16, bed_raw: u16) -> Result<(), ThermalFault> {
        if self.target > Celsius::ZERO {
            if Self::raw_at_or_above(&HOTEND_TABLE, hotend_raw, self.cfg.hotend_max_temp_c) {
                return Err(ThermalFault::HotendMaxTemp);
            }
            if Self::raw_at_or_below(&HOTEND_TABLE, hotend_raw, self.cfg.hotend_min_temp_c) {
                return Err(ThermalFault::HotendMinTemp);
            }
        }
        if self.target_bed > Celsius::ZERO {
            if Self::raw_at_or_above(&BED_TABLE, bed_raw, self.cfg.bed_max_temp_c) {
                return Err(ThermalFault::BedMaxTemp);
            }
            if Self::raw_at_or_below(&BED_TABLE, bed_raw, self.cfg.bed_min_temp_c) {
                return Err(ThermalFault::BedMinTemp);
            }
        }
        Ok(())
    }

    fn raw_at_or_above(table: &ThermistorTable, raw: u16, limit_c: i16) -> bool {
        table.reads_at_or_above(raw, Celsius::from_whole(limit_c))
    }

    fn raw_at_or_below(table: &ThermistorTable, raw: u16, limit_c: i16) -> bool {
        table.reads_at_or_below(raw, Celsius::from_whole(limit_c))
    }

    fn fault_response(&mut self, fault: ThermalFault) {
        error!(%fault, "thermal guard tripped");
        self.outputs.hotend_duty.store(0, Ordering::Release);
        self.outputs.bed_duty.store(0, Ordering::Release);
    }
}
