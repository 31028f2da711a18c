//! The `print` subcommand: stream a move file through the line protocol
//! into the planner while a consumer thread steps blocks out against
//! simulated hardware.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use eyre::WrapErr;
use fdm_core::config::{MotionCfg, SafetyCfg, ThermalCfg};
use fdm_core::machine::{Machine, MachineState};
use fdm_core::motion::block::NUM_AXES;
use fdm_core::motion::planner::Planner;
use fdm_core::motion::stepper::{StepExecutor, StepperHandle};
use fdm_core::protocol::{LineProtocol, Response};
use fdm_core::thermal::control::{HeaterOutputs, TemperatureController};
use fdm_core::thermal::pwm::SoftPwm;
use fdm_core::thermal::sampler::AdcSampler;
use fdm_core::thermal::table::{BED_TABLE, Celsius, HOTEND_TABLE, OVERSAMPLE};
use fdm_hardware::{SimHeaterPin, SimThermistor};
use fdm_traits::{Clock, MonotonicClock};
use tracing::{info, warn};

pub struct PrintOutcome {
    pub lines: usize,
    pub moves: usize,
    pub blocks_retired: usize,
    pub motion_time_s: f64,
    pub final_position_mm: [f32; NUM_AXES],
}

/// Wire a full simulated machine, run the file, tear the threads down.
pub fn run(
    file: &Path,
    motion_cfg: MotionCfg,
    thermal_cfg: ThermalCfg,
    safety: SafetyCfg,
) -> eyre::Result<PrintOutcome> {
    let text = fs::read_to_string(file)
        .wrap_err_with(|| format!("reading move file {}", file.display()))?;

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let outputs = HeaterOutputs::default();

    // Simulated heaters and thermistors, coupled through a first-order
    // plant so M109/M190 behave like a real warm-up.
    let hotend_pin = SimHeaterPin::new();
    let bed_pin = SimHeaterPin::new();
    let ambient = sample_at(&HOTEND_TABLE, 25);
    let hotend_therm = SimThermistor::with_plant(
        ambient,
        sample_at(&HOTEND_TABLE, 250),
        3,
        hotend_pin.level_handle(),
    );
    let bed_therm = SimThermistor::with_plant(
        sample_at(&BED_TABLE, 25),
        sample_at(&BED_TABLE, 110),
        3,
        bed_pin.level_handle(),
    );

    let (mut sampler, feed) = AdcSampler::new(hotend_therm, bed_therm, Arc::clone(&clock));
    let thermal = TemperatureController::new(thermal_cfg, feed, outputs.clone(), Arc::clone(&clock));
    let mut pwm = SoftPwm::new(hotend_pin, bed_pin, outputs);

    let stepper = Arc::new(StepperHandle::new());
    let planner = Planner::new(motion_cfg, safety.clone(), stepper.clone())
        .wrap_err("building planner")?;
    let queue = planner.queue();
    let mut machine = Machine::new(planner, thermal, stepper.clone(), Arc::clone(&clock), safety);

    // Timer context: ADC state machine and soft PWM on one ~1 kHz tick.
    let tick_period = Duration::from_micros(fdm_core::util::period_us(1000));
    let isr_stop = Arc::new(AtomicBool::new(false));
    let isr_stop_bg = Arc::clone(&isr_stop);
    let isr = thread::spawn(move || {
        while !isr_stop_bg.load(Ordering::Relaxed) {
            sampler.tick();
            pwm.tick();
            thread::sleep(tick_period);
        }
    });

    // Consumer context: pops blocks and steps them out.
    let feed_done = Arc::new(AtomicBool::new(false));
    let feed_done_bg = Arc::clone(&feed_done);
    let consumer = thread::spawn(move || {
        let mut exec = StepExecutor::new(queue, stepper);
        let mut retired = 0usize;
        loop {
            if exec.step_one() {
                retired += 1;
                continue;
            }
            if feed_done_bg.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(Duration::from_micros(500));
        }
        (retired, exec.elapsed_s())
    });

    let outcome = stream_lines(&text, &mut machine);

    // Drain what is left, then stop the workers.
    let drain = drain_queue(&mut machine);
    feed_done.store(true, Ordering::Relaxed);
    let (blocks_retired, motion_time_s) = match consumer.join() {
        Ok(stats) => stats,
        Err(_) => (0, 0.0),
    };
    isr_stop.store(true, Ordering::Relaxed);
    let _ = isr.join();

    let (lines, moves) = outcome?;
    drain?;

    Ok(PrintOutcome {
        lines,
        moves,
        blocks_retired,
        motion_time_s,
        final_position_mm: machine.planner.position_mm(),
    })
}

fn drain_queue(machine: &mut Machine) -> eyre::Result<()> {
    while !machine.planner.is_empty() && machine.is_running() {
        machine.idle()?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

/// 10-bit sample (pre-oversampling) corresponding to a temperature.
fn sample_at(table: &fdm_core::thermal::table::ThermistorTable, deg: i16) -> u16 {
    table.celsius_to_adc(Celsius::from_whole(deg)) / OVERSAMPLE
}

fn stream_lines(text: &str, machine: &mut Machine) -> eyre::Result<(usize, usize)> {
    let mut protocol = LineProtocol::new();
    let mut session = GcodeSession::new();
    let mut lines = 0usize;
    let mut moves = 0usize;

    for raw in text.lines() {
        lines += 1;
        match protocol.accept(raw) {
            Ok(Some(cmd)) => {
                let before = moves;
                session.dispatch(&cmd, machine, &mut moves)?;
                if moves > before {
                    info!(line = lines, cmd = %cmd, "move queued");
                }
                emit(&Response::Ok);
            }
            Ok(None) => emit(&Response::Ok),
            Err(err) => {
                for response in protocol.resend_responses(&err) {
                    emit(&response);
                }
            }
        }
        machine.idle()?;
        if machine.state() != MachineState::Running {
            break;
        }
    }
    Ok((lines, moves))
}

fn emit(response: &Response) {
    println!("{}", response.render());
}

/// Minimal move-stream dialect: linear moves, position sets, temperature
/// and fan M-codes. The full tokenizer/dispatcher lives upstream of the
/// core; this is just enough to drive it from a file.
struct GcodeSession {
    /// Sticky feedrate, mm/s.
    feedrate_mm_s: f32,
}

impl GcodeSession {
    fn new() -> Self {
        Self { feedrate_mm_s: 30.0 }
    }

    fn dispatch(
        &mut self,
        cmd: &str,
        machine: &mut Machine,
        moves: &mut usize,
    ) -> eyre::Result<()> {
        let mut words = cmd.split_whitespace();
        let Some(code) = words.next() else {
            return Ok(());
        };
        let rest: Vec<&str> = words.collect();

        match code {
            "G0" | "G1" => {
                if let Some(f) = word_value(&rest, 'F') {
                    self.feedrate_mm_s = f / 60.0;
                }
                let current = machine.planner.position_mm();
                let mut target = current;
                for (i, letter) in ['X', 'Y', 'Z', 'E'].iter().enumerate() {
                    if let Some(v) = word_value(&rest, *letter) {
                        target[i] = v;
                    }
                }
                machine.enqueue_linear_move(target, self.feedrate_mm_s, 0)?;
                *moves += 1;
            }
            "G28" => {
                machine.planner.set_position_mm_all([0.0; NUM_AXES]);
            }
            "G92" => {
                let mut pos = machine.planner.position_mm();
                for (i, letter) in ['X', 'Y', 'Z', 'E'].iter().enumerate() {
                    if let Some(v) = word_value(&rest, *letter) {
                        pos[i] = v;
                    }
                }
                machine.planner.set_position_mm_all(pos);
            }
            "M104" => {
                let s = word_value(&rest, 'S').unwrap_or(0.0);
                machine.thermal.set_target_hotend(Celsius::from_f32(s));
            }
            "M109" => {
                let s = word_value(&rest, 'S').unwrap_or(0.0);
                machine.thermal.set_target_hotend(Celsius::from_f32(s));
                machine.wait_for_hotend(Celsius::from_whole(3))?;
            }
            "M140" => {
                let s = word_value(&rest, 'S').unwrap_or(0.0);
                machine.thermal.set_target_bed(Celsius::from_f32(s));
            }
            "M190" => {
                let s = word_value(&rest, 'S').unwrap_or(0.0);
                machine.thermal.set_target_bed(Celsius::from_f32(s));
                machine.wait_for_bed(Celsius::from_whole(3))?;
            }
            "M105" => {
                emit(&Response::Echo(format!(
                    "T:{:.1}/{:.1} B:{:.1}/{:.1}",
                    machine.thermal.current().to_f32(),
                    machine.thermal.target().to_f32(),
                    machine.thermal.current_bed().to_f32(),
                    machine.thermal.target_bed().to_f32(),
                )));
            }
            "M106" => {
                let s = word_value(&rest, 'S').unwrap_or(255.0);
                machine.planner.set_fan_speed(0, s.clamp(0.0, 255.0) as u8);
            }
            "M107" => {
                machine.planner.set_fan_speed(0, 0);
            }
            "M112" => {
                machine.emergency_stop();
                machine.resync_position();
            }
            "M220" => {
                if let Some(s) = word_value(&rest, 'S') {
                    machine.planner.set_feedrate_percentage(s.max(1.0) as u16);
                }
            }
            "M221" => {
                if let Some(s) = word_value(&rest, 'S') {
                    machine.planner.set_flow_percentage(0, s.max(1.0) as u16);
                }
            }
            "M110" => {
                // Line-number reset; fully handled by the protocol layer.
            }
            other => {
                warn!(code = other, "unknown command ignored");
                emit(&Response::Echo(format!("Unknown command: \"{other}\"")));
            }
        }
        Ok(())
    }
}

fn word_value(words: &[&str], letter: char) -> Option<f32> {
    words
        .iter()
        .find(|w| w.starts_with(letter))
        .and_then(|w| w[1..].parse().ok())
}
