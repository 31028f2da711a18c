mod cli;
mod error_fmt;
mod print;

use std::fs;
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::Parser;
use eyre::WrapErr;
use fdm_config::settings::{Settings, load_settings, save_settings};
use fdm_core::config::{HeaterManagerKind, MotionCfg, SafetyCfg, ThermalCfg};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, SettingsAction};

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Build a file sink writer with optional rotation, storing the
/// non-blocking guard in OnceLock.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb_writer)
}

/// Initialize tracing once for the whole app. RUST_LOG wins over the CLI
/// level when set.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let file_writer = file_layer(file, rotation);

    if json {
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer.json());
        match file_writer {
            Some(w) => registry.with(fmt::layer().json().with_writer(w)).init(),
            None => registry.init(),
        }
    } else {
        let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);
        match file_writer {
            Some(w) => registry.with(fmt::layer().with_ansi(false).with_writer(w)).init(),
            None => registry.init(),
        }
    }
}

/// Core configuration from the optional TOML file, defaults otherwise.
fn load_core_cfg(cli: &Cli) -> eyre::Result<(MotionCfg, ThermalCfg, SafetyCfg)> {
    let Some(path) = &cli.config else {
        return Ok((MotionCfg::default(), ThermalCfg::default(), SafetyCfg::default()));
    };
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    let cfg = fdm_config::load_toml(&text).wrap_err("parsing config")?;

    let motion = MotionCfg {
        axis_steps_per_mm: cfg.axes.steps_per_mm,
        max_feedrate_mm_s: cfg.axes.max_feedrate_mm_s,
        max_acceleration_mm_per_s2: cfg.axes.max_acceleration_mm_s2,
        max_jerk_mm_s: cfg.axes.max_jerk_mm_s,
        acceleration: cfg.planner.acceleration,
        retract_acceleration: cfg.planner.retract_acceleration,
        travel_acceleration: cfg.planner.travel_acceleration,
        min_feedrate_mm_s: cfg.planner.min_feedrate_mm_s,
        min_travel_feedrate_mm_s: cfg.planner.min_travel_feedrate_mm_s,
        min_segment_time_us: cfg.planner.min_segment_time_us,
    };
    let mut thermal = ThermalCfg::default();
    if let Some(v) = cfg.thermal.hotend_max_c {
        thermal.hotend_max_temp_c = v;
    }
    if let Some(v) = cfg.thermal.bed_max_c {
        thermal.bed_max_temp_c = v;
    }
    if let Some(v) = cfg.thermal.min_extrude_temp_c {
        thermal.min_extrude_temp_c = v;
    }
    if cfg.thermal.manager.as_deref() == Some("pid") {
        let defaults = Settings::default();
        thermal.manager = HeaterManagerKind::Pid {
            kp: cfg.thermal.pid_p.unwrap_or(defaults.hotend_pid[0]),
            ki: cfg.thermal.pid_i.unwrap_or(defaults.hotend_pid[1]),
            kd: cfg.thermal.pid_d.unwrap_or(defaults.hotend_pid[2]),
        };
    }
    Ok((motion, thermal, SafetyCfg::default()))
}

fn run(cli: Cli) -> eyre::Result<()> {
    match &cli.command {
        Command::Print { file, summary } => {
            let (motion, thermal, safety) = load_core_cfg(&cli)?;
            let outcome = print::run(file, motion, thermal, safety)?;
            if *summary {
                let line = serde_json::json!({
                    "lines": outcome.lines,
                    "moves": outcome.moves,
                    "blocks_retired": outcome.blocks_retired,
                    "motion_time_s": outcome.motion_time_s,
                    "final_position_mm": outcome.final_position_mm,
                });
                println!("{line}");
            }
            Ok(())
        }
        Command::CheckConfig => {
            let (motion, _, _) = load_core_cfg(&cli)?;
            println!(
                "config ok: steps/mm {:?}, max feedrate {:?}",
                motion.axis_steps_per_mm, motion.max_feedrate_mm_s
            );
            Ok(())
        }
        Command::Settings { action } => match action {
            SettingsAction::Show { path } => {
                let settings = if path.exists() {
                    load_settings(path).wrap_err("loading settings image")?
                } else {
                    Settings::default()
                };
                println!("{settings:#?}");
                Ok(())
            }
            SettingsAction::Reset { path } => {
                save_settings(path, &Settings::default()).wrap_err("writing settings image")?;
                println!("wrote factory settings to {}", path.display());
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(
        cli.json,
        &cli.log_level,
        cli.log_file.as_deref(),
        cli.log_rotation.as_deref(),
    );
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_fmt::humanize(&err));
            ExitCode::FAILURE
        }
    }
}
