//! Machine configuration: TOML on the way in, a checksummed binary image
//! for the values that survive power cycles.

pub mod settings;

use serde::Deserialize;

pub use settings::{Settings, SettingsError, load_settings, save_settings};

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub heater_hotend: u8,
    pub heater_bed: u8,
    pub therm_hotend_channel: u8,
    pub therm_bed_channel: u8,
    pub estop_in: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct AxesCfg {
    pub steps_per_mm: [f32; 4],
    pub max_feedrate_mm_s: [f32; 4],
    pub max_acceleration_mm_s2: [u32; 4],
    pub max_jerk_mm_s: [f32; 4],
}

#[derive(Debug, Deserialize)]
pub struct PlannerCfg {
    pub acceleration: f32,
    pub retract_acceleration: f32,
    pub travel_acceleration: f32,
    pub min_feedrate_mm_s: f32,
    pub min_travel_feedrate_mm_s: f32,
    pub min_segment_time_us: u32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ThermalSection {
    pub hotend_max_c: Option<i16>,
    pub bed_max_c: Option<i16>,
    pub min_extrude_temp_c: Option<i16>,
    pub pid_p: Option<f32>,
    pub pid_i: Option<f32>,
    pub pid_d: Option<f32>,
    /// "bangbang" (default) or "pid"
    pub manager: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    pub axes: AxesCfg,
    pub planner: PlannerCfg,
    #[serde(default)]
    pub thermal: ThermalSection,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

pub fn load_toml(s: &str) -> Result<Config, ConfigError> {
    let cfg = toml::from_str::<Config>(s)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.axes.steps_per_mm.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(ConfigError::Invalid("steps_per_mm must be finite and > 0"));
    }
    if cfg
        .axes
        .max_feedrate_mm_s
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return Err(ConfigError::Invalid("max_feedrate must be finite and > 0"));
    }
    if cfg.axes.max_acceleration_mm_s2.iter().any(|v| *v == 0) {
        return Err(ConfigError::Invalid("max_acceleration must be > 0"));
    }
    if cfg
        .axes
        .max_jerk_mm_s
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return Err(ConfigError::Invalid("max_jerk must be finite and >= 0"));
    }
    if !cfg.planner.acceleration.is_finite() || cfg.planner.acceleration <= 0.0 {
        return Err(ConfigError::Invalid("acceleration must be finite and > 0"));
    }
    if cfg.planner.min_feedrate_mm_s < 0.0 || cfg.planner.min_travel_feedrate_mm_s < 0.0 {
        return Err(ConfigError::Invalid("minimum feedrates must be >= 0"));
    }
    if let Some(manager) = cfg.thermal.manager.as_deref()
        && manager != "bangbang"
        && manager != "pid"
    {
        return Err(ConfigError::Invalid("thermal.manager must be bangbang or pid"));
    }
    Ok(())
}
