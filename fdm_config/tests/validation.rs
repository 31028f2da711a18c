use fdm_config::{ConfigError, load_toml};

fn base_toml() -> String {
    r#"
[pins]
heater_hotend = 4
heater_bed = 3
therm_hotend_channel = 0
therm_bed_channel = 1

[axes]
steps_per_mm = [80.0, 80.0, 400.0, 100.0]
max_feedrate_mm_s = [300.0, 300.0, 5.0, 25.0]
max_acceleration_mm_s2 = [1500, 1500, 100, 10000]
max_jerk_mm_s = [10.0, 10.0, 0.4, 5.0]

[planner]
acceleration = 1000.0
retract_acceleration = 3000.0
travel_acceleration = 1000.0
min_feedrate_mm_s = 0.05
min_travel_feedrate_mm_s = 0.05
min_segment_time_us = 20000
"#
    .to_string()
}

#[test]
fn valid_config_loads() {
    let cfg = load_toml(&base_toml()).unwrap();
    assert_eq!(cfg.pins.heater_hotend, 4);
    assert_eq!(cfg.axes.steps_per_mm[2], 400.0);
    assert!(cfg.pins.estop_in.is_none());
    assert!(cfg.thermal.manager.is_none());
}

#[test]
fn zero_steps_per_mm_is_rejected() {
    let toml = base_toml().replace(
        "steps_per_mm = [80.0, 80.0, 400.0, 100.0]",
        "steps_per_mm = [80.0, 0.0, 400.0, 100.0]",
    );
    assert!(matches!(load_toml(&toml), Err(ConfigError::Invalid(_))));
}

#[test]
fn negative_jerk_is_rejected() {
    let toml = base_toml().replace(
        "max_jerk_mm_s = [10.0, 10.0, 0.4, 5.0]",
        "max_jerk_mm_s = [10.0, -1.0, 0.4, 5.0]",
    );
    assert!(matches!(load_toml(&toml), Err(ConfigError::Invalid(_))));
}

#[test]
fn unknown_manager_is_rejected() {
    let toml = format!("{}\n[thermal]\nmanager = \"fuzzy\"\n", base_toml());
    assert!(matches!(load_toml(&toml), Err(ConfigError::Invalid(_))));
}

#[test]
fn pid_manager_is_accepted() {
    let toml = format!(
        "{}\n[thermal]\nmanager = \"pid\"\npid_p = 20.0\npid_i = 1.0\npid_d = 100.0\n",
        base_toml()
    );
    let cfg = load_toml(&toml).unwrap();
    assert_eq!(cfg.thermal.manager.as_deref(), Some("pid"));
    assert_eq!(cfg.thermal.pid_p, Some(20.0));
}

#[test]
fn syntax_error_is_a_parse_error() {
    assert!(matches!(
        load_toml("this is not toml ["),
        Err(ConfigError::Parse(_))
    ));
}
