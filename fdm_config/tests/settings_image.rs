use fdm_config::settings::{Settings, SettingsError, load_settings, save_settings};

#[test]
fn save_then_load_yields_equal_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.bin");

    let settings = Settings {
        acceleration: 800.0,
        max_jerk_mm_s: [8.0, 8.0, 0.3, 4.5],
        preheat_presets: [(200, 60), (245, 105), (225, 80)],
        fan_speed: 191,
        ..Settings::default()
    };
    save_settings(&path, &settings).unwrap();
    let loaded = load_settings(&path).unwrap();
    assert_eq!(loaded, settings);
}

#[test]
fn save_replaces_previous_image_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.bin");

    save_settings(&path, &Settings::default()).unwrap();
    let updated = Settings {
        fan_speed: 255,
        ..Settings::default()
    };
    save_settings(&path, &updated).unwrap();
    assert_eq!(load_settings(&path).unwrap(), updated);
    // No stray temp file left behind.
    assert!(!path.with_extension("new").exists());
}

#[test]
fn flipped_bit_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.bin");
    save_settings(&path, &Settings::default()).unwrap();

    let mut image = std::fs::read(&path).unwrap();
    let mid = image.len() / 2;
    image[mid] ^= 0x01;
    std::fs::write(&path, &image).unwrap();

    assert!(matches!(load_settings(&path), Err(SettingsError::Crc)));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_settings(&dir.path().join("absent.bin")),
        Err(SettingsError::Io(_))
    ));
}
