use std::collections::HashMap;

use super::*;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_match_the_service_defaults() {
    let settings = load_settings_from(None, env_of(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.server_url, "http://127.0.0.1:5000");
    assert_eq!(settings.port, "/dev/ttyS7");
    assert_eq!(settings.baud, 115_200);
}

#[test]
fn file_overrides_defaults() {
    let file = r#"
        server_url = "http://flasher.local:5000"
        port = "/dev/ttyUSB0"
        baud = "57600"
    "#;
    let settings = load_settings_from(Some(file), env_of(&[]));
    assert_eq!(settings.server_url, "http://flasher.local:5000");
    assert_eq!(settings.port, "/dev/ttyUSB0");
    assert_eq!(settings.baud, 57_600);
    assert_eq!(settings.part, "atmega328p");
}

#[test]
fn environment_overrides_file() {
    let file = r#"
        server_url = "http://from-file:5000"
        part = "atmega2560"
    "#;
    let settings = load_settings_from(
        Some(file),
        env_of(&[
            ("FLASHER_SERVER_URL", "http://from-env:5000"),
            ("FLASHER_PROGRAMMER", "wiring"),
            ("FLASHER_POLL_INTERVAL_MS", "500"),
        ]),
    );
    assert_eq!(settings.server_url, "http://from-env:5000");
    assert_eq!(settings.part, "atmega2560");
    assert_eq!(settings.programmer, "wiring");
    assert_eq!(settings.poll_interval_ms, 500);
}

#[test]
fn app_prefixed_server_url_wins() {
    let settings = load_settings_from(
        None,
        env_of(&[
            ("FLASHER_SERVER_URL", "http://a:5000"),
            ("APP__SERVER_URL", "http://b:5000"),
        ]),
    );
    assert_eq!(settings.server_url, "http://b:5000");
}

#[test]
fn unparseable_values_are_ignored() {
    let settings = load_settings_from(
        Some("baud = \"fast\""),
        env_of(&[("FLASHER_RECONNECT_DELAY_MS", "soon")]),
    );
    assert_eq!(settings.baud, 115_200);
    assert_eq!(settings.reconnect_delay_ms, 3_000);

    let settings = load_settings_from(Some("not toml at all ["), env_of(&[]));
    assert_eq!(settings, Settings::default());
}

#[test]
fn session_config_carries_target_and_timing() {
    let settings = Settings {
        poll_interval_ms: 250,
        ..Settings::default()
    };
    let config = settings.session_config(true, AvrdudeOptions::default());
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.reconnect_delay, Duration::from_secs(3));
    assert!(config.target.verbose);
    assert_eq!(config.server_url, settings.server_url);
}
