use std::{collections::HashMap, fs, time::Duration};

use client_core::SessionConfig;
use shared::domain::{
    AvrdudeOptions, DeviceTarget, DEFAULT_BAUD, DEFAULT_PART, DEFAULT_PORT, DEFAULT_PROGRAMMER,
};

pub const SETTINGS_FILE: &str = "flasher.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub port: String,
    pub part: String,
    pub programmer: String,
    pub baud: u32,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            port: DEFAULT_PORT.into(),
            part: DEFAULT_PART.into(),
            programmer: DEFAULT_PROGRAMMER.into(),
            baud: DEFAULT_BAUD,
            poll_interval_ms: 2_000,
            reconnect_delay_ms: 3_000,
        }
    }
}

impl Settings {
    pub fn target(&self, verbose: bool) -> DeviceTarget {
        DeviceTarget {
            port: self.port.clone(),
            part: self.part.clone(),
            programmer: self.programmer.clone(),
            baud: self.baud,
            verbose,
        }
    }

    pub fn session_config(&self, verbose: bool, options: AvrdudeOptions) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            target: self.target(verbose),
            options,
            ..SessionConfig::new(self.server_url.clone())
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Layer the settings file and environment over the defaults.
///
/// Unparseable values are ignored and the previous layer wins.
pub fn load_settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
            apply(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply(&mut settings, |key| env(&format!("FLASHER_{}", key.to_uppercase())));
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    settings
}

fn apply(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("port") {
        settings.port = v;
    }
    if let Some(v) = lookup("part") {
        settings.part = v;
    }
    if let Some(v) = lookup("programmer") {
        settings.programmer = v;
    }
    if let Some(v) = lookup("baud").and_then(|v| v.trim().parse().ok()) {
        settings.baud = v;
    }
    if let Some(v) = lookup("poll_interval_ms").and_then(|v| v.trim().parse().ok()) {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = lookup("reconnect_delay_ms").and_then(|v| v.trim().parse().ok()) {
        settings.reconnect_delay_ms = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
