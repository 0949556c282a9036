use std::{fs, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use kiosk_core::{
    session::DEFAULT_FAILURE_MESSAGE, ControllerConfig, HttpClientOptions, ScreenText,
    SessionTimings, DEFAULT_SERVICE_URL,
};
use serde::Deserialize;
use shared::domain::{ClosetId, LockerId};

pub const DEFAULT_CONFIG_FILE: &str = "kiosk.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KioskSettings {
    pub service_url: String,
    pub locker_id: i64,
    pub closet_id: i64,
    pub dwell_ms: u64,
    pub deposit_display_ms: u64,
    pub withdraw_display_ms: u64,
    pub connect_timeout_ms: Option<u64>,
    pub keypad_max_len: Option<usize>,
    pub failure_message: String,
}

impl Default for KioskSettings {
    fn default() -> Self {
        let timings = SessionTimings::default();
        Self {
            service_url: DEFAULT_SERVICE_URL.into(),
            locker_id: 1,
            closet_id: 1,
            dwell_ms: timings.dwell.as_millis() as u64,
            deposit_display_ms: timings.deposit_display.as_millis() as u64,
            withdraw_display_ms: timings.withdraw_display.as_millis() as u64,
            connect_timeout_ms: None,
            keypad_max_len: None,
            failure_message: DEFAULT_FAILURE_MESSAGE.into(),
        }
    }
}

impl KioskSettings {
    pub fn timings(&self) -> SessionTimings {
        SessionTimings {
            dwell: Duration::from_millis(self.dwell_ms),
            deposit_display: Duration::from_millis(self.deposit_display_ms),
            withdraw_display: Duration::from_millis(self.withdraw_display_ms),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            locker_id: LockerId(self.locker_id),
            closet_id: ClosetId(self.closet_id),
            timings: self.timings(),
            failure_message: self.failure_message.clone(),
        }
    }

    pub fn client_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn screen_text(&self) -> ScreenText {
        ScreenText {
            error_generic: self.failure_message.clone(),
            ..ScreenText::default()
        }
    }
}

/// Defaults, then the config file, then environment variables.
///
/// An explicit path must exist; the default `kiosk.toml` is optional.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<KioskSettings> {
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    let mut settings = match explicit_path {
        Some(path) => read_settings_file(path)?,
        None if default_path.exists() => read_settings_file(default_path)?,
        None => KioskSettings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<KioskSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read kiosk config '{}'", path.display()))?;
    parse_settings(&raw).with_context(|| format!("invalid kiosk config '{}'", path.display()))
}

pub fn parse_settings(raw: &str) -> anyhow::Result<KioskSettings> {
    Ok(toml::from_str(raw)?)
}

pub fn apply_env_overrides(settings: &mut KioskSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("KIOSK_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Some(v) = lookup("APP__SERVICE_URL") {
        settings.service_url = v;
    }

    override_parsed(&lookup, "KIOSK_LOCKER_ID", &mut settings.locker_id);
    override_parsed(&lookup, "KIOSK_CLOSET_ID", &mut settings.closet_id);
    override_parsed(&lookup, "KIOSK_DWELL_MS", &mut settings.dwell_ms);
    override_parsed(
        &lookup,
        "KIOSK_DEPOSIT_DISPLAY_MS",
        &mut settings.deposit_display_ms,
    );
    override_parsed(
        &lookup,
        "KIOSK_WITHDRAW_DISPLAY_MS",
        &mut settings.withdraw_display_ms,
    );

    let mut connect_timeout_ms = 0u64;
    if override_parsed(&lookup, "KIOSK_CONNECT_TIMEOUT_MS", &mut connect_timeout_ms) {
        settings.connect_timeout_ms = Some(connect_timeout_ms);
    }

    if let Some(v) = lookup("KIOSK_FAILURE_MESSAGE") {
        settings.failure_message = v;
    }
}

/// Unparseable values are ignored and the previous layer wins.
fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> bool {
    match lookup(key).and_then(|v| v.trim().parse::<T>().ok()) {
        Some(parsed) => {
            *slot = parsed;
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
