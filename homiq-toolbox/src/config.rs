//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use homiq_core::command::{DEFAULT_ACK_TIMEOUT, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use homiq_core::stream::DEFAULT_MAX_BUFFER;
use serde::Deserialize;

/// Toolbox configuration. File: ~/.config/homiq/config.toml or /etc/homiq/config.toml.
/// Env overrides: HOMIQ_TCP, HOMIQ_SERIAL, HOMIQ_BAUD, HOMIQ_RETRIES,
/// HOMIQ_RETRY_DELAY_MS, HOMIQ_ACK_TIMEOUT_MS, HOMIQ_MAX_BUFFER.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default gateway endpoint, HOST:PORT.
    #[serde(default)]
    pub tcp: Option<String>,
    /// Default serial device.
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_tcp_read_timeout_ms")]
    pub tcp_read_timeout_ms: u64,
    #[serde(default = "default_serial_read_timeout_ms")]
    pub serial_read_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Attempts per command, including the first.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Reassembly buffer cap in bytes (0 = unbounded).
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,
}

fn default_baud() -> u32 {
    115_200
}
fn default_tcp_read_timeout_ms() -> u64 {
    500
}
fn default_serial_read_timeout_ms() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_retries() -> u32 {
    DEFAULT_RETRIES
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}
fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT.as_millis() as u64
}
fn default_max_buffer() -> usize {
    DEFAULT_MAX_BUFFER
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp: None,
            serial: None,
            baud: default_baud(),
            tcp_read_timeout_ms: default_tcp_read_timeout_ms(),
            serial_read_timeout_ms: default_serial_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_buffer: default_max_buffer(),
        }
    }
}

impl Config {
    pub fn tcp_read_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_read_timeout_ms)
    }

    pub fn serial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Buffer cap for the reassembler, `None` when unbounded.
    pub fn buffer_limit(&self) -> Option<usize> {
        (self.max_buffer > 0).then_some(self.max_buffer)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("HOMIQ_TCP") {
        c.tcp = Some(s);
    }
    if let Some(s) = var("HOMIQ_SERIAL") {
        c.serial = Some(s);
    }
    if let Some(b) = var("HOMIQ_BAUD").and_then(|s| s.parse().ok()) {
        c.baud = b;
    }
    if let Some(n) = var("HOMIQ_RETRIES").and_then(|s| s.parse().ok()) {
        c.retries = n;
    }
    if let Some(ms) = var("HOMIQ_RETRY_DELAY_MS").and_then(|s| s.parse().ok()) {
        c.retry_delay_ms = ms;
    }
    if let Some(ms) = var("HOMIQ_ACK_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
        c.ack_timeout_ms = ms;
    }
    if let Some(n) = var("HOMIQ_MAX_BUFFER").and_then(|s| s.parse().ok()) {
        c.max_buffer = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/homiq/config.toml"));
    }
    out.push(PathBuf::from("/etc/homiq/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => {
            tracing::debug!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_legacy_tools() {
        let c = Config::default();
        assert_eq!(c.baud, 115_200);
        assert_eq!(c.retries, 5);
        assert_eq!(c.retry_delay_ms, 300);
        assert_eq!(c.ack_timeout_ms, 2000);
        assert_eq!(c.tcp_read_timeout(), Duration::from_millis(500));
        assert_eq!(c.serial_read_timeout(), Duration::from_millis(100));
        assert_eq!(c.buffer_limit(), Some(DEFAULT_MAX_BUFFER));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("tcp = \"10.10.20.201:4001\"\nretries = 2\n").unwrap();
        assert_eq!(c.tcp.as_deref(), Some("10.10.20.201:4001"));
        assert_eq!(c.retries, 2);
        assert_eq!(c.baud, 115_200);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1\n").is_err());
    }

    #[test]
    fn env_overrides_and_bad_values_ignored() {
        let env: HashMap<&str, &str> = [
            ("HOMIQ_SERIAL", "/dev/ttyR00"),
            ("HOMIQ_BAUD", "9600"),
            ("HOMIQ_RETRIES", "many"),
            ("HOMIQ_MAX_BUFFER", "0"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.serial.as_deref(), Some("/dev/ttyR00"));
        assert_eq!(c.baud, 9600);
        assert_eq!(c.retries, 5);
        assert_eq!(c.buffer_limit(), None);
    }
}
