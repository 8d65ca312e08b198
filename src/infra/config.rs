//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument,
//! the GORT_CONFIG environment variable, or the default config/dev.toml.

use crate::domain::docking::DockingParams;
use crate::infra::backoff::Backoff;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen_addr: default_listen_addr() }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    pub addr: String,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9001".to_string(),
            tick_ms: default_tick_ms(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
            command_queue: default_command_queue(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_tick_ms() -> u64 {
    20
}

fn default_min_speed() -> f64 {
    0.1
}

fn default_max_speed() -> f64 {
    0.5
}

fn default_command_queue() -> usize {
    64
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    30000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_backoff_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            max_failures: default_backoff_max_failures(),
            cooldown_ms: default_backoff_cooldown_ms(),
        }
    }
}

fn default_backoff_initial_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_backoff_max_failures() -> u32 {
    10
}

fn default_backoff_cooldown_ms() -> u64 {
    30000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockingConfig {
    #[serde(default = "default_zero_crossing_threshold")]
    pub zero_crossing_threshold: u32,
    #[serde(default = "default_pass_cap")]
    pub pass_cap: u32,
    #[serde(default = "default_speed_epsilon")]
    pub speed_epsilon: f64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            zero_crossing_threshold: default_zero_crossing_threshold(),
            pass_cap: default_pass_cap(),
            speed_epsilon: default_speed_epsilon(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_zero_crossing_threshold() -> u32 {
    100
}

fn default_pass_cap() -> u32 {
    6
}

fn default_speed_epsilon() -> f64 {
    0.025
}

fn default_debounce_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripLogConfig {
    #[serde(default = "default_trip_log_dir")]
    pub dir: String,
}

impl Default for TripLogConfig {
    fn default() -> Self {
        Self { dir: default_trip_log_dir() }
    }
}

fn default_trip_log_dir() -> String {
    "logs".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub docking: DockingConfig,
    #[serde(default)]
    pub trip_log: TripLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    listen_addr: String,
    drive_addr: String,
    tick_ms: u64,
    min_speed: f64,
    max_speed: f64,
    command_queue: usize,
    connect_timeout_ms: u64,
    read_timeout_ms: u64,
    backoff: BackoffConfig,
    zero_crossing_threshold: u32,
    pass_cap: u32,
    speed_epsilon: f64,
    debounce_ms: u64,
    trip_log_dir: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            listen_addr: toml_config.server.listen_addr,
            drive_addr: toml_config.drive.addr,
            tick_ms: toml_config.drive.tick_ms,
            min_speed: toml_config.drive.min_speed,
            max_speed: toml_config.drive.max_speed,
            command_queue: toml_config.drive.command_queue,
            connect_timeout_ms: toml_config.drive.connect_timeout_ms,
            read_timeout_ms: toml_config.drive.read_timeout_ms,
            backoff: toml_config.drive.backoff,
            zero_crossing_threshold: toml_config.docking.zero_crossing_threshold,
            pass_cap: toml_config.docking.pass_cap,
            speed_epsilon: toml_config.docking.speed_epsilon,
            debounce_ms: toml_config.docking.debounce_ms,
            trip_log_dir: toml_config.trip_log.dir,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Determine config file path from an explicit argument or environment
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }
        if let Ok(path) = env::var("GORT_CONFIG") {
            return path;
        }
        "config/dev.toml".to_string()
    }

    /// Hysteresis parameters for the docking state machine
    pub fn docking_params(&self) -> DockingParams {
        DockingParams {
            zero_crossing_threshold: self.zero_crossing_threshold,
            pass_cap: self.pass_cap,
            speed_epsilon: self.speed_epsilon,
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    /// Reconnect policy for the drive-bus client
    pub fn drive_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.initial_ms),
            Duration::from_millis(self.backoff.max_ms),
            self.backoff.max_failures,
            Duration::from_millis(self.backoff.cooldown_ms),
        )
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn drive_addr(&self) -> &str {
        &self.drive_addr
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn command_queue(&self) -> usize {
        self.command_queue
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn trip_log_dir(&self) -> &str {
        &self.trip_log_dir
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:9000");
        assert_eq!(config.tick_ms(), 20);
        assert_eq!(config.min_speed(), 0.1);
        assert_eq!(config.max_speed(), 0.5);
        assert_eq!(config.trip_log_dir(), "logs");
        assert_eq!(config.metrics_interval_secs(), 10);
    }

    #[test]
    fn test_default_docking_params() {
        let params = Config::default().docking_params();
        assert_eq!(params.zero_crossing_threshold, 100);
        assert_eq!(params.pass_cap, 6);
        assert_eq!(params.speed_epsilon, 0.025);
        assert_eq!(params.debounce, Duration::from_millis(20));
    }

    #[test]
    fn test_resolve_config_path_precedence() {
        // Single test touches the env var so parallel runs cannot race it.
        std::env::remove_var("GORT_CONFIG");
        assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
        assert_eq!(Config::resolve_config_path(Some("config/rover.toml")), "config/rover.toml");

        std::env::set_var("GORT_CONFIG", "config/env.toml");
        assert_eq!(Config::resolve_config_path(None), "config/env.toml");
        assert_eq!(
            Config::resolve_config_path(Some("config/rover.toml")),
            "config/rover.toml",
            "explicit argument wins over the environment"
        );
        std::env::remove_var("GORT_CONFIG");
    }

    #[test]
    fn test_drive_backoff_from_defaults() {
        let mut backoff = Config::default().drive_backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
