//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket bind address
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    /// WebSocket port
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { bind: default_gateway_bind(), port: default_gateway_port() }
    }
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    8765
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendTomlConfig {
    pub host: String,
    pub port: u16,
    /// One-time wait before the first connect attempt; the engine needs time
    /// to become reachable after the surrounding system starts
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn default_warmup_secs() -> u64 {
    30
}

fn default_dial_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTomlConfig {
    /// Bound on update/stop acknowledgment waits
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Pause after teardown before a queued start may reconnect
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_settle_delay_ms() -> u64 {
    200
}

impl Default for SessionTomlConfig {
    fn default() -> Self {
        Self { ack_timeout_ms: default_ack_timeout_ms(), settle_delay_ms: default_settle_delay_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_telemetry_host")]
    pub host: String,
    #[serde(default = "default_telemetry_port")]
    pub port: u16,
    #[serde(default = "default_telemetry_topic")]
    pub topic: String,
    #[serde(default = "default_telemetry_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_telemetry_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_telemetry_enabled() -> bool {
    true
}

fn default_telemetry_host() -> String {
    "localhost".to_string()
}

fn default_telemetry_port() -> u16 {
    1883
}

fn default_telemetry_topic() -> String {
    "simulation".to_string()
}

fn default_telemetry_max_retries() -> u32 {
    5
}

fn default_telemetry_retry_delay_secs() -> u64 {
    30
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            host: default_telemetry_host(),
            port: default_telemetry_port(),
            topic: default_telemetry_topic(),
            max_retries: default_telemetry_max_retries(),
            retry_delay_secs: default_telemetry_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// File path for completed-run results (JSONL format)
    #[serde(default = "default_results_file")]
    pub file: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self { file: default_results_file() }
    }
}

fn default_results_file() -> String {
    "results.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub backend: BackendTomlConfig,
    #[serde(default)]
    pub session: SessionTomlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    gateway_bind: String,
    gateway_port: u16,
    backend_host: String,
    backend_port: u16,
    backend_warmup_secs: u64,
    backend_dial_timeout_ms: u64,
    ack_timeout_ms: u64,
    settle_delay_ms: u64,
    telemetry_enabled: bool,
    telemetry_host: String,
    telemetry_port: u16,
    telemetry_topic: String,
    telemetry_max_retries: u32,
    telemetry_retry_delay_secs: u64,
    results_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_bind: default_gateway_bind(),
            gateway_port: default_gateway_port(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 12345,
            backend_warmup_secs: default_warmup_secs(),
            backend_dial_timeout_ms: default_dial_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            telemetry_enabled: default_telemetry_enabled(),
            telemetry_host: default_telemetry_host(),
            telemetry_port: default_telemetry_port(),
            telemetry_topic: default_telemetry_topic(),
            telemetry_max_retries: default_telemetry_max_retries(),
            telemetry_retry_delay_secs: default_telemetry_retry_delay_secs(),
            results_file: default_results_file(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            gateway_bind: toml_config.gateway.bind,
            gateway_port: toml_config.gateway.port,
            backend_host: toml_config.backend.host,
            backend_port: toml_config.backend.port,
            backend_warmup_secs: toml_config.backend.warmup_secs,
            backend_dial_timeout_ms: toml_config.backend.dial_timeout_ms,
            ack_timeout_ms: toml_config.session.ack_timeout_ms,
            settle_delay_ms: toml_config.session.settle_delay_ms,
            telemetry_enabled: toml_config.telemetry.enabled,
            telemetry_host: toml_config.telemetry.host,
            telemetry_port: toml_config.telemetry.port,
            telemetry_topic: toml_config.telemetry.topic,
            telemetry_max_retries: toml_config.telemetry.max_retries,
            telemetry_retry_delay_secs: toml_config.telemetry.retry_delay_secs,
            results_file: toml_config.results.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn gateway_bind(&self) -> &str {
        &self.gateway_bind
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway_port
    }

    pub fn backend_host(&self) -> &str {
        &self.backend_host
    }

    pub fn backend_port(&self) -> u16 {
        self.backend_port
    }

    pub fn backend_warmup(&self) -> Duration {
        Duration::from_secs(self.backend_warmup_secs)
    }

    pub fn backend_dial_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_dial_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry_enabled
    }

    pub fn telemetry_host(&self) -> &str {
        &self.telemetry_host
    }

    pub fn telemetry_port(&self) -> u16 {
        self.telemetry_port
    }

    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    pub fn telemetry_max_retries(&self) -> u32 {
        self.telemetry_max_retries
    }

    pub fn telemetry_retry_delay(&self) -> Duration {
        Duration::from_secs(self.telemetry_retry_delay_secs)
    }

    pub fn results_file(&self) -> &str {
        &self.results_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point at a fake backend
    #[cfg(test)]
    pub fn with_backend_addr(mut self, host: &str, port: u16) -> Self {
        self.backend_host = host.to_string();
        self.backend_port = port;
        self
    }

    /// Builder method for tests to skip the engine warm-up wait
    #[cfg(test)]
    pub fn with_warmup_secs(mut self, secs: u64) -> Self {
        self.backend_warmup_secs = secs;
        self
    }

    /// Builder method for tests to shrink acknowledgment waits
    #[cfg(test)]
    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    /// Builder method for tests to shrink the teardown settle pause
    #[cfg(test)]
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }
}
