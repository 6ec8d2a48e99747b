//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Secrets can be supplied through the environment instead of the file:
//! `GROCY_API_KEY`, `GROCY_API_KEY_FILE` and `BARCODE_SERVER_AUTH_TOKEN`.

use crate::domain::{BuzzerKind, StockAction};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Websocket,
    Mqtt,
    Serial,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Websocket => "websocket",
            FeedKind::Mqtt => "mqtt",
            FeedKind::Serial => "serial",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrocyConfig {
    #[serde(default = "default_grocy_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_grocy_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_grocy_url() -> String {
    "http://localhost:9283".to_string()
}

fn default_grocy_timeout_ms() -> u64 {
    10_000
}

impl Default for GrocyConfig {
    fn default() -> Self {
        Self {
            url: default_grocy_url(),
            api_key: None,
            api_key_file: None,
            timeout_ms: default_grocy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_single_action")]
    pub single: StockAction,
    #[serde(default)]
    pub double: Option<StockAction>,
    /// Pairing window for double scans
    #[serde(default = "default_double_scan_timeout_ms")]
    pub double_scan_timeout_ms: u64,
}

fn default_single_action() -> StockAction {
    StockAction::Consume
}

fn default_double_scan_timeout_ms() -> u64 {
    2000
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            single: default_single_action(),
            double: None,
            double_scan_timeout_ms: default_double_scan_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketConfig {
    #[serde(default = "default_websocket_url")]
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Random UUID v4 per process when unset
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_websocket_url() -> String {
    "ws://localhost:9654".to_string()
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self { url: default_websocket_url(), auth_token: None, client_id: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "barcode-server/scans".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

fn default_serial_device() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_serial_baud() -> u32 {
    9600
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { device: default_serial_device(), baud: default_serial_baud() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub kind: FeedKind,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub serial: SerialConfig,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            channel_capacity: default_channel_capacity(),
            websocket: WebsocketConfig::default(),
            mqtt: MqttConfig::default(),
            serial: SerialConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuzzerConfig {
    #[serde(default)]
    pub kind: BuzzerKind,
    /// GPIO line (simple) or PWM channel (tonal); no feedback when unset
    #[serde(default)]
    pub pin: Option<u32>,
    #[serde(default)]
    pub pwm_chip: u32,
    #[serde(default = "default_failure_melody")]
    pub failure_melody: String,
}

fn default_failure_melody() -> String {
    "X/1/-".to_string()
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self {
            kind: BuzzerKind::default(),
            pin: None,
            pwm_chip: 0,
            failure_melody: default_failure_melody(),
        }
    }
}

/// Success melodies per stock action
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MelodiesConfig {
    #[serde(default)]
    pub add: Option<String>,
    #[serde(default)]
    pub consume: Option<String>,
    #[serde(default)]
    pub open: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub grocy: GrocyConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub buzzer: BuzzerConfig,
    #[serde(default)]
    pub melodies: MelodiesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    grocy_url: String,
    grocy_api_key: String,
    grocy_timeout_ms: u64,
    single_action: StockAction,
    double_action: Option<StockAction>,
    double_scan_timeout_ms: u64,
    feed_kind: FeedKind,
    channel_capacity: usize,
    websocket_url: String,
    websocket_auth_token: Option<String>,
    websocket_client_id: Option<String>,
    mqtt: MqttConfig,
    serial_device: String,
    serial_baud: u32,
    buzzer_kind: BuzzerKind,
    buzzer_pin: Option<u32>,
    pwm_chip: u32,
    failure_melody: String,
    melodies: MelodiesConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), None, "default")
    }
}

/// Read an API key file, trimming the trailing newline editors leave behind
fn read_key_file(path: &str) -> anyhow::Result<String> {
    let key = fs::read_to_string(path)
        .with_context(|| format!("Failed to read API key file {path}"))?;
    Ok(key.trim().to_string())
}

impl Config {
    fn from_toml(toml_config: TomlConfig, api_key: Option<String>, config_file: &str) -> Self {
        let TomlConfig { grocy, actions, feed, buzzer, melodies, metrics } = toml_config;

        Self {
            grocy_url: grocy.url,
            grocy_api_key: api_key.or(grocy.api_key).unwrap_or_default(),
            grocy_timeout_ms: grocy.timeout_ms,
            single_action: actions.single,
            double_action: actions.double,
            double_scan_timeout_ms: actions.double_scan_timeout_ms,
            feed_kind: feed.kind,
            channel_capacity: feed.channel_capacity.max(1),
            websocket_url: feed.websocket.url,
            websocket_auth_token: feed.websocket.auth_token,
            websocket_client_id: feed.websocket.client_id,
            mqtt: feed.mqtt,
            serial_device: feed.serial.device,
            serial_baud: feed.serial.baud,
            buzzer_kind: buzzer.kind,
            buzzer_pin: buzzer.pin,
            pwm_chip: buzzer.pwm_chip,
            failure_melody: buzzer.failure_melody,
            melodies,
            metrics_interval_secs: metrics.interval_secs.max(1),
            prometheus_port: metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse_toml(&content, path)
    }

    fn parse_toml(content: &str, path: &Path) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let api_key = match toml_config.grocy.api_key_file.as_deref() {
            Some(key_file) => Some(read_key_file(key_file)?),
            None => None,
        };

        Ok(Self::from_toml(toml_config, api_key, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    ///
    /// Only a missing file falls back to defaults. A file that cannot be read
    /// or parsed, an unreadable key file and a failing environment override
    /// are errors. Environment overrides are applied in both cases.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::parse_toml(&content, Path::new(path))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path, "config_file_missing_using_defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {path}"));
            }
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply secret overrides; `GROCY_API_KEY_FILE` wins over `GROCY_API_KEY`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BARCODE_SERVER_AUTH_TOKEN") {
            self.websocket_auth_token = Some(token);
        }

        if let Some(key_file) = lookup("GROCY_API_KEY_FILE") {
            self.grocy_api_key = read_key_file(&key_file)?;
        } else if let Some(key) = lookup("GROCY_API_KEY") {
            self.grocy_api_key = key;
        }
        Ok(())
    }

    /// Success melody source configured for a stock action
    pub fn melody_for(&self, action: StockAction) -> Option<&str> {
        match action {
            StockAction::Add => self.melodies.add.as_deref(),
            StockAction::Consume => self.melodies.consume.as_deref(),
            StockAction::Open => self.melodies.open.as_deref(),
        }
    }

    pub fn grocy_url(&self) -> &str {
        &self.grocy_url
    }

    pub fn grocy_api_key(&self) -> &str {
        &self.grocy_api_key
    }

    pub fn grocy_timeout(&self) -> Duration {
        Duration::from_millis(self.grocy_timeout_ms)
    }

    pub fn single_action(&self) -> StockAction {
        self.single_action
    }

    pub fn double_action(&self) -> Option<StockAction> {
        self.double_action
    }

    pub fn double_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.double_scan_timeout_ms)
    }

    pub fn feed_kind(&self) -> FeedKind {
        self.feed_kind
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    pub fn websocket_auth_token(&self) -> Option<&str> {
        self.websocket_auth_token.as_deref()
    }

    pub fn websocket_client_id(&self) -> Option<&str> {
        self.websocket_client_id.as_deref()
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt.host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt.port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt.topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt.username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt.password.as_deref()
    }

    pub fn serial_device(&self) -> &str {
        &self.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.serial_baud
    }

    pub fn buzzer_kind(&self) -> BuzzerKind {
        self.buzzer_kind
    }

    pub fn buzzer_pin(&self) -> Option<u32> {
        self.buzzer_pin
    }

    pub fn pwm_chip(&self) -> u32 {
        self.pwm_chip
    }

    pub fn failure_melody(&self) -> &str {
        &self.failure_melody
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.grocy_url(), "http://localhost:9283");
        assert_eq!(config.grocy_api_key(), "");
        assert_eq!(config.grocy_timeout(), Duration::from_secs(10));
        assert_eq!(config.single_action(), StockAction::Consume);
        assert_eq!(config.double_action(), None);
        assert_eq!(config.double_scan_timeout(), Duration::from_millis(2000));
        assert_eq!(config.feed_kind(), FeedKind::Websocket);
        assert_eq!(config.buzzer_pin(), None);
        assert_eq!(config.failure_melody(), "X/1/-");
        assert_eq!(config.prometheus_port(), 0);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/pantry.toml")), "config/pantry.toml");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[actions]
single = "add"
double = "OPEN"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, None, "inline");

        assert_eq!(config.single_action(), StockAction::Add);
        assert_eq!(config.double_action(), Some(StockAction::Open));
        assert_eq!(config.double_scan_timeout(), Duration::from_millis(2000));
        assert_eq!(config.mqtt_port(), 1883);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result = toml::from_str::<TomlConfig>("[actions]\nsingle = \"PURCHASE\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_melody_for_action() {
        let toml_config: TomlConfig =
            toml::from_str("[melodies]\nadd = \"A4/0.2/-\"\n").unwrap();
        let config = Config::from_toml(toml_config, None, "inline");

        assert_eq!(config.melody_for(StockAction::Add), Some("A4/0.2/-"));
        assert_eq!(config.melody_for(StockAction::Consume), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(key_file, "  from-file  ").unwrap();
        let key_path = key_file.path().display().to_string();

        let env: HashMap<&str, String> = [
            ("GROCY_API_KEY", "from-env".to_string()),
            ("BARCODE_SERVER_AUTH_TOKEN", "token".to_string()),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).cloned()).unwrap();
        assert_eq!(config.grocy_api_key(), "from-env");
        assert_eq!(config.websocket_auth_token(), Some("token"));

        let env: HashMap<&str, String> = [
            ("GROCY_API_KEY", "from-env".to_string()),
            ("GROCY_API_KEY_FILE", key_path),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|key| env.get(key).cloned()).unwrap();
        assert_eq!(config.grocy_api_key(), "from-file");
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| {
            (key == "GROCY_API_KEY_FILE").then(|| "/nonexistent/grocy.key".to_string())
        });
        assert!(result.is_err());
    }
}
