use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Router address, either a bare IP ("192.168.1.1") or a base URL
    pub address: String,
    /// Web UI admin password
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub retry_delay_secs: u64,
    pub control_timeout_secs: u64,
    pub status_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub settle_secs: u64,
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub topic: String,
    /// Dotted paths removed from the status document before publishing
    pub redact: Vec<String>,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_prefix")]
    pub client_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_prefix() -> String {
    "router-watchdog".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    /// Defaults when the file does not exist; any other read or parse
    /// failure is an error
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            eprintln!("Warning: config file {:?} not found", path);
            eprintln!("Using default configuration");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

impl ReconnectConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        Duration::from_secs(self.backoff_secs.saturating_mul(2u64.pow(exp)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                address: "192.168.1.1".to_string(),
                password: String::new(),
            },
            polling: PollingConfig::default(),
            reconnect: ReconnectConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            retry_delay_secs: 2,
            control_timeout_secs: 3,
            status_timeout_secs: 10,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            settle_secs: 5,
            backoff_secs: 2,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic: "pitu/router/telemetry".to_string(),
            redact: Vec::new(),
            mqtt: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
