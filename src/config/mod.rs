//! # Configuration Management
//!
//! Centralized TOML configuration for the gateway: connection endpoint and
//! reconnect backoff, health-monitor silence threshold, dedup cache sizing,
//! per-partition retention, external service clients, and logging.
//!
//! All tuning lives here; the core components consume plain values and never
//! special-case deployments. Invalid values are corrected to safe minimums at
//! load time with a warning rather than failing startup.
//!
//! ```toml
//! [connection]
//! host = "192.168.1.50"
//! port = 4403
//! reconnect_base_delay_ms = 1000
//! reconnect_max_delay_ms = 60000
//!
//! [health]
//! silence_threshold_secs = 300
//! check_interval_secs = 30
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub name: String,
    /// Our own node id on the mesh; packets originating here are echoes and
    /// are dropped before classification. Decimal or 0xHEX.
    #[serde(default)]
    pub node_id: String,
}

impl GatewayConfig {
    /// Parse `node_id` as decimal or 0xHEX. Empty or malformed yields None.
    pub fn node_id_numeric(&self) -> Option<u32> {
        let s = self.node_id.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            s.parse::<u32>().ok()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Radio device address. The firmware accepts exactly one live connection
    /// to this endpoint; the lifecycle manager is the only component allowed
    /// to open it.
    pub host: String,
    pub port: u16,
    /// Require the radio to be reachable at startup. If false (default) the
    /// gateway starts disconnected and the reconnect path brings the link up.
    #[serde(default)]
    pub require_device_at_startup: bool,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Random jitter added to each backoff sleep (0 disables).
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}
fn default_reconnect_jitter_ms() -> u64 {
    250
}

impl ConnectionConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// Silence-watchdog tuning. "Silence" is not a fixed absolute: sparse meshes
/// legitimately go minutes between packets, so the threshold is pure
/// deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_silence_threshold_secs")]
    pub silence_threshold_secs: u64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_silence_threshold_secs() -> u64 {
    300
}
fn default_check_interval_secs() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            silence_threshold_secs: default_silence_threshold_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl HealthConfig {
    /// Correct zero/absurd values to safe minimums instead of failing startup.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        if out.check_interval_secs == 0 {
            log::warn!("health.check_interval_secs=0 is invalid, using 1");
            out.check_interval_secs = 1;
        }
        if out.silence_threshold_secs < out.check_interval_secs {
            log::warn!(
                "health.silence_threshold_secs {} below check interval {}, raising to match",
                out.silence_threshold_secs,
                out.check_interval_secs
            );
            out.silence_threshold_secs = out.check_interval_secs;
        }
        out
    }
}

/// Duplicate-suppression cache sizing. The horizon is a policy knob: true
/// radio retransmissions arrive within seconds, so entries older than the
/// horizon are allowed to re-admit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_dedup_horizon_secs")]
    pub horizon_secs: u64,
}

fn default_dedup_capacity() -> usize {
    4096
}
fn default_dedup_horizon_secs() -> u64 {
    300
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_dedup_capacity(),
            horizon_secs: default_dedup_horizon_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Retention horizon for the radio-native partition, in hours (0 = keep forever).
    #[serde(default = "default_retention_hours")]
    pub radio_retention_hours: u64,
    /// Retention horizon for the companion partition, in hours (0 = keep forever).
    #[serde(default = "default_retention_hours")]
    pub companion_retention_hours: u64,
    /// How often the eviction pass runs.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_retention_hours() -> u64 {
    24 * 30
}
fn default_eviction_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key
    pub api_key: String,
    /// Default location for weather queries (city name, zipcode, or city ID)
    pub default_location: String,
    /// Location type: "city", "zipcode", or "city_id"
    pub location_type: String,
    /// Country code for zipcode lookups (e.g., "US", "GB")
    pub country_code: Option<String>,
    /// Cache TTL in minutes
    pub cache_ttl_minutes: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
    /// Enable/disable weather polling
    pub enabled: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            default_location: "Los Angeles".to_string(),
            location_type: "city".to_string(),
            country_code: Some("US".to_string()),
            cache_ttl_minutes: 10,
            timeout_seconds: 5,
            enabled: false, // Disabled by default until API key is provided
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway: GatewayConfig {
                name: "meshgate Station".to_string(),
                node_id: "".to_string(),
            },
            connection: ConnectionConfig {
                host: "127.0.0.1".to_string(),
                port: 4403,
                require_device_at_startup: false,
                reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
                reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
                reconnect_jitter_ms: default_reconnect_jitter_ms(),
            },
            health: HealthConfig::default(),
            dedup: DedupConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                radio_retention_hours: default_retention_hours(),
                companion_retention_hours: default_retention_hours(),
                eviction_interval_secs: default_eviction_interval_secs(),
            },
            weather: WeatherConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshgate.log".to_string()),
            },
        }
    }
}
