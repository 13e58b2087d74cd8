//! ==============================================================================
//! config.rs - Gateway Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `gateway.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     THINGSPEAK_* environment overrides so keys can stay out of the file.
//!
//! structure:
//!     - ServerConfig: Where the dashboard listens.
//!     - ThingSpeakConfig: Channel, API keys, per-call timeouts, history window.
//!     - DisplayConfig: Timezone used to render feed timestamps.
//!     - LoggingConfig: Default tracing filter.
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coerce::DisplayZone;

/// env var that points at an explicit config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// the remote service never returns more than this many entries per read
const MAX_RESULTS: u32 = 8000;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub thingspeak: ThingSpeakConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThingSpeakConfig {
    pub base_url: String,
    pub channel_id: String,
    pub read_api_key: String,
    pub write_api_key: String,
    pub latest_timeout_secs: u64,
    pub history_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// entries fetched for /api/history
    pub history_results: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DisplayConfig {
    pub timezone: DisplayZone,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for ThingSpeakConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.thingspeak.com".to_string(),
            channel_id: String::new(),
            read_api_key: String::new(),
            write_api_key: String::new(),
            latest_timeout_secs: 6,
            history_timeout_secs: 8,
            command_timeout_secs: 5,
            history_results: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl ThingSpeakConfig {
    pub fn latest_timeout(&self) -> Duration {
        Duration::from_secs(self.latest_timeout_secs)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: GatewayConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("gateway.toml"),
            PathBuf::from("..").join("config").join("gateway.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Full startup path: explicit file or search, env overrides, validation
    pub fn resolve() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                let config = Self::load(&path)?;
                println!("[CONFIG] Loaded from {}", Path::new(&path).display());
                config
            }
            None => Self::load_or_default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply THINGSPEAK_* overrides; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let ts = &mut self.thingspeak;
        let targets: [(&str, &mut String); 4] = [
            ("THINGSPEAK_BASE_URL", &mut ts.base_url),
            ("THINGSPEAK_CHANNEL_ID", &mut ts.channel_id),
            ("THINGSPEAK_READ_API_KEY", &mut ts.read_api_key),
            ("THINGSPEAK_WRITE_API_KEY", &mut ts.write_api_key),
        ];

        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let ts = &self.thingspeak;
        if ts.base_url.trim().is_empty() {
            bail!("thingspeak.base_url must not be empty");
        }
        if ts.channel_id.trim().is_empty() {
            bail!("thingspeak.channel_id is not set (config file or THINGSPEAK_CHANNEL_ID)");
        }
        if ts.history_results == 0 || ts.history_results > MAX_RESULTS {
            bail!("thingspeak.history_results must be within 1..={}", MAX_RESULTS);
        }
        if ts.latest_timeout_secs == 0 || ts.history_timeout_secs == 0 || ts.command_timeout_secs == 0 {
            bail!("thingspeak timeouts must be at least 1 second");
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let ts = &self.thingspeak;
        println!("┌─────────────────────────────────────────┐");
        println!("│          GATEWAY CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Bind: {}", self.server.bind);
        println!("│ Remote: {}", ts.base_url);
        println!("│ Channel: {}", ts.channel_id);
        println!("│ Read Key: {}", mask_key(&ts.read_api_key));
        println!("│ Write Key: {}", mask_key(&ts.write_api_key));
        println!("│ History Window: {} entries", ts.history_results);
        println!("│ Timezone: {}", self.display.timezone);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

/// keep the last 4 characters so operators can tell keys apart
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "(unset)".to_string(),
        n if n <= 4 => "*".repeat(n),
        n => format!("{}{}", "*".repeat(n - 4), chars[n - 4..].iter().collect::<String>()),
    }
}
