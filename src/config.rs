//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `panel.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: Where the board lives (host + websocket path).
//!     - PollingConfig: How often a status snapshot is requested.
//!     - ReconnectConfig: Fixed delay between a close and the next attempt.
//!     - ServerConfig: Bind address of the local dashboard.
//!     - LoggingConfig: Default log filter.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PanelConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// hostname or ip of the board (the board's soft-AP address by default)
    pub host: String,
    #[serde(default = "default_ws_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    pub delay_ms: u64,
    /// give up on a single attempt (tcp + handshake) after this long
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// log every applied snapshot at info level
    #[serde(default)]
    pub show_snapshots: bool,
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { host: "192.168.4.1".to_string(), path: default_ws_path() }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 50 }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { delay_ms: 2000, connect_timeout_ms: default_connect_timeout_ms() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_snapshots: false }
    }
}

impl DeviceConfig {
    /// `ws://<host><path>`, the path always starting with a slash
    pub fn gateway_url(&self) -> String {
        if self.path.starts_with('/') {
            format!("ws://{}{}", self.host, self.path)
        } else {
            format!("ws://{}/{}", self.host, self.path)
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

impl PanelConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: PanelConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("panel.toml"),
            std::path::PathBuf::from("..").join("config").join("panel.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          PANEL CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Board: {}", self.device.gateway_url());
        println!("│ Poll Interval: {}ms", self.polling.interval_ms);
        println!("│ Reconnect Delay: {}ms", self.reconnect.delay_ms);
        println!("│ Connect Timeout: {}ms", self.reconnect.connect_timeout_ms);
        println!("│ Dashboard: http://{}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_board_firmware() {
        let config = PanelConfig::default();
        assert_eq!(config.device.gateway_url(), "ws://192.168.4.1/ws");
        assert_eq!(config.polling.interval(), Duration::from_millis(50));
        assert_eq!(config.reconnect.delay(), Duration::from_millis(2000));
        assert_eq!(config.reconnect.connect_timeout(), Duration::from_millis(3000));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: PanelConfig = toml::from_str(
            r#"
[device]
host = "esp-io.local"

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.device.gateway_url(), "ws://esp-io.local/ws");
        assert_eq!(config.polling.interval_ms, 50);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.show_snapshots);
    }

    #[test]
    fn reconnect_section_without_timeout_uses_default() {
        let config: PanelConfig = toml::from_str("[reconnect]\ndelay_ms = 500\n").unwrap();
        assert_eq!(config.reconnect.delay(), Duration::from_millis(500));
        assert_eq!(config.reconnect.connect_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn path_without_slash_is_normalized() {
        let device = DeviceConfig { host: "10.0.0.7".into(), path: "ws".into() };
        assert_eq!(device.gateway_url(), "ws://10.0.0.7/ws");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PanelConfig::load("does/not/exist.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
