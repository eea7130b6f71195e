//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `tvremote` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result};
use crate::protocol::REMOTE_CONTROL_PATH;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device addressing
    #[serde(default)]
    pub device: DeviceConfig,

    /// Per-operation deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Binary transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Token persistence
    #[serde(default)]
    pub tokens: TokenConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RemoteError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("TVREMOTE_HOST") {
            config.device.host = host;
        }
        if let Ok(port) = std::env::var("TVREMOTE_PORT") {
            if let Ok(port) = port.parse() {
                config.device.port = port;
            }
        }
        if let Ok(name) = std::env::var("TVREMOTE_NAME") {
            config.device.name = name;
        }
        if let Ok(path) = std::env::var("TVREMOTE_TOKEN_FILE") {
            config.tokens.path = Some(PathBuf::from(path));
        }
        if let Ok(val) = std::env::var("TVREMOTE_PAIRING_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.timeouts.pairing_secs = val;
            }
        }

        config
    }

    /// Merge with another config. Each field of `other` that differs from
    /// its default takes precedence.
    pub fn merge(self, other: Self) -> Self {
        let device = DeviceConfig::default();
        let timeouts = TimeoutConfig::default();
        let transfer = TransferConfig::default();

        Self {
            device: DeviceConfig {
                host: prefer(self.device.host, other.device.host, device.host),
                port: prefer(self.device.port, other.device.port, device.port),
                name: prefer(self.device.name, other.device.name, device.name),
                device_id: other.device.device_id.or(self.device.device_id),
                channel_path: prefer(
                    self.device.channel_path,
                    other.device.channel_path,
                    device.channel_path,
                ),
                subprotocols: prefer(
                    self.device.subprotocols,
                    other.device.subprotocols,
                    device.subprotocols,
                ),
            },
            timeouts: TimeoutConfig {
                connect_secs: prefer(self.timeouts.connect_secs, other.timeouts.connect_secs, timeouts.connect_secs),
                command_ms: prefer(self.timeouts.command_ms, other.timeouts.command_ms, timeouts.command_ms),
                retry_backoff_ms: prefer(
                    self.timeouts.retry_backoff_ms,
                    other.timeouts.retry_backoff_ms,
                    timeouts.retry_backoff_ms,
                ),
                request_secs: prefer(self.timeouts.request_secs, other.timeouts.request_secs, timeouts.request_secs),
                pairing_secs: prefer(self.timeouts.pairing_secs, other.timeouts.pairing_secs, timeouts.pairing_secs),
                handshake_secs: prefer(
                    self.timeouts.handshake_secs,
                    other.timeouts.handshake_secs,
                    timeouts.handshake_secs,
                ),
                transfer_secs: prefer(
                    self.timeouts.transfer_secs,
                    other.timeouts.transfer_secs,
                    timeouts.transfer_secs,
                ),
            },
            transfer: TransferConfig {
                d2d_enabled: prefer(self.transfer.d2d_enabled, other.transfer.d2d_enabled, transfer.d2d_enabled),
                max_upload_bytes: prefer(
                    self.transfer.max_upload_bytes,
                    other.transfer.max_upload_bytes,
                    transfer.max_upload_bytes,
                ),
                rest_upload_path: prefer(
                    self.transfer.rest_upload_path,
                    other.transfer.rest_upload_path,
                    transfer.rest_upload_path,
                ),
                rest_port: prefer(self.transfer.rest_port, other.transfer.rest_port, transfer.rest_port),
            },
            tokens: TokenConfig {
                path: other.tokens.path.or(self.tokens.path),
            },
        }
    }
}

/// `over` when it was set away from `default`, otherwise `base`
fn prefer<T: PartialEq>(base: T, over: T, default: T) -> T {
    if over != default {
        over
    } else {
        base
    }
}

/// Device addressing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host name or IP address
    pub host: String,

    /// Command channel port (8001 plain, 8002 TLS)
    pub port: u16,

    /// Client name shown on the device's pairing prompt
    pub name: String,

    /// Identity the stored token belongs to (defaults to the host)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Channel path on the device
    pub channel_path: String,

    /// WebSocket subprotocols to request
    #[serde(default)]
    pub subprotocols: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8002,
            name: "tvremote".to_string(),
            device_id: None,
            channel_path: REMOTE_CONTROL_PATH.to_string(),
            subprotocols: Vec::new(),
        }
    }
}

impl DeviceConfig {
    /// Identity used to key the token store
    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or(&self.host)
    }
}

/// Per-operation deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Command channel connect timeout in seconds
    pub connect_secs: u64,

    /// Per-attempt command acknowledgement timeout in milliseconds
    pub command_ms: u64,

    /// Pause before the single command retry in milliseconds
    pub retry_backoff_ms: u64,

    /// Application request reply timeout in seconds
    pub request_secs: u64,

    /// Handshake deadline when no token is held (human approval expected)
    pub pairing_secs: u64,

    /// Handshake deadline when a token is already held
    pub handshake_secs: u64,

    /// D2D transfer deadline in seconds (connect, stream, completion)
    pub transfer_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            command_ms: 5_000,
            retry_backoff_ms: 500,
            request_secs: 10,
            pairing_secs: 90,
            handshake_secs: 90,
            transfer_secs: 60,
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Per-attempt command timeout
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    /// Retry backoff
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Application request timeout
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Handshake deadline, chosen by whether a token is already held
    pub fn handshake(&self, has_token: bool) -> Duration {
        if has_token {
            Duration::from_secs(self.handshake_secs)
        } else {
            Duration::from_secs(self.pairing_secs)
        }
    }

    /// Transfer deadline
    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_secs)
    }
}

/// Binary transfer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Use the D2D socket protocol for uploads (false = REST only)
    pub d2d_enabled: bool,

    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,

    /// REST multipart upload path used as fallback
    pub rest_upload_path: String,

    /// REST port (plain HTTP API)
    pub rest_port: u16,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            d2d_enabled: true,
            max_upload_bytes: 20 * 1024 * 1024, // 20 MB
            rest_upload_path: "/api/v2/art/upload".to_string(),
            rest_port: 8001,
        }
    }
}

/// Token persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token file path (default: `<config dir>/tvremote/tokens.toml`)
    pub path: Option<PathBuf>,
}

impl TokenConfig {
    /// Resolved token file path
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::config_dir().map(|p| p.join("tvremote").join("tokens.toml")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.port, 8002);
        assert_eq!(config.timeouts.command(), Duration::from_secs(5));
        assert_eq!(config.timeouts.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.timeouts.handshake(false), Duration::from_secs(90));
        assert!(config.transfer.d2d_enabled);
    }

    #[test]
    fn test_device_id_defaults_to_host() {
        let mut device = DeviceConfig {
            host: "192.168.1.20".to_string(),
            ..Default::default()
        };
        assert_eq!(device.device_id(), "192.168.1.20");

        device.device_id = Some("frame-living-room".to_string());
        assert_eq!(device.device_id(), "frame-living-room");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [device]
            host = "10.0.0.5"
            port = 8001
            name = "Kitchen Remote"
            channel_path = "/api/v2/channels/com.samsung.art-app"

            [timeouts]
            connect_secs = 3
            command_ms = 2000
            retry_backoff_ms = 250
            request_secs = 4
            pairing_secs = 120
            handshake_secs = 15
            transfer_secs = 30
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.host, "10.0.0.5");
        assert_eq!(config.device.port, 8001);
        assert!(config.device.subprotocols.is_empty());
        assert_eq!(config.timeouts.handshake(true), Duration::from_secs(15));
        assert_eq!(config.timeouts.handshake(false), Duration::from_secs(120));
        assert_eq!(config.transfer.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn test_merge_prefers_non_default_values() {
        let base = Config {
            device: DeviceConfig {
                host: "10.0.0.5".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let cli = Config {
            device: DeviceConfig {
                port: 8001,
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = base.merge(cli);
        assert_eq!(merged.device.host, "10.0.0.5");
        assert_eq!(merged.device.port, 8001);
    }

    #[test]
    fn test_merge_keeps_file_fields_not_overridden() {
        let file: Config = toml::from_str(
            r#"
            [device]
            host = "10.0.0.5"
            channel_path = "/api/v2/channels/com.samsung.art-app"
            subprotocols = ["a"]

            [timeouts]
            request_secs = 30
            handshake_secs = 15
        "#,
        )
        .unwrap();
        let mut env = Config::default();
        env.timeouts.pairing_secs = 120;

        let merged = file.merge(env);
        assert_eq!(merged.device.host, "10.0.0.5");
        assert_eq!(merged.device.channel_path, "/api/v2/channels/com.samsung.art-app");
        assert_eq!(merged.device.subprotocols, vec!["a".to_string()]);
        assert_eq!(merged.timeouts.request_secs, 30);
        assert_eq!(merged.timeouts.handshake_secs, 15);
        assert_eq!(merged.timeouts.pairing_secs, 120);
    }
}
