//! Pairing configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::framing::{DEFAULT_MAX_PACKET_SIZE, MAX_PACKET_SIZE_LIMIT, MIN_PACKET_SIZE};
use crate::storage::{DEFAULT_MAX_CLIENTS, MAX_NAME_LEN};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`PairingConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Configuration for a pairing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingConfig {
    /// PIN width in digits (default: 6)
    pub num_pin_digits: usize,

    /// Timer for one pairing attempt (default: 60 seconds)
    pub pairing_timeout: Duration,

    /// Attempts per connection before giving up (default: 3)
    pub max_pairing_attempts: u32,

    /// Wrong challenge answers before a reset (default: 5)
    pub max_match_attempts: u32,

    /// Protocol abnormalities before a reset (default: 5)
    pub max_abnormalities: u32,

    /// BLE packet size including the header byte (default: 20)
    pub max_packet_size: usize,

    /// First-time clients of an owned robot must cloud-authorize (default: true)
    pub require_cloud_auth: bool,

    /// Robot name, also the access point SSID (default: hostname)
    pub robot_name: String,

    /// Firmware build reported in status
    pub build_id: String,

    /// Serial number reported in status
    pub serial_number: String,

    /// Session file (None = in-memory only)
    pub store_path: Option<PathBuf>,

    /// Legacy image migrated into `store_path` at startup
    pub legacy_store_path: Option<PathBuf>,

    /// File holding a fixed PIN for test robots
    pub pin_override_path: Option<PathBuf>,

    /// Access point password width in digits (default: 8)
    pub wifi_ap_password_len: usize,

    /// Shortest WiFi connect timeout honored (default: 1 second)
    pub wifi_connect_min_timeout: Duration,

    /// WiFi state poll interval during connect (default: 1 second)
    pub wifi_poll_interval: Duration,

    /// OTA progress report interval (default: 1 second)
    pub ota_progress_interval: Duration,

    /// Log file transfer chunk size (default: 256)
    pub file_chunk_size: usize,

    /// Stored client record cap (default: 255)
    pub max_clients: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            num_pin_digits: 6,
            pairing_timeout: Duration::from_secs(60),
            max_pairing_attempts: 3,
            max_match_attempts: 5,
            max_abnormalities: 5,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            require_cloud_auth: true,
            robot_name: default_robot_name(),
            build_id: String::new(),
            serial_number: String::new(),
            store_path: None,
            legacy_store_path: None,
            pin_override_path: None,
            wifi_ap_password_len: 8,
            wifi_connect_min_timeout: Duration::from_secs(1),
            wifi_poll_interval: Duration::from_secs(1),
            ota_progress_interval: Duration::from_secs(1),
            file_chunk_size: 256,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

fn default_robot_name() -> String {
    hostname::get().map_or_else(
        |_| "pairlink".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

/// On-disk shape; every field is optional and layered over the defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    num_pin_digits: Option<usize>,
    pairing_timeout_secs: Option<u64>,
    max_pairing_attempts: Option<u32>,
    max_match_attempts: Option<u32>,
    max_abnormalities: Option<u32>,
    max_packet_size: Option<usize>,
    require_cloud_auth: Option<bool>,
    robot_name: Option<String>,
    build_id: Option<String>,
    serial_number: Option<String>,
    store_path: Option<PathBuf>,
    legacy_store_path: Option<PathBuf>,
    pin_override_path: Option<PathBuf>,
    wifi_ap_password_len: Option<usize>,
    wifi_connect_min_timeout_ms: Option<u64>,
    wifi_poll_interval_ms: Option<u64>,
    ota_progress_interval_ms: Option<u64>,
    file_chunk_size: Option<usize>,
    max_clients: Option<usize>,
}

impl ConfigFile {
    fn apply(self, config: &mut PairingConfig) {
        macro_rules! layer {
            ($($field:ident),+ $(,)?) => {
                $( if let Some(value) = self.$field { config.$field = value; } )+
            };
        }
        layer!(
            num_pin_digits,
            max_pairing_attempts,
            max_match_attempts,
            max_abnormalities,
            max_packet_size,
            require_cloud_auth,
            robot_name,
            build_id,
            serial_number,
            wifi_ap_password_len,
            file_chunk_size,
            max_clients,
        );

        if let Some(secs) = self.pairing_timeout_secs {
            config.pairing_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.wifi_connect_min_timeout_ms {
            config.wifi_connect_min_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.wifi_poll_interval_ms {
            config.wifi_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.ota_progress_interval_ms {
            config.ota_progress_interval = Duration::from_millis(ms);
        }
        if self.store_path.is_some() {
            config.store_path = self.store_path;
        }
        if self.legacy_store_path.is_some() {
            config.legacy_store_path = self.legacy_store_path;
        }
        if self.pin_override_path.is_some() {
            config.pin_override_path = self.pin_override_path;
        }
    }
}

impl PairingConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> PairingConfigBuilder {
        PairingConfigBuilder::default()
    }

    /// Parse JSON and layer it over the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for malformed JSON, unknown keys or values that
    /// fail [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();
        file.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file and layer it over the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), "Loaded pairing config");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if !(1..=9).contains(&self.num_pin_digits) {
            return Err(invalid("num_pin_digits", "must be in 1..=9"));
        }
        if !(1..=9).contains(&self.wifi_ap_password_len) {
            return Err(invalid("wifi_ap_password_len", "must be in 1..=9"));
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE_LIMIT).contains(&self.max_packet_size) {
            return Err(invalid(
                "max_packet_size",
                format!("must be in {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE_LIMIT}"),
            ));
        }
        if self.pairing_timeout.is_zero() {
            return Err(invalid("pairing_timeout", "must be non-zero"));
        }
        if self.wifi_poll_interval.is_zero() {
            return Err(invalid("wifi_poll_interval", "must be non-zero"));
        }
        if self.ota_progress_interval.is_zero() {
            return Err(invalid("ota_progress_interval", "must be non-zero"));
        }
        if self.max_pairing_attempts == 0 {
            return Err(invalid("max_pairing_attempts", "must be at least 1"));
        }
        if self.max_match_attempts == 0 || self.max_abnormalities == 0 {
            return Err(invalid("max_match_attempts", "thresholds must be at least 1"));
        }
        if self.file_chunk_size == 0 || self.file_chunk_size > usize::from(u16::MAX) {
            return Err(invalid("file_chunk_size", "must be in 1..=65535"));
        }
        if self.max_clients == 0 || self.max_clients > usize::from(u16::MAX) {
            return Err(invalid("max_clients", "must be in 1..=65535"));
        }
        if self.robot_name.len() > MAX_NAME_LEN {
            return Err(invalid(
                "robot_name",
                format!("longer than {MAX_NAME_LEN} bytes"),
            ));
        }
        Ok(())
    }
}

/// Builder for `PairingConfig`
#[derive(Debug, Clone, Default)]
pub struct PairingConfigBuilder {
    config: PairingConfig,
}

impl PairingConfigBuilder {
    /// Set PIN width
    #[must_use]
    pub fn num_pin_digits(mut self, digits: usize) -> Self {
        self.config.num_pin_digits = digits;
        self
    }

    /// Set pairing attempt timeout
    #[must_use]
    pub fn pairing_timeout(mut self, timeout: Duration) -> Self {
        self.config.pairing_timeout = timeout;
        self
    }

    /// Set attempts per connection
    #[must_use]
    pub fn max_pairing_attempts(mut self, attempts: u32) -> Self {
        self.config.max_pairing_attempts = attempts;
        self
    }

    /// Set wrong-answer threshold
    #[must_use]
    pub fn max_match_attempts(mut self, attempts: u32) -> Self {
        self.config.max_match_attempts = attempts;
        self
    }

    /// Set abnormality threshold
    #[must_use]
    pub fn max_abnormalities(mut self, count: u32) -> Self {
        self.config.max_abnormalities = count;
        self
    }

    /// Set BLE packet size
    #[must_use]
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Require cloud authorization for first-time clients of an owned robot
    #[must_use]
    pub fn require_cloud_auth(mut self, require: bool) -> Self {
        self.config.require_cloud_auth = require;
        self
    }

    /// Set robot name
    #[must_use]
    pub fn robot_name(mut self, name: impl Into<String>) -> Self {
        self.config.robot_name = name.into();
        self
    }

    /// Set firmware build id
    #[must_use]
    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.config.build_id = build_id.into();
        self
    }

    /// Set serial number
    #[must_use]
    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.config.serial_number = serial.into();
        self
    }

    /// Persist sessions to `path`
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// Migrate sessions from a legacy image at `path`
    #[must_use]
    pub fn legacy_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.legacy_store_path = Some(path.into());
        self
    }

    /// Read a fixed PIN from `path`
    #[must_use]
    pub fn pin_override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pin_override_path = Some(path.into());
        self
    }

    /// Set access point password width
    #[must_use]
    pub fn wifi_ap_password_len(mut self, len: usize) -> Self {
        self.config.wifi_ap_password_len = len;
        self
    }

    /// Set shortest WiFi connect timeout
    #[must_use]
    pub fn wifi_connect_min_timeout(mut self, timeout: Duration) -> Self {
        self.config.wifi_connect_min_timeout = timeout;
        self
    }

    /// Set WiFi poll interval
    #[must_use]
    pub fn wifi_poll_interval(mut self, interval: Duration) -> Self {
        self.config.wifi_poll_interval = interval;
        self
    }

    /// Set OTA progress interval
    #[must_use]
    pub fn ota_progress_interval(mut self, interval: Duration) -> Self {
        self.config.ota_progress_interval = interval;
        self
    }

    /// Set log transfer chunk size
    #[must_use]
    pub fn file_chunk_size(mut self, size: usize) -> Self {
        self.config.file_chunk_size = size;
        self
    }

    /// Set client record cap
    #[must_use]
    pub fn max_clients(mut self, max: usize) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is out of range.
    pub fn build(self) -> Result<PairingConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PairingConfig::default();
        assert_eq!(config.num_pin_digits, 6);
        assert_eq!(config.pairing_timeout, Duration::from_secs(60));
        assert_eq!(config.max_pairing_attempts, 3);
        assert_eq!(config.max_packet_size, 20);
        assert!(config.require_cloud_auth);
        assert_eq!(config.file_chunk_size, 256);
        assert_eq!(config.max_clients, 255);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PairingConfig::builder()
            .robot_name("Vector-Q9Z1")
            .num_pin_digits(4)
            .require_cloud_auth(false)
            .build()
            .unwrap();
        assert_eq!(config.robot_name, "Vector-Q9Z1");
        assert_eq!(config.num_pin_digits, 4);
        assert!(!config.require_cloud_auth);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let err = PairingConfig::builder().max_packet_size(65).build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_packet_size",
                ..
            }
        ));
        assert!(PairingConfig::builder().num_pin_digits(0).build().is_err());
    }

    #[test]
    fn test_json_layers_over_defaults() {
        let config = PairingConfig::from_json_str(
            r#"{ "robot_name": "Vector-X", "pairing_timeout_secs": 30, "wifi_poll_interval_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.robot_name, "Vector-X");
        assert_eq!(config.pairing_timeout, Duration::from_secs(30));
        assert_eq!(config.wifi_poll_interval, Duration::from_millis(250));
        assert_eq!(config.num_pin_digits, 6);
    }

    #[test]
    fn test_json_unknown_key() {
        assert!(matches!(
            PairingConfig::from_json_str(r#"{ "pin_digits": 4 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_json_invalid_value() {
        assert!(matches!(
            PairingConfig::from_json_str(r#"{ "max_packet_size": 1 }"#),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.json");
        tokio::fs::write(&path, r#"{ "store_path": "/data/sessions.bin" }"#)
            .await
            .unwrap();

        let config = PairingConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/data/sessions.bin")));

        assert!(matches!(
            PairingConfig::from_json_file(dir.path().join("missing.json")).await,
            Err(ConfigError::Io(_))
        ));
    }
}
