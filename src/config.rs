use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

pub use crate::crypto::stretch::StretchLimits;

/// Port most devices send notifications to.
pub const PRIMARY_PORT: u16 = 6524;
/// Secondary port some firmware also sends to. Same protocol.
pub const SECONDARY_PORT: u16 = 35344;
/// Number of username characters a packet's device id must match.
pub const DEVICE_ID_PREFIX_CHARS: usize = 6;

pub const DEFAULT_BURST_WINDOW_MS: u64 = 1000;

/// Error produced when configuration fails to load or validate.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("username must have at least 6 characters")]
    UsernameTooShort,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("host must not be empty")]
    EmptyHost,
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

fn check_credentials(username: &str, password: &str) -> Result<(), ConfigError> {
    if username.chars().count() < DEVICE_ID_PREFIX_CHARS {
        return Err(ConfigError::UsernameTooShort);
    }
    if password.is_empty() {
        return Err(ConfigError::EmptyPassword);
    }
    Ok(())
}

/// Settings for a notification listener socket.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Collapse notifications arriving within `burst_window_ms` of the last
    /// accepted one.
    #[serde(default = "default_true")]
    pub burst_suppression: bool,
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    #[serde(default)]
    pub stretch_limits: StretchLimits,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    PRIMARY_PORT
}

fn default_true() -> bool {
    true
}

fn default_burst_window_ms() -> u64 {
    DEFAULT_BURST_WINDOW_MS
}

impl ListenerConfig {
    /// Listener on the primary port with burst suppression enabled.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: PRIMARY_PORT,
            username: username.into(),
            password: password.into(),
            burst_suppression: true,
            burst_window_ms: DEFAULT_BURST_WINDOW_MS,
            stretch_limits: StretchLimits::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_burst_suppression(mut self, enabled: bool) -> Self {
        self.burst_suppression = enabled;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_credentials(&self.username, &self.password)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    /// The device id every authentic packet carries.
    pub fn device_id_prefix(&self) -> String {
        self.username.chars().take(DEVICE_ID_PREFIX_CHARS).collect()
    }
}

/// Settings for the HTTP control API.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Host name or address, optionally with `:port`.
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub https: bool,
    /// Devices ship self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl DeviceConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            https: false,
            accept_invalid_certs: false,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        check_credentials(&self.username, &self.password)
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Listener settings sharing this device's credentials.
    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig::new(self.username.clone(), self.password.clone())
    }
}

/// Top-level file layout used by the `intercom-listen` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default = "default_true")]
    pub burst_suppression: bool,
}

impl FileConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.device.validate()?;
        Ok(config)
    }

    /// Configured ports, or both conventional ports when none are listed.
    pub fn listen_ports(&self) -> Vec<u16> {
        if self.ports.is_empty() {
            vec![PRIMARY_PORT, SECONDARY_PORT]
        } else {
            self.ports.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_defaults_apply() {
        let config = ListenerConfig::from_toml_str(
            r#"
            username = "ghxyzu0001"
            password = "hunter22"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, PRIMARY_PORT);
        assert!(config.burst_suppression);
        assert_eq!(config.burst_window(), Duration::from_millis(1000));
        assert_eq!(config.stretch_limits, StretchLimits::default());
        assert_eq!(config.device_id_prefix(), "ghxyzu");
        assert_eq!(
            config.socket_addr(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), PRIMARY_PORT)
        );
    }

    #[test]
    fn listener_overrides_parse() {
        let config = ListenerConfig::from_toml_str(
            r#"
            bind_addr = "127.0.0.1"
            port = 35344
            username = "ghxyzu0001"
            password = "hunter22"
            burst_suppression = false
            [stretch_limits]
            max_opslimit = 10
            max_concurrent_stretches = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.port, SECONDARY_PORT);
        assert!(!config.burst_suppression);
        assert_eq!(config.stretch_limits.max_opslimit, 10);
        assert_eq!(config.stretch_limits.max_concurrent_stretches, 1);
        assert_eq!(
            config.stretch_limits.max_memlimit,
            StretchLimits::default().max_memlimit
        );
    }

    #[test]
    fn short_username_is_rejected() {
        let err = ListenerConfig::new("abc", "pw").validate().unwrap_err();
        assert!(matches!(err, ConfigError::UsernameTooShort));
        let err = ListenerConfig::new("abcdef", "").validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPassword));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = ListenerConfig::from_toml_str("username = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn file_config_falls_back_to_both_ports() {
        let config = FileConfig::from_toml_str(
            r#"
            [device]
            host = "192.168.1.20"
            username = "ghxyzu0001"
            password = "hunter22"
            https = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_ports(), vec![PRIMARY_PORT, SECONDARY_PORT]);
        assert_eq!(config.device.base_url(), "https://192.168.1.20");
        assert_eq!(config.device.listener().device_id_prefix(), "ghxyzu");
    }
}
