use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, DeviceConfig};
use crate::control::{ControlApi, ControlError, DeviceInfo, HttpControlClient};
use crate::keys::KeyError;
use crate::listener::{ListenerError, NotificationListener};

/// Errors emitted by the high-level client.
#[derive(Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Device configuration failed validation.
    Config(ConfigError),
    /// Control API call failed.
    Control(ControlError),
    /// Listener could not be bound.
    Listener(ListenerError),
    /// The session key could not be fetched ahead of listening.
    Key(KeyError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Config(err) => write!(f, "config error: {}", err),
            ClientError::Control(err) => write!(f, "control error: {}", err),
            ClientError::Listener(err) => write!(f, "listener error: {}", err),
            ClientError::Key(err) => write!(f, "key error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Config(err) => Some(err),
            ClientError::Control(err) => Some(err),
            ClientError::Listener(err) => Some(err),
            ClientError::Key(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err)
    }
}

impl From<ControlError> for ClientError {
    fn from(err: ControlError) -> Self {
        ClientError::Control(err)
    }
}

impl From<ListenerError> for ClientError {
    fn from(err: ListenerError) -> Self {
        ClientError::Listener(err)
    }
}

impl From<KeyError> for ClientError {
    fn from(err: KeyError) -> Self {
        ClientError::Key(err)
    }
}

/// Client for one intercom device.
///
/// # Guarantees
/// * Listeners created by [`listen`](Self::listen) share this client's
///   control API, so v2 packets resolve their key through it.
/// * Each listener owns its own session-key cache.
#[derive(Debug, Clone)]
pub struct IntercomClient {
    config: DeviceConfig,
    control: Arc<HttpControlClient>,
}

impl IntercomClient {
    /// # Errors
    /// Returns `ClientError::Config` for invalid settings and
    /// `ClientError::Control` if the HTTP client cannot be built.
    pub fn new(config: DeviceConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let control = Arc::new(HttpControlClient::new(&config)?);
        Ok(Self { config, control })
    }

    pub fn control(&self) -> &HttpControlClient {
        &self.control
    }

    pub async fn info(&self) -> Result<DeviceInfo, ClientError> {
        Ok(self.control.info().await?)
    }

    pub async fn open_door(&self, relay: &str) -> Result<(), ClientError> {
        Ok(self.control.open_door(relay).await?)
    }

    /// Binds a notification listener on `port` with this device's credentials.
    ///
    /// # Errors
    /// Returns `ClientError::Listener` if the port cannot be bound.
    pub async fn listen(
        &self,
        port: u16,
        burst_suppression: bool,
    ) -> Result<NotificationListener, ClientError> {
        let config = self
            .config
            .listener()
            .with_port(port)
            .with_burst_suppression(burst_suppression);
        let control: Arc<dyn ControlApi> = self.control.clone();
        Ok(NotificationListener::bind(config, Some(control)).await?)
    }

    /// Like [`listen`](Self::listen) but fetches the v2 session key first so
    /// a broken control channel is reported here instead of per packet.
    pub async fn listen_prefetched(
        &self,
        port: u16,
        burst_suppression: bool,
    ) -> Result<NotificationListener, ClientError> {
        let listener = self.listen(port, burst_suppression).await?;
        listener.prefetch_session_key().await?;
        Ok(listener)
    }
}
