//! Control API used to manage the device and obtain the v2 notification key.
//!
//! The device answers every call with a JSON envelope keyed by `BHA` whose
//! `RETURNCODE` is `"1"` on success.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::DeviceConfig;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint} response could not be decoded: {detail}")]
    Decode { endpoint: String, detail: String },
    #[error("{endpoint} returned code {code}")]
    ReturnCode { endpoint: String, code: String },
}

/// Result of the session-initialization call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "SESSIONID")]
    pub session_id: String,
    /// Used byte-for-byte as the v2 notification key.
    #[serde(rename = "NOTIFICATION_ENCRYPTION_KEY")]
    pub notification_encryption_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "FIRMWARE")]
    pub firmware: String,
    #[serde(rename = "BUILD_NUMBER")]
    pub build_number: String,
    #[serde(rename = "WIFI_MAC_ADDR", default)]
    pub wifi_mac_addr: Option<String>,
    #[serde(rename = "PRIMARY_MAC_ADDR", default)]
    pub primary_mac_addr: Option<String>,
    #[serde(rename = "RELAYS", default)]
    pub relays: Vec<String>,
    #[serde(rename = "DEVICE-TYPE", default)]
    pub device_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BhaEnvelope<T> {
    #[serde(rename = "BHA")]
    bha: BhaBody<T>,
}

#[derive(Debug, Deserialize)]
struct BhaBody<T> {
    #[serde(rename = "RETURNCODE")]
    return_code: String,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Deserialize)]
struct InfoBody {
    #[serde(rename = "VERSION")]
    version: Vec<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
struct Empty {}

/// The slice of the control API the notification core depends on.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Opens a session; the response carries the notification key.
    async fn initialize_session(&self) -> Result<SessionInfo, ControlError>;
}

/// Control API client speaking HTTP(S) with basic auth.
#[derive(Debug, Clone)]
pub struct HttpControlClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpControlClient {
    pub fn new(config: &DeviceConfig) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ControlError> {
        let url = format!("{}/bha-api/{}", self.base_url, endpoint);
        debug!(%url, "control api call");
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        parse_envelope(endpoint, &bytes)
    }

    /// Invalidates a session obtained from [`ControlApi::initialize_session`].
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), ControlError> {
        self.call::<Empty>("getsession.cgi", &[("invalidate", session_id)])
            .await
            .map(|_| ())
    }

    pub async fn info(&self) -> Result<DeviceInfo, ControlError> {
        let body: InfoBody = self.call("info.cgi", &[]).await?;
        body.version
            .into_iter()
            .next()
            .ok_or_else(|| ControlError::Decode {
                endpoint: "info.cgi".into(),
                detail: "empty VERSION list".into(),
            })
    }

    /// Energizes a door relay, e.g. `"1"` or a peripheral relay id.
    pub async fn open_door(&self, relay: &str) -> Result<(), ControlError> {
        self.call::<Empty>("open-door.cgi", &[("r", relay)])
            .await
            .map(|_| ())
    }

    pub async fn light_on(&self) -> Result<(), ControlError> {
        self.call::<Empty>("light-on.cgi", &[]).await.map(|_| ())
    }

    pub async fn restart(&self) -> Result<(), ControlError> {
        self.call::<Empty>("restart.cgi", &[]).await.map(|_| ())
    }
}

#[async_trait]
impl ControlApi for HttpControlClient {
    async fn initialize_session(&self) -> Result<SessionInfo, ControlError> {
        self.call("getsession.cgi", &[]).await
    }
}

fn parse_envelope<T: DeserializeOwned>(endpoint: &str, bytes: &[u8]) -> Result<T, ControlError> {
    let envelope: BhaEnvelope<T> =
        serde_json::from_slice(bytes).map_err(|e| ControlError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
    if envelope.bha.return_code != "1" {
        return Err(ControlError::ReturnCode {
            endpoint: endpoint.to_string(),
            code: envelope.bha.return_code,
        });
    }
    Ok(envelope.bha.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_envelope_parses() {
        let body = br#"{"BHA":{"RETURNCODE":"1","SESSIONID":"abc","NOTIFICATION_ENCRYPTION_KEY":"0123456789abcdef0123456789abcdef"}}"#;
        let info: SessionInfo = parse_envelope("getsession.cgi", body).unwrap();
        assert_eq!(info.session_id, "abc");
        assert_eq!(info.notification_encryption_key.len(), 32);
    }

    #[test]
    fn info_envelope_parses() {
        let body = br#"{"BHA":{"RETURNCODE":"1","VERSION":[{"FIRMWARE":"000125","BUILD_NUMBER":"15870439","WIFI_MAC_ADDR":"1234ABCD","RELAYS":["1","2"],"DEVICE-TYPE":"D2101V"}]}}"#;
        let info: InfoBody = parse_envelope("info.cgi", body).unwrap();
        assert_eq!(info.version[0].firmware, "000125");
        assert_eq!(info.version[0].relays, vec!["1", "2"]);
        assert_eq!(info.version[0].primary_mac_addr, None);
    }

    #[test]
    fn failing_return_code_is_an_error() {
        let body = br#"{"BHA":{"RETURNCODE":"0"}}"#;
        let err = parse_envelope::<Empty>("open-door.cgi", body).unwrap_err();
        assert!(matches!(err, ControlError::ReturnCode { ref code, .. } if code == "0"));
    }

    #[test]
    fn missing_key_field_is_a_decode_error() {
        let body = br#"{"BHA":{"RETURNCODE":"1","SESSIONID":"abc"}}"#;
        let err = parse_envelope::<SessionInfo>("getsession.cgi", body).unwrap_err();
        assert!(matches!(err, ControlError::Decode { .. }));
    }
}
