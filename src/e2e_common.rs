//! Test support: a device-side packet builder and a scripted control API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::control::{ControlApi, ControlError, SessionInfo};
use crate::crypto::stretch::{stretch_key, StretchError, StretchLimits};
use crate::crypto::{seal_payload, NotificationKey};
use crate::events::DecryptedPayload;
use crate::packet::{Packet, V1Packet, V2Packet, NONCE_LEN, SALT_LEN};

/// 32 ASCII bytes, usable verbatim as a v2 key.
pub const TEST_SESSION_KEY: &str = "0123456789abcdef0123456789ABCDEF";

/// Builds and sends notification datagrams the way a device does.
#[derive(Debug)]
pub struct DeviceSimulator {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DeviceSimulator {
    pub async fn new(target: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await?;
        Ok(Self { socket, target })
    }

    pub async fn send(&self, packet: &Packet) -> std::io::Result<()> {
        self.send_raw(&packet.to_bytes()).await
    }

    pub async fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(bytes, self.target).await.map(|_| ())
    }

    /// v1 packet with fresh random salt and nonce.
    pub fn v1_packet(
        password: &str,
        payload: &DecryptedPayload,
        opslimit: u32,
        memlimit: u32,
    ) -> Result<Packet, StretchError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        Self::v1_packet_with(password, payload, opslimit, memlimit, salt, nonce)
    }

    pub fn v1_packet_with(
        password: &str,
        payload: &DecryptedPayload,
        opslimit: u32,
        memlimit: u32,
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
    ) -> Result<Packet, StretchError> {
        let key = stretch_key(password, &salt, opslimit, memlimit, &StretchLimits::default())?;
        Ok(Packet::V1(V1Packet {
            opslimit,
            memlimit,
            salt,
            nonce,
            ciphertext: seal_payload(&key, &nonce, &payload.to_bytes()),
        }))
    }

    pub fn v2_packet(key: &NotificationKey, payload: &DecryptedPayload) -> Packet {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Packet::V2(V2Packet {
            nonce,
            ciphertext: seal_payload(key, &nonce, &payload.to_bytes()),
        })
    }
}

/// Control API stand-in that counts session calls.
#[derive(Debug, Default)]
pub struct StaticControlApi {
    key: Option<String>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
}

impl StaticControlApi {
    pub fn new(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// Every session call fails with a return-code error.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Session calls wait until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlApi for StaticControlApi {
    async fn initialize_session(&self) -> Result<SessionInfo, ControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.key {
            Some(key) => Ok(SessionInfo {
                session_id: "test-session".into(),
                notification_encryption_key: key.clone(),
            }),
            None => Err(ControlError::ReturnCode {
                endpoint: "getsession.cgi".into(),
                code: "0".into(),
            }),
        }
    }
}
