//! Typed notification events and listener fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::crypto::PAYLOAD_LEN;

pub const DEVICE_ID_LEN: usize = 6;
pub const EVENT_TAG_LEN: usize = 8;
/// Trimmed tag that marks a motion event. Anything else is a ring.
pub const MOTION_TAG: &str = "motion";

/// Decrypted 18-byte notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    pub device_id_prefix: [u8; DEVICE_ID_LEN],
    /// Space padded.
    pub event_tag: [u8; EVENT_TAG_LEN],
    pub epoch_seconds: i32,
}

impl DecryptedPayload {
    pub fn from_bytes(bytes: &[u8; PAYLOAD_LEN]) -> Self {
        let mut device_id_prefix = [0u8; DEVICE_ID_LEN];
        device_id_prefix.copy_from_slice(&bytes[..DEVICE_ID_LEN]);
        let mut event_tag = [0u8; EVENT_TAG_LEN];
        event_tag.copy_from_slice(&bytes[DEVICE_ID_LEN..DEVICE_ID_LEN + EVENT_TAG_LEN]);
        let mut epoch = [0u8; 4];
        epoch.copy_from_slice(&bytes[DEVICE_ID_LEN + EVENT_TAG_LEN..]);
        Self {
            device_id_prefix,
            event_tag,
            epoch_seconds: i32::from_be_bytes(epoch),
        }
    }

    /// Builds a payload the way a device does: id truncated to six bytes,
    /// tag space padded to eight.
    pub fn new(device_id: &str, event: &str, epoch_seconds: i32) -> Self {
        let mut device_id_prefix = [b' '; DEVICE_ID_LEN];
        let id = device_id.as_bytes();
        let n = id.len().min(DEVICE_ID_LEN);
        device_id_prefix[..n].copy_from_slice(&id[..n]);

        let mut event_tag = [b' '; EVENT_TAG_LEN];
        let tag = event.as_bytes();
        let n = tag.len().min(EVENT_TAG_LEN);
        event_tag[..n].copy_from_slice(&tag[..n]);

        Self {
            device_id_prefix,
            event_tag,
            epoch_seconds,
        }
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[..DEVICE_ID_LEN].copy_from_slice(&self.device_id_prefix);
        out[DEVICE_ID_LEN..DEVICE_ID_LEN + EVENT_TAG_LEN].copy_from_slice(&self.event_tag);
        out[DEVICE_ID_LEN + EVENT_TAG_LEN..].copy_from_slice(&self.epoch_seconds.to_be_bytes());
        out
    }

    pub fn device_id(&self) -> String {
        String::from_utf8_lossy(&self.device_id_prefix).into_owned()
    }

    pub fn event_name(&self) -> String {
        String::from_utf8_lossy(&self.event_tag).trim().to_string()
    }

    /// POSIX seconds, UTC.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.epoch_seconds), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionEvent {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEvent {
    pub device_id: String,
    /// Trimmed event tag, e.g. `"doorbell"` or a keypad id.
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Motion(MotionEvent),
    Ring(RingEvent),
}

impl NotificationEvent {
    pub fn classify(payload: &DecryptedPayload) -> Self {
        let event = payload.event_name();
        let device_id = payload.device_id();
        let timestamp = payload.timestamp();
        if event == MOTION_TAG {
            NotificationEvent::Motion(MotionEvent {
                device_id,
                timestamp,
            })
        } else {
            NotificationEvent::Ring(RingEvent {
                device_id,
                event,
                timestamp,
            })
        }
    }
}

/// Payload did not come from the configured device, or was not decrypted
/// with the right key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("device id {found:?} does not match {expected:?}")]
pub struct IdentityMismatch {
    pub found: String,
    pub expected: String,
}

/// The only authenticity check applied to notifications.
pub fn verify_identity(
    payload: &DecryptedPayload,
    expected_prefix: &str,
) -> Result<(), IdentityMismatch> {
    if payload.device_id_prefix.as_slice() == expected_prefix.as_bytes() {
        Ok(())
    } else {
        Err(IdentityMismatch {
            found: payload.device_id(),
            expected: expected_prefix.to_string(),
        })
    }
}

pub type RingListener = Arc<dyn Fn(&RingEvent) + Send + Sync>;
pub type MotionListener = Arc<dyn Fn(&MotionEvent) + Send + Sync>;

/// Ordered listener registries for ring and motion events.
#[derive(Default)]
pub struct EventDispatcher {
    ring: RwLock<Vec<RingListener>>,
    motion: RwLock<Vec<MotionListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ring<F>(&self, listener: F)
    where
        F: Fn(&RingEvent) + Send + Sync + 'static,
    {
        self.ring.write().push(Arc::new(listener));
    }

    pub fn on_motion<F>(&self, listener: F)
    where
        F: Fn(&MotionEvent) + Send + Sync + 'static,
    {
        self.motion.write().push(Arc::new(listener));
    }

    pub fn listener_counts(&self) -> (usize, usize) {
        (self.ring.read().len(), self.motion.read().len())
    }

    /// Authenticates and classifies a payload, then notifies listeners.
    pub fn dispatch(
        &self,
        payload: &DecryptedPayload,
        expected_prefix: &str,
    ) -> Result<NotificationEvent, IdentityMismatch> {
        verify_identity(payload, expected_prefix)?;
        let event = NotificationEvent::classify(payload);
        self.emit(&event);
        Ok(event)
    }

    /// Invokes every listener of the event's kind in registration order.
    /// Returns how many returned without panicking.
    pub fn emit(&self, event: &NotificationEvent) -> usize {
        match event {
            NotificationEvent::Motion(motion) => {
                let listeners = self.motion.read().clone();
                invoke_all(&listeners, motion, "motion")
            }
            NotificationEvent::Ring(ring) => {
                let listeners = self.ring.read().clone();
                invoke_all(&listeners, ring, "ring")
            }
        }
    }
}

// Registries are snapshotted so listeners may register further listeners.
fn invoke_all<E>(listeners: &[Arc<dyn Fn(&E) + Send + Sync>], event: &E, kind: &str) -> usize {
    let mut delivered = 0;
    for (index, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(()) => delivered += 1,
            Err(_) => warn!(kind, index, "listener panicked"),
        }
    }
    delivered
}
