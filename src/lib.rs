//! Client library for networked door intercoms.
//!
//! Decodes the encrypted UDP event notifications a device broadcasts (ring
//! and motion) and talks to its HTTP control API. Notifications carry no
//! verified MAC: a packet is accepted when its decrypted device id matches
//! the configured username, which is how the device firmware expects
//! receivers to filter traffic on shared networks.

pub mod config;
pub mod control;
pub mod crypto;
pub mod e2e_common;
pub mod events;
pub mod keys;
pub mod listener;
pub mod packet;
pub mod sdk;

pub use config::{DeviceConfig, ListenerConfig, PRIMARY_PORT, SECONDARY_PORT};
pub use control::{ControlApi, ControlError, DeviceInfo, HttpControlClient, SessionInfo};
pub use crypto::NotificationKey;
pub use events::{EventDispatcher, MotionEvent, NotificationEvent, RingEvent};
pub use keys::{KeyError, KeyProvider};
pub use listener::{ListenerError, NotificationError, NotificationListener};
pub use packet::{Packet, PacketError, PacketVersion};
pub use sdk::IntercomClient;
