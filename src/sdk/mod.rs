//! High-level client combining the control API and notification listeners.
//!
//! Most integrations need both halves: the HTTP control API for door relays
//! and device info, and a listener whose v2 key comes from that same API.
pub mod client;

pub use client::{ClientError, IntercomClient};
