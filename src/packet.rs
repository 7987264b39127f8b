//! Notification datagram layout and parsing.
//!
//! Every datagram starts with the 3-byte marker `DE AD BE` and a version byte.
//! Version 1 carries its own Argon2i cost parameters and salt so the receiver
//! can stretch the key per packet; version 2 relies on a session key fetched
//! once over the control API. All integers are big-endian.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Fixed marker opening every notification datagram.
pub const NOTIFICATION_MARKER: [u8; 3] = [0xDE, 0xAD, 0xBE];
pub const HEADER_LEN: usize = 4;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 8;
/// Encrypted 18-byte payload followed by the 16-byte Poly1305 tag.
pub const CIPHERTEXT_LEN: usize = 34;
pub const V1_PACKET_LEN: usize = HEADER_LEN + 4 + 4 + SALT_LEN + NONCE_LEN + CIPHERTEXT_LEN;
pub const V2_PACKET_LEN: usize = HEADER_LEN + NONCE_LEN + CIPHERTEXT_LEN;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketVersion {
    /// Per-packet Argon2i key stretching.
    V1 = 0x01,
    /// Session key obtained from the control API.
    V2 = 0x02,
}

impl PacketVersion {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketVersion::V1),
            0x02 => Some(PacketVersion::V2),
            _ => None,
        }
    }

    /// Total datagram length required for this version.
    pub fn required_len(self) -> usize {
        match self {
            PacketVersion::V1 => V1_PACKET_LEN,
            PacketVersion::V2 => V2_PACKET_LEN,
        }
    }
}

/// Reasons a datagram is not turned into a [`Packet`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Too short for a header, wrong marker, or unknown version.
    #[error("datagram is not a notification packet")]
    NotApplicable,
    /// Known version but the datagram is shorter than its fixed layout.
    #[error("malformed v{version} packet: {len} bytes, {required} required")]
    Malformed {
        version: u8,
        len: usize,
        required: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1Packet {
    pub opslimit: u32,
    pub memlimit: u32,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: [u8; CIPHERTEXT_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Packet {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: [u8; CIPHERTEXT_LEN],
}

/// A parsed notification datagram, tagged by protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    V1(V1Packet),
    V2(V2Packet),
}

impl Packet {
    pub fn version(&self) -> PacketVersion {
        match self {
            Packet::V1(_) => PacketVersion::V1,
            Packet::V2(_) => PacketVersion::V2,
        }
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        match self {
            Packet::V1(p) => &p.nonce,
            Packet::V2(p) => &p.nonce,
        }
    }

    pub fn ciphertext(&self) -> &[u8; CIPHERTEXT_LEN] {
        match self {
            Packet::V1(p) => &p.ciphertext,
            Packet::V2(p) => &p.ciphertext,
        }
    }

    /// Serializes the packet back into its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let version = self.version();
        let mut out = Vec::with_capacity(version.required_len());
        out.extend_from_slice(&NOTIFICATION_MARKER);
        out.push(version as u8);
        match self {
            Packet::V1(p) => {
                out.extend_from_slice(&p.opslimit.to_be_bytes());
                out.extend_from_slice(&p.memlimit.to_be_bytes());
                out.extend_from_slice(&p.salt);
                out.extend_from_slice(&p.nonce);
                out.extend_from_slice(&p.ciphertext);
            }
            Packet::V2(p) => {
                out.extend_from_slice(&p.nonce);
                out.extend_from_slice(&p.ciphertext);
            }
        }
        out
    }
}

/// Parses a datagram using the standard marker.
pub fn parse_packet(datagram: &[u8]) -> Result<Packet, PacketError> {
    parse_with_marker(datagram, &NOTIFICATION_MARKER)
}

/// Parses a datagram against an explicit marker.
///
/// Bytes past the fixed layout of the declared version are ignored.
pub fn parse_with_marker(datagram: &[u8], marker: &[u8; 3]) -> Result<Packet, PacketError> {
    if datagram.len() < HEADER_LEN || &datagram[..3] != marker {
        return Err(PacketError::NotApplicable);
    }
    let version = PacketVersion::from_byte(datagram[3]).ok_or(PacketError::NotApplicable)?;
    let required = version.required_len();
    if datagram.len() < required {
        return Err(PacketError::Malformed {
            version: version as u8,
            len: datagram.len(),
            required,
        });
    }

    let mut fields = Fields::new(&datagram[HEADER_LEN..required]);
    let packet = match version {
        PacketVersion::V1 => Packet::V1(V1Packet {
            opslimit: fields.u32_be(),
            memlimit: fields.u32_be(),
            salt: fields.array(),
            nonce: fields.array(),
            ciphertext: fields.array(),
        }),
        PacketVersion::V2 => Packet::V2(V2Packet {
            nonce: fields.array(),
            ciphertext: fields.array(),
        }),
    };
    Ok(packet)
}

/// Sequential reader over a region whose length was already checked.
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.array())
    }
}

/// Datagram codec for `UdpFramed`.
///
/// Each received datagram yields exactly one item; parse failures are handed
/// to the caller as values so the socket stream never terminates on bad input.
#[derive(Debug, Clone)]
pub struct NotificationCodec {
    marker: [u8; 3],
}

impl NotificationCodec {
    pub fn new() -> Self {
        Self::with_marker(NOTIFICATION_MARKER)
    }

    pub fn with_marker(marker: [u8; 3]) -> Self {
        Self { marker }
    }
}

impl Default for NotificationCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NotificationCodec {
    type Item = Result<Packet, PacketError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        Ok(Some(parse_with_marker(&datagram, &self.marker)))
    }
}
