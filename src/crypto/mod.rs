//! Notification payload cipher.
//!
//! Devices encrypt with the original 8-byte-nonce ChaCha20-Poly1305
//! construction: keystream block 0 keys Poly1305 and the payload is XORed
//! starting at block 1. Receivers only run the keystream over the 18-byte
//! payload and never check the trailing tag; authenticity is decided by
//! [`crate::events::verify_identity`].

pub mod stretch;

use std::fmt;

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::{ChaCha20Legacy, Key, LegacyNonce};
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use thiserror::Error;

use crate::packet::{CIPHERTEXT_LEN, NONCE_LEN};

pub const KEY_LEN: usize = 32;
pub const PAYLOAD_LEN: usize = 18;
pub const TAG_LEN: usize = 16;

const BLOCK_LEN: u64 = 64;

/// Symmetric key for notification payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct NotificationKey([u8; KEY_LEN]);

impl NotificationKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotificationKey(..)")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("ciphertext must be at least {expected} bytes, got {actual}")]
    ShortCiphertext { expected: usize, actual: usize },
}

fn cipher(key: &NotificationKey, nonce: &[u8; NONCE_LEN]) -> ChaCha20Legacy {
    ChaCha20Legacy::new(Key::from_slice(key.as_bytes()), LegacyNonce::from_slice(nonce))
}

/// Decrypts the payload region of a notification ciphertext.
///
/// The tag is not verified. A wrong key yields garbage, not an error.
pub fn open_payload(
    key: &NotificationKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<[u8; PAYLOAD_LEN], CryptoError> {
    if ciphertext.len() < PAYLOAD_LEN {
        return Err(CryptoError::ShortCiphertext {
            expected: PAYLOAD_LEN,
            actual: ciphertext.len(),
        });
    }
    let mut plaintext = [0u8; PAYLOAD_LEN];
    plaintext.copy_from_slice(&ciphertext[..PAYLOAD_LEN]);

    let mut stream = cipher(key, nonce);
    stream.seek(BLOCK_LEN);
    stream.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

/// Encrypts a payload the way the device firmware does, appending the tag.
pub fn seal_payload(
    key: &NotificationKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8; PAYLOAD_LEN],
) -> [u8; CIPHERTEXT_LEN] {
    let mut stream = cipher(key, nonce);
    let mut poly_key = [0u8; KEY_LEN];
    stream.apply_keystream(&mut poly_key);
    stream.seek(BLOCK_LEN);

    let mut sealed = [0u8; CIPHERTEXT_LEN];
    sealed[..PAYLOAD_LEN].copy_from_slice(plaintext);
    stream.apply_keystream(&mut sealed[..PAYLOAD_LEN]);

    // ad || le64(adlen) || c || le64(clen), no padding; there is no ad.
    let mut mac_input = Vec::with_capacity(8 + PAYLOAD_LEN + 8);
    mac_input.extend_from_slice(&0u64.to_le_bytes());
    mac_input.extend_from_slice(&sealed[..PAYLOAD_LEN]);
    mac_input.extend_from_slice(&(PAYLOAD_LEN as u64).to_le_bytes());
    let tag = Poly1305::new(poly1305::Key::from_slice(&poly_key)).compute_unpadded(&mac_input);
    sealed[PAYLOAD_LEN..].copy_from_slice(tag.as_slice());
    sealed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> NotificationKey {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        NotificationKey::new(bytes)
    }

    const NONCE: [u8; NONCE_LEN] = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];

    fn motion_plaintext() -> [u8; PAYLOAD_LEN] {
        let mut pt = [0u8; PAYLOAD_LEN];
        pt[..6].copy_from_slice(b"foobar");
        pt[6..14].copy_from_slice(b"motion  ");
        pt[14..].copy_from_slice(&1_609_459_200i32.to_be_bytes());
        pt
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn seal_matches_reference_vector() {
        let sealed = seal_payload(&sample_key(), &NONCE, &motion_plaintext());
        assert_eq!(
            hex(&sealed),
            "d980615458f575d8a2f1ca7aad6b687af012f908dc5245853bd549150cb4f906ee98"
        );
    }

    #[test]
    fn open_recovers_sealed_payload() {
        let sealed = seal_payload(&sample_key(), &NONCE, &motion_plaintext());
        let opened = open_payload(&sample_key(), &NONCE, &sealed).unwrap();
        assert_eq!(opened, motion_plaintext());
    }

    #[test]
    fn tag_bytes_do_not_affect_payload() {
        let mut sealed = seal_payload(&sample_key(), &NONCE, &motion_plaintext());
        sealed[PAYLOAD_LEN..].fill(0);
        let opened = open_payload(&sample_key(), &NONCE, &sealed).unwrap();
        assert_eq!(opened, motion_plaintext());
    }

    #[test]
    fn wrong_key_yields_garbage_not_error() {
        let sealed = seal_payload(&sample_key(), &NONCE, &motion_plaintext());
        let other = NotificationKey::new([0x55; KEY_LEN]);
        let opened = open_payload(&other, &NONCE, &sealed).unwrap();
        assert_ne!(opened, motion_plaintext());
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let err = open_payload(&sample_key(), &NONCE, &[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::ShortCiphertext {
                expected: PAYLOAD_LEN,
                actual: 10
            }
        );
    }

    #[test]
    fn key_from_slice_checks_length() {
        assert!(NotificationKey::from_slice(&[1u8; 31]).is_err());
        assert!(NotificationKey::from_slice(&[1u8; 32]).is_ok());
        assert_eq!(format!("{:?}", sample_key()), "NotificationKey(..)");
    }
}
