//! Argon2i key stretching for v1 notifications.
//!
//! Mirrors libsodium's `crypto_pwhash` with Argon2i v1.3: `opslimit` is the
//! pass count, `memlimit` is in bytes, parallelism is fixed at 1.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;
use thiserror::Error;

use super::{NotificationKey, KEY_LEN};
use crate::packet::SALT_LEN;

/// Number of password characters fed into the stretch.
pub const PASSWORD_PREFIX_CHARS: usize = 5;
/// libsodium refuses fewer Argon2i passes than this.
pub const OPSLIMIT_MIN: u32 = 3;

/// Upper bounds on the cost parameters a single datagram may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StretchLimits {
    pub max_opslimit: u32,
    /// Bytes.
    pub max_memlimit: u32,
    /// Derivations allowed to run at once; further v1 packets are dropped.
    pub max_concurrent_stretches: usize,
}

impl Default for StretchLimits {
    fn default() -> Self {
        Self {
            max_opslimit: 64,
            max_memlimit: 256 * 1024 * 1024,
            max_concurrent_stretches: 2,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StretchError {
    #[error("opslimit {0} is below the minimum of 3")]
    OpsLimitTooLow(u32),
    #[error("opslimit {requested} exceeds the configured limit {limit}")]
    OpsLimitTooHigh { requested: u32, limit: u32 },
    #[error("memlimit {requested} exceeds the configured limit {limit}")]
    MemLimitTooHigh { requested: u32, limit: u32 },
    #[error("argon2: {0}")]
    Argon2(String),
}

/// Returns the leading characters of the password used as stretch input.
pub fn password_prefix(password: &str) -> &str {
    match password.char_indices().nth(PASSWORD_PREFIX_CHARS) {
        Some((idx, _)) => &password[..idx],
        None => password,
    }
}

/// Derives the v1 notification key. CPU and memory heavy; call off the
/// async executor.
pub fn stretch_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    opslimit: u32,
    memlimit: u32,
    limits: &StretchLimits,
) -> Result<NotificationKey, StretchError> {
    if opslimit < OPSLIMIT_MIN {
        return Err(StretchError::OpsLimitTooLow(opslimit));
    }
    if opslimit > limits.max_opslimit {
        return Err(StretchError::OpsLimitTooHigh {
            requested: opslimit,
            limit: limits.max_opslimit,
        });
    }
    if memlimit > limits.max_memlimit {
        return Err(StretchError::MemLimitTooHigh {
            requested: memlimit,
            limit: limits.max_memlimit,
        });
    }

    let params = Params::new(memlimit / 1024, opslimit, 1, Some(KEY_LEN))
        .map_err(|e| StretchError::Argon2(e.to_string()))?;
    let mut out = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2i, Version::V0x13, params)
        .hash_password_into(password_prefix(password).as_bytes(), salt, &mut out)
        .map_err(|e| StretchError::Argon2(e.to_string()))?;
    Ok(NotificationKey::new(out))
}
