//! Decryption key resolution per packet version.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info};

use crate::control::{ControlApi, ControlError};
use crate::crypto::stretch::{stretch_key, StretchError, StretchLimits};
use crate::crypto::{CryptoError, NotificationKey};
use crate::packet::{Packet, V1Packet};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key derivation failed: {0}")]
    Derivation(#[from] StretchError),
    #[error("session key fetch failed: {0}")]
    Fetch(#[from] ControlError),
    #[error("session key rejected: {0}")]
    InvalidKey(#[from] CryptoError),
    #[error("{0} key derivations already running")]
    Busy(usize),
    #[error("no control api configured for v2 notifications")]
    NoControlApi,
    #[error("derivation task failed: {0}")]
    Task(String),
}

/// Fetch-once holder for the v2 session key.
///
/// Concurrent misses share a single in-flight control API call. A failed
/// fetch leaves the cache empty so the next packet retries.
pub struct SessionKeyCache {
    control: Option<Arc<dyn ControlApi>>,
    key: OnceCell<NotificationKey>,
}

impl SessionKeyCache {
    pub fn new(control: Option<Arc<dyn ControlApi>>) -> Self {
        Self {
            control,
            key: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<NotificationKey, KeyError> {
        let control = self.control.as_ref().ok_or(KeyError::NoControlApi)?;
        let key = self
            .key
            .get_or_try_init(|| async {
                let session = control.initialize_session().await?;
                let key =
                    NotificationKey::from_slice(session.notification_encryption_key.as_bytes())?;
                info!("notification session key cached");
                Ok::<_, KeyError>(key)
            })
            .await?;
        Ok(key.clone())
    }

    pub fn is_cached(&self) -> bool {
        self.key.initialized()
    }
}

impl fmt::Debug for SessionKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyCache")
            .field("has_control", &self.control.is_some())
            .field("cached", &self.is_cached())
            .finish()
    }
}

/// Supplies the key for each packet: stretched from the password for v1,
/// the cached session key for v2.
#[derive(Clone)]
pub struct KeyProvider {
    password: Arc<str>,
    limits: StretchLimits,
    stretch_permits: Arc<Semaphore>,
    session: Arc<SessionKeyCache>,
}

impl KeyProvider {
    pub fn new(
        password: impl Into<String>,
        limits: StretchLimits,
        control: Option<Arc<dyn ControlApi>>,
    ) -> Self {
        Self {
            password: Arc::from(password.into()),
            limits,
            stretch_permits: Arc::new(Semaphore::new(limits.max_concurrent_stretches)),
            session: Arc::new(SessionKeyCache::new(control)),
        }
    }

    pub async fn key_for(&self, packet: &Packet) -> Result<NotificationKey, KeyError> {
        match packet {
            Packet::V1(v1) => self.stretch(v1).await,
            Packet::V2(_) => self.session.get().await,
        }
    }

    /// Fetches the v2 session key ahead of the first packet so fetch
    /// failures surface to the caller.
    pub async fn prefetch_session_key(&self) -> Result<(), KeyError> {
        self.session.get().await.map(|_| ())
    }

    pub fn session_cache(&self) -> &SessionKeyCache {
        &self.session
    }

    /// Runs the derivation on the blocking pool. Refuses instead of queueing
    /// when `max_concurrent_stretches` derivations are already running.
    async fn stretch(&self, packet: &V1Packet) -> Result<NotificationKey, KeyError> {
        let permit = Arc::clone(&self.stretch_permits)
            .try_acquire_owned()
            .map_err(|_| KeyError::Busy(self.limits.max_concurrent_stretches))?;
        let password = Arc::clone(&self.password);
        let limits = self.limits;
        let salt = packet.salt;
        let (opslimit, memlimit) = (packet.opslimit, packet.memlimit);
        debug!(opslimit, memlimit, "stretching v1 key");
        let key = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            stretch_key(&password, &salt, opslimit, memlimit, &limits)
        })
        .await
        .map_err(|e| KeyError::Task(e.to_string()))??;
        Ok(key)
    }
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("limits", &self.limits)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::e2e_common::{StaticControlApi, TEST_SESSION_KEY};
    use crate::packet::{V2Packet, CIPHERTEXT_LEN, NONCE_LEN, SALT_LEN};

    fn v2_packet() -> Packet {
        Packet::V2(V2Packet {
            nonce: [0; NONCE_LEN],
            ciphertext: [0; CIPHERTEXT_LEN],
        })
    }

    #[tokio::test]
    async fn v2_key_is_fetched_once() {
        let control = Arc::new(StaticControlApi::new(TEST_SESSION_KEY));
        let provider = KeyProvider::new("secret", StretchLimits::default(), Some(control.clone()));

        let first = provider.key_for(&v2_packet()).await.unwrap();
        let second = provider.key_for(&v2_packet()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), TEST_SESSION_KEY.as_bytes());
        assert_eq!(control.calls(), 1);
        assert!(provider.session_cache().is_cached());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let control = Arc::new(
            StaticControlApi::new(TEST_SESSION_KEY).with_delay(Duration::from_millis(50)),
        );
        let provider = KeyProvider::new("secret", StretchLimits::default(), Some(control.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let provider = provider.clone();
            tasks.push(tokio::spawn(async move {
                provider.key_for(&v2_packet()).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(control.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_distinguishable_and_retried() {
        let control = Arc::new(StaticControlApi::failing());
        let provider = KeyProvider::new("secret", StretchLimits::default(), Some(control.clone()));

        let err = provider.key_for(&v2_packet()).await.unwrap_err();
        assert!(matches!(err, KeyError::Fetch(_)));
        assert!(provider.key_for(&v2_packet()).await.is_err());
        assert_eq!(control.calls(), 2);
        assert!(!provider.session_cache().is_cached());
    }

    #[tokio::test]
    async fn wrong_length_session_key_is_rejected() {
        let control = Arc::new(StaticControlApi::new("too-short"));
        let provider = KeyProvider::new("secret", StretchLimits::default(), Some(control));
        let err = provider.prefetch_session_key().await.unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn v2_without_control_api_fails() {
        let provider = KeyProvider::new("secret", StretchLimits::default(), None);
        let err = provider.key_for(&v2_packet()).await.unwrap_err();
        assert!(matches!(err, KeyError::NoControlApi));
    }

    #[tokio::test]
    async fn v1_key_matches_direct_stretch() {
        let provider = KeyProvider::new("hunter22", StretchLimits::default(), None);
        let packet = Packet::V1(V1Packet {
            opslimit: 4,
            memlimit: 0x2000,
            salt: [7; SALT_LEN],
            nonce: [0; NONCE_LEN],
            ciphertext: [0; CIPHERTEXT_LEN],
        });
        let key = provider.key_for(&packet).await.unwrap();
        let direct =
            stretch_key("hunter22", &[7; SALT_LEN], 4, 0x2000, &StretchLimits::default()).unwrap();
        assert_eq!(key, direct);
    }

    fn v1_packet() -> Packet {
        Packet::V1(V1Packet {
            opslimit: 4,
            memlimit: 0x2000,
            salt: [7; SALT_LEN],
            nonce: [0; NONCE_LEN],
            ciphertext: [0; CIPHERTEXT_LEN],
        })
    }

    #[tokio::test]
    async fn stretches_beyond_the_concurrency_cap_are_refused() {
        let limits = StretchLimits {
            max_concurrent_stretches: 2,
            ..StretchLimits::default()
        };
        let provider = KeyProvider::new("hunter22", limits, None);
        let running = Arc::clone(&provider.stretch_permits)
            .try_acquire_many_owned(2)
            .unwrap();

        let err = provider.key_for(&v1_packet()).await.unwrap_err();
        assert!(matches!(err, KeyError::Busy(2)));

        drop(running);
        assert!(provider.key_for(&v1_packet()).await.is_ok());
        assert_eq!(provider.stretch_permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn v2_keys_ignore_the_stretch_cap() {
        let control = Arc::new(StaticControlApi::new(TEST_SESSION_KEY));
        let limits = StretchLimits {
            max_concurrent_stretches: 0,
            ..StretchLimits::default()
        };
        let provider = KeyProvider::new("hunter22", limits, Some(control));
        assert!(matches!(
            provider.key_for(&v1_packet()).await,
            Err(KeyError::Busy(0))
        ));
        assert!(provider.key_for(&v2_packet()).await.is_ok());
    }

    #[tokio::test]
    async fn v1_cost_violation_is_a_derivation_error() {
        let provider = KeyProvider::new("hunter22", StretchLimits::default(), None);
        let packet = Packet::V1(V1Packet {
            opslimit: 1,
            memlimit: 0x2000,
            salt: [7; SALT_LEN],
            nonce: [0; NONCE_LEN],
            ciphertext: [0; CIPHERTEXT_LEN],
        });
        let err = provider.key_for(&packet).await.unwrap_err();
        assert!(matches!(err, KeyError::Derivation(StretchError::OpsLimitTooLow(1))));
    }
}
