//! UDP notification listener.
//!
//! One receive loop per socket parses datagrams and applies burst
//! suppression inline, then hands each admitted packet to its own task for
//! key resolution, decryption and dispatch. v1 key stretching therefore never
//! blocks datagram intake.

pub mod burst;
pub mod state;

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, ListenerConfig};
use crate::control::ControlApi;
use crate::crypto::open_payload;
use crate::events::{DecryptedPayload, EventDispatcher, MotionEvent, NotificationEvent, RingEvent};
use crate::keys::{KeyError, KeyProvider};
use crate::packet::{NotificationCodec, Packet, PacketError, PacketVersion};

use burst::BurstFilter;
use state::{ListenerState, ListenerStateError};

/// Errors returned while constructing or driving a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    State(#[from] ListenerStateError),
}

/// Failures reported to error hooks. Never delivered to event listeners.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no key for {version:?} packet from {peer}: {source}")]
    Key {
        peer: SocketAddr,
        version: PacketVersion,
        #[source]
        source: KeyError,
    },
    #[error("socket receive failed: {0}")]
    Receive(#[from] std::io::Error),
}

pub type ErrorListener = Arc<dyn Fn(&NotificationError) + Send + Sync>;

struct Shared {
    state: Mutex<ListenerState>,
    device_id: String,
    keys: KeyProvider,
    dispatcher: EventDispatcher,
    error_hooks: RwLock<Vec<ErrorListener>>,
    burst: Mutex<Option<BurstFilter>>,
}

impl Shared {
    fn is_bound(&self) -> bool {
        self.state.lock().is_bound()
    }

    fn admit(&self) -> bool {
        match self.burst.lock().as_mut() {
            Some(filter) => filter.admit(Instant::now()),
            None => true,
        }
    }

    fn report(&self, err: NotificationError) {
        let hooks = self.error_hooks.read().clone();
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(&err))).is_err() {
                warn!("error hook panicked");
            }
        }
    }

    async fn process(self: Arc<Self>, packet: Packet, peer: SocketAddr) {
        let version = packet.version();
        let key = match self.keys.key_for(&packet).await {
            Ok(key) => key,
            Err(source) => {
                warn!(%peer, ?version, error = %source, "dropping packet: key unavailable");
                if self.is_bound() {
                    self.report(NotificationError::Key {
                        peer,
                        version,
                        source,
                    });
                }
                return;
            }
        };

        let plaintext = match open_payload(&key, packet.nonce(), packet.ciphertext()) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                debug!(%peer, error = %err, "dropping packet: decrypt failed");
                return;
            }
        };

        if !self.is_bound() {
            debug!(%peer, "listener closed; discarding decrypted packet");
            return;
        }

        let payload = DecryptedPayload::from_bytes(&plaintext);
        match self.dispatcher.dispatch(&payload, &self.device_id) {
            Ok(NotificationEvent::Motion(_)) => debug!(%peer, "motion event dispatched"),
            Ok(NotificationEvent::Ring(ring)) => {
                debug!(%peer, event = %ring.event, "ring event dispatched")
            }
            Err(mismatch) => debug!(%peer, %mismatch, "dropping packet: identity mismatch"),
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, mut frames: UdpFramed<NotificationCodec>) {
    while let Some(item) = frames.next().await {
        if !shared.is_bound() {
            break;
        }
        let (parsed, peer) = match item {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "notification socket receive failed");
                shared.report(NotificationError::Receive(err));
                continue;
            }
        };
        let packet = match parsed {
            Ok(packet) => packet,
            Err(PacketError::NotApplicable) => {
                trace!(%peer, "ignoring foreign datagram");
                continue;
            }
            Err(err) => {
                debug!(%peer, error = %err, "dropping malformed packet");
                continue;
            }
        };
        if !shared.admit() {
            debug!(%peer, "suppressing burst packet");
            continue;
        }
        tokio::spawn(Arc::clone(&shared).process(packet, peer));
    }
    debug!("notification receive loop finished");
}

/// A bound UDP socket that turns device notifications into typed events.
///
/// # Guarantees
/// * Construction binds immediately; bind failures are returned, not deferred.
/// * After [`close`](Self::close) returns, packets that have not yet passed
///   the post-decrypt `Bound` check are discarded, including those whose key
///   derivation was already in flight. A dispatch already past that check
///   may still complete; callbacks run without the state lock so they may
///   call `close` themselves.
/// * Listener and hook panics are contained per callback.
pub struct NotificationListener {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationListener {
    /// Binds the configured port and starts receiving.
    ///
    /// `control` supplies the v2 session key; without it v2 packets are
    /// dropped with [`KeyError::NoControlApi`].
    pub async fn bind(
        config: ListenerConfig,
        control: Option<Arc<dyn ControlApi>>,
    ) -> Result<Self, ListenerError> {
        config.validate()?;
        let addr = config.socket_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let state = ListenerState::Unbound.transition(ListenerState::Bound {
            local_addr,
            since: Instant::now(),
        })?;
        let burst = config
            .burst_suppression
            .then(|| BurstFilter::new(config.burst_window()));
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            device_id: config.device_id_prefix(),
            keys: KeyProvider::new(config.password.clone(), config.stretch_limits, control),
            dispatcher: EventDispatcher::new(),
            error_hooks: RwLock::new(Vec::new()),
            burst: Mutex::new(burst),
        });

        let frames = UdpFramed::new(socket, NotificationCodec::new());
        let recv_task = tokio::spawn(receive_loop(Arc::clone(&shared), frames));
        info!(%local_addr, burst_suppression = config.burst_suppression, "notification listener bound");

        Ok(Self {
            shared,
            local_addr,
            recv_task: Mutex::new(Some(recv_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.shared.state.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.shared.state.lock(), ListenerState::Closed)
    }

    pub fn on_ring<F>(&self, listener: F)
    where
        F: Fn(&RingEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_ring(listener);
    }

    pub fn on_motion<F>(&self, listener: F)
    where
        F: Fn(&MotionEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_motion(listener);
    }

    /// Registers a hook for key and socket failures.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&NotificationError) + Send + Sync + 'static,
    {
        self.shared.error_hooks.write().push(Arc::new(hook));
    }

    /// Fetches the v2 session key now instead of on the first v2 packet.
    pub async fn prefetch_session_key(&self) -> Result<(), KeyError> {
        self.shared.keys.prefetch_session_key().await
    }

    /// Stops the receive loop. Repeated calls are no-ops.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ListenerState::Closed) {
                return;
            }
            match state.transition(ListenerState::Closed) {
                Ok(next) => *state = next,
                Err(err) => {
                    warn!(error = %err, "listener close rejected");
                    return;
                }
            }
        }
        if let Some(handle) = self.recv_task.lock().take() {
            handle.abort();
        }
        info!(local_addr = %self.local_addr, "notification listener closed");
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NotificationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationListener")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("device_id", &self.shared.device_id)
            .finish_non_exhaustive()
    }
}
