use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;

/// Lifecycle of a notification listener socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound {
        local_addr: SocketAddr,
        since: Instant,
    },
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerStateError {
    #[error("invalid listener transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl ListenerState {
    pub fn name(&self) -> &'static str {
        match self {
            ListenerState::Unbound => "unbound",
            ListenerState::Bound { .. } => "bound",
            ListenerState::Closed => "closed",
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, ListenerState::Bound { .. })
    }

    pub fn transition(&self, next: ListenerState) -> Result<ListenerState, ListenerStateError> {
        match (self, &next) {
            (ListenerState::Unbound, ListenerState::Bound { .. })
            | (ListenerState::Unbound, ListenerState::Closed)
            | (ListenerState::Bound { .. }, ListenerState::Closed) => Ok(next),
            _ => Err(ListenerStateError::InvalidTransition {
                from: self.name(),
                to: next.name(),
            }),
        }
    }
}
