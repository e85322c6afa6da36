use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::endpoint::EndpointConfig;

/// Things the owner of a [`Peer`](crate::Peer) may want to show a user.
/// Everything here is logged as well; the queue exists for front-ends that
/// don't install a logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Listening {
        addr: SocketAddr,
    },
    ClientAccepted {
        addr: SocketAddr,
    },
    Connected {
        endpoint: EndpointConfig,
    },
    Disconnected {
        peer: Option<SocketAddr>,
        reason: String,
        graceful: bool,
    },
    ConnectFailed {
        endpoint: EndpointConfig,
        message: String,
    },
    HandshakeTimedOut {
        endpoint: EndpointConfig,
        after: Duration,
    },
    HandshakeStalled {
        endpoint: EndpointConfig,
        message: String,
    },
    CommandDropped {
        command: String,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl PeerEvent {
    /// Whether the event reports something going wrong.
    pub fn is_problem(&self) -> bool {
        match self {
            PeerEvent::Listening { .. }
            | PeerEvent::ClientAccepted { .. }
            | PeerEvent::Connected { .. } => false,
            PeerEvent::Disconnected { graceful, .. } => !graceful,
            PeerEvent::ConnectFailed { .. }
            | PeerEvent::HandshakeTimedOut { .. }
            | PeerEvent::HandshakeStalled { .. }
            | PeerEvent::CommandDropped { .. }
            | PeerEvent::Error { .. } => true,
        }
    }
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::Listening { addr } => write!(f, "Listening on {}", addr),
            PeerEvent::ClientAccepted { addr } => write!(f, "Client connected from {}", addr),
            PeerEvent::Connected { endpoint } => write!(f, "Connected to {}", endpoint),
            PeerEvent::Disconnected { peer, reason, .. } => match peer {
                Some(addr) => write!(f, "Connection to {} ended: {}", addr, reason),
                None => write!(f, "Connection ended: {}", reason),
            },
            PeerEvent::ConnectFailed { endpoint, message } => {
                write!(f, "Connect to {} failed: {}", endpoint, message)
            }
            PeerEvent::HandshakeTimedOut { endpoint, after } => {
                write!(f, "Connection to {} timed out after {:?}", endpoint, after)
            }
            PeerEvent::HandshakeStalled { endpoint, message } => {
                write!(f, "Handshake with {} failed, client stalled: {}", endpoint, message)
            }
            PeerEvent::CommandDropped { command, reason } => {
                write!(f, "Dropped {:?}: {}", command, reason)
            }
            PeerEvent::Error { message } => f.write_str(message),
        }
    }
}
