use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::channel::CommandExecutor;
use crate::connection::{Connection, SendError};
use crate::endpoint::PeerConfig;
use crate::events::PeerEvent;
use crate::socket::{IoOutcome, Listener};
use crate::stats::LinkStats;

/// While `Connected` the listener stays bound but is not polled, so a second
/// client waits in the accept backlog until the current one leaves.
#[derive(Debug)]
pub enum ServerState {
    Uninitialized,
    Listening(Listener),
    Connected {
        listener: Listener,
        connection: Connection,
    },
}

pub struct ServerMachine {
    config: PeerConfig,
    state: ServerState,
    stats: LinkStats,
    bind_failed: bool,
    events: VecDeque<PeerEvent>,
}

impl ServerMachine {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            state: ServerState::Uninitialized,
            stats: LinkStats::default(),
            bind_failed: false,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn connection(&self) -> Option<&Connection> {
        match &self.state {
            ServerState::Connected { connection, .. } => Some(connection),
            _ => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ServerState::Uninitialized => None,
            ServerState::Listening(listener) | ServerState::Connected { listener, .. } => {
                listener.local_addr().ok()
            }
        }
    }

    pub fn stats(&self) -> LinkStats {
        let mut stats = self.stats.clone();
        if let Some(connection) = self.connection() {
            stats.merge(connection.stats());
        }
        stats
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn poll(&mut self, executor: &mut dyn CommandExecutor) {
        let state = std::mem::replace(&mut self.state, ServerState::Uninitialized);

        self.state = match state {
            ServerState::Uninitialized => self.bind(),
            ServerState::Listening(listener) => self.poll_listening(listener),
            ServerState::Connected {
                listener,
                mut connection,
            } => match connection.service(executor, true) {
                Some(reason) => {
                    reason.log(connection.peer_addr());
                    self.events.push_back(PeerEvent::Disconnected {
                        peer: connection.peer_addr(),
                        reason: reason.to_string(),
                        graceful: reason.is_graceful(),
                    });
                    self.stats.merge(connection.stats());
                    log::info!("Listening on {} for the next client", self.config.endpoint);
                    ServerState::Listening(listener)
                }
                None => ServerState::Connected {
                    listener,
                    connection,
                },
            },
        };
    }

    pub fn send(&mut self, text: &str) {
        let ServerState::Connected { connection, .. } = &mut self.state else {
            log::debug!("No client connected, dropping {:?}", text);
            return;
        };

        match connection.send(text) {
            Ok(()) => {}
            Err(SendError::Io(e)) => {
                let state = std::mem::replace(&mut self.state, ServerState::Uninitialized);
                if let ServerState::Connected {
                    listener,
                    connection,
                } = state
                {
                    log::warn!("Send to {:?} failed: {}", connection.peer_addr(), e);
                    self.events.push_back(PeerEvent::Disconnected {
                        peer: connection.peer_addr(),
                        reason: e.to_string(),
                        graceful: false,
                    });
                    self.stats.merge(connection.stats());
                    self.state = ServerState::Listening(listener);
                }
            }
            Err(e) => {
                log::warn!("Dropping outbound command {:?}: {}", text, e);
                self.events.push_back(PeerEvent::CommandDropped {
                    command: text.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let ServerState::Connected { connection, .. } =
            std::mem::replace(&mut self.state, ServerState::Uninitialized)
        {
            self.stats.merge(connection.stats());
        }
        log::info!("Server on {} shut down", self.config.endpoint);
    }

    fn bind(&mut self) -> ServerState {
        match Listener::bind(self.config.endpoint.socket_addr()) {
            Ok(listener) => {
                let addr = listener
                    .local_addr()
                    .unwrap_or_else(|_| self.config.endpoint.into());
                log::info!("Listening on {}", addr);
                self.events.push_back(PeerEvent::Listening { addr });
                self.bind_failed = false;
                ServerState::Listening(listener)
            }
            Err(e) => {
                if !self.bind_failed {
                    log::error!("Failed to listen on {}: {}", self.config.endpoint, e);
                    self.events.push_back(PeerEvent::Error {
                        message: format!("Failed to listen on {}: {}", self.config.endpoint, e),
                    });
                }
                self.bind_failed = true;
                ServerState::Uninitialized
            }
        }
    }

    fn poll_listening(&mut self, listener: Listener) -> ServerState {
        match listener.has_pending() {
            Ok(true) => {}
            Ok(false) => return ServerState::Listening(listener),
            Err(e) => {
                log::warn!("Accept readiness check failed: {}", e);
                self.events.push_back(PeerEvent::Error {
                    message: format!("Accept readiness check failed: {}", e),
                });
                return ServerState::Listening(listener);
            }
        }

        match listener.accept() {
            IoOutcome::Success((socket, addr)) => {
                log::info!("Client connected from {}", addr);
                self.events.push_back(PeerEvent::ClientAccepted { addr });
                self.stats.connections += 1;
                let connection = Connection::new(socket, &self.config);
                ServerState::Connected {
                    listener,
                    connection,
                }
            }
            IoOutcome::WouldBlock => ServerState::Listening(listener),
            IoOutcome::Error(e) => {
                log::warn!("Accept failed: {}", e);
                self.events.push_back(PeerEvent::Error {
                    message: format!("Accept failed: {}", e),
                });
                ServerState::Listening(listener)
            }
        }
    }
}
