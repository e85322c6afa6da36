use std::collections::VecDeque;
use std::io;
use std::time::Instant;

use crate::channel::CommandExecutor;
use crate::connection::{Connection, SendError};
use crate::endpoint::{HandshakePolicy, PeerConfig};
use crate::events::PeerEvent;
use crate::socket::{IoOutcome, NonBlockingSocket};
use crate::stats::LinkStats;

#[derive(Debug)]
pub enum ClientState {
    Uninitialized,
    ReadyToConnect,
    /// `stalled` is set once the handshake has failed under
    /// [`HandshakePolicy::RestartEveryPoll`]; the socket is kept but never
    /// read again, so the client cannot drift into `Connected`.
    Connecting {
        socket: NonBlockingSocket,
        started: Instant,
        stalled: bool,
    },
    Connected(Connection),
}

/// What one zero-timeout look at a pending connect found.
#[derive(Debug)]
pub enum Handshake {
    Pending,
    Established,
    Failed(io::Error),
    CheckFailed(io::Error),
}

impl Handshake {
    pub fn check(socket: &NonBlockingSocket) -> Self {
        match socket.is_writable() {
            Ok(false) => Handshake::Pending,
            Ok(true) => match socket.take_error() {
                Ok(None) => Handshake::Established,
                Ok(Some(e)) | Err(e) => Handshake::Failed(e),
            },
            Err(e) => Handshake::CheckFailed(e),
        }
    }
}

pub struct ClientMachine {
    config: PeerConfig,
    state: ClientState,
    stats: LinkStats,
    connect_attempts: u64,
    failure_streak: u32,
    events: VecDeque<PeerEvent>,
}

impl ClientMachine {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            state: ClientState::Uninitialized,
            stats: LinkStats::default(),
            connect_attempts: 0,
            failure_streak: 0,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn connection(&self) -> Option<&Connection> {
        match &self.state {
            ClientState::Connected(connection) => Some(connection),
            _ => None,
        }
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
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

    pub fn poll(&mut self, now: Instant, executor: &mut dyn CommandExecutor) {
        let state = std::mem::replace(&mut self.state, ClientState::Uninitialized);

        self.state = match state {
            ClientState::Uninitialized => {
                log::debug!("Client ready to connect to {}", self.config.endpoint);
                ClientState::ReadyToConnect
            }
            ClientState::ReadyToConnect => self.start_connect(now),
            ClientState::Connecting {
                socket,
                started,
                stalled: true,
            } => {
                log::trace!("Client stalled on a failed handshake");
                ClientState::Connecting {
                    socket,
                    started,
                    stalled: true,
                }
            }
            ClientState::Connecting { socket, started, .. } => {
                let handshake = Handshake::check(&socket);
                self.resolve_handshake(socket, started, now, handshake)
            }
            ClientState::Connected(mut connection) => {
                match connection.service(executor, false) {
                    Some(reason) => {
                        reason.log(connection.peer_addr());
                        self.events.push_back(PeerEvent::Disconnected {
                            peer: connection.peer_addr(),
                            reason: reason.to_string(),
                            graceful: reason.is_graceful(),
                        });
                        self.teardown(connection)
                    }
                    None => ClientState::Connected(connection),
                }
            }
        };
    }

    pub fn send(&mut self, text: &str) {
        let ClientState::Connected(connection) = &mut self.state else {
            log::debug!("Not connected, dropping {:?}", text);
            return;
        };

        match connection.send(text) {
            Ok(()) => {}
            Err(SendError::Io(e)) => {
                log::warn!("Send to {} failed: {}", self.config.endpoint, e);
                if let ClientState::Connected(connection) =
                    std::mem::replace(&mut self.state, ClientState::ReadyToConnect)
                {
                    self.events.push_back(PeerEvent::Disconnected {
                        peer: connection.peer_addr(),
                        reason: e.to_string(),
                        graceful: false,
                    });
                    self.state = self.teardown(connection);
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
        if let ClientState::Connected(connection) =
            std::mem::replace(&mut self.state, ClientState::Uninitialized)
        {
            self.stats.merge(connection.stats());
            log::info!("Closing connection to {}", self.config.endpoint);
        }
    }

    fn start_connect(&mut self, now: Instant) -> ClientState {
        self.connect_attempts += 1;
        let addr = self.config.endpoint.socket_addr();

        let socket = match NonBlockingSocket::open() {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("Failed to create socket: {}", e);
                self.events.push_back(PeerEvent::Error {
                    message: format!("Failed to create socket: {}", e),
                });
                return ClientState::ReadyToConnect;
            }
        };

        match socket.connect(addr) {
            IoOutcome::Success(()) => self.connected(socket),
            IoOutcome::WouldBlock => ClientState::Connecting {
                socket,
                started: now,
                stalled: false,
            },
            IoOutcome::Error(e) => {
                self.connect_failed(&e);
                ClientState::ReadyToConnect
            }
        }
    }

    fn resolve_handshake(
        &mut self,
        socket: NonBlockingSocket,
        started: Instant,
        now: Instant,
        handshake: Handshake,
    ) -> ClientState {
        match handshake {
            Handshake::Established => self.connected(socket),
            Handshake::Failed(e) => match self.config.handshake {
                HandshakePolicy::Timeout(_) => {
                    self.connect_failed(&e);
                    ClientState::ReadyToConnect
                }
                HandshakePolicy::RestartEveryPoll => {
                    log::warn!(
                        "Handshake with {} failed, client stalled: {}",
                        self.config.endpoint,
                        e
                    );
                    self.events.push_back(PeerEvent::HandshakeStalled {
                        endpoint: self.config.endpoint,
                        message: e.to_string(),
                    });
                    ClientState::Connecting {
                        socket,
                        started,
                        stalled: true,
                    }
                }
            },
            Handshake::Pending => match self.config.handshake {
                HandshakePolicy::Timeout(timeout) => {
                    if now.saturating_duration_since(started) >= timeout {
                        log::warn!(
                            "Connection to {} timed out after {:?}",
                            self.config.endpoint,
                            timeout
                        );
                        self.events.push_back(PeerEvent::HandshakeTimedOut {
                            endpoint: self.config.endpoint,
                            after: timeout,
                        });
                        drop(socket);
                        self.start_connect(now)
                    } else {
                        ClientState::Connecting {
                            socket,
                            started,
                            stalled: false,
                        }
                    }
                }
                HandshakePolicy::RestartEveryPoll => {
                    log::trace!("Handshake still pending, restarting connect");
                    drop(socket);
                    self.start_connect(now)
                }
            },
            Handshake::CheckFailed(e) => {
                log::warn!("Readiness check failed: {}", e);
                self.events.push_back(PeerEvent::Error {
                    message: format!("Readiness check failed: {}", e),
                });
                ClientState::ReadyToConnect
            }
        }
    }

    fn connected(&mut self, socket: NonBlockingSocket) -> ClientState {
        log::info!("Connected to {}", self.config.endpoint);
        self.events.push_back(PeerEvent::Connected {
            endpoint: self.config.endpoint,
        });
        self.failure_streak = 0;
        self.stats.connections += 1;
        ClientState::Connected(Connection::new(socket, &self.config))
    }

    /// Only the first failure of a streak is surfaced.
    fn connect_failed(&mut self, e: &io::Error) {
        self.failure_streak += 1;
        if self.failure_streak == 1 {
            log::warn!("Connect to {} failed: {}", self.config.endpoint, e);
            self.events.push_back(PeerEvent::ConnectFailed {
                endpoint: self.config.endpoint,
                message: e.to_string(),
            });
        } else {
            log::debug!(
                "Connect to {} failed ({} in a row): {}",
                self.config.endpoint,
                self.failure_streak,
                e
            );
        }
    }

    fn teardown(&mut self, connection: Connection) -> ClientState {
        self.stats.merge(connection.stats());
        ClientState::ReadyToConnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Execution;
    use crate::endpoint::{EndpointConfig, Role};
    use crate::socket::Listener;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::time::Duration;

    fn loopback_listener() -> Listener {
        Listener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap()
    }

    fn config_for(listener: &Listener, handshake: HandshakePolicy) -> PeerConfig {
        let SocketAddr::V4(addr) = listener.local_addr().unwrap() else {
            panic!("expected an IPv4 listener");
        };
        PeerConfig::new(Role::Client, EndpointConfig::from(addr)).with_handshake(handshake)
    }

    fn refused() -> Handshake {
        Handshake::Failed(io::Error::from(io::ErrorKind::ConnectionRefused))
    }

    #[test]
    fn test_pending_handshake_waits_under_timeout_policy() {
        let listener = loopback_listener();
        let policy = HandshakePolicy::Timeout(Duration::from_secs(5));
        let mut machine = ClientMachine::new(config_for(&listener, policy));

        let started = Instant::now();
        let socket = NonBlockingSocket::open().unwrap();
        let state = machine.resolve_handshake(socket, started, started, Handshake::Pending);

        assert!(matches!(state, ClientState::Connecting { started: s, .. } if s == started));
        assert_eq!(machine.connect_attempts(), 0);
    }

    #[test]
    fn test_pending_handshake_restarts_after_timeout() {
        let listener = loopback_listener();
        let timeout = Duration::from_millis(50);
        let mut machine =
            ClientMachine::new(config_for(&listener, HandshakePolicy::Timeout(timeout)));

        let started = Instant::now();
        let socket = NonBlockingSocket::open().unwrap();
        let later = started + timeout;
        let state = machine.resolve_handshake(socket, started, later, Handshake::Pending);

        assert_eq!(machine.connect_attempts(), 1);
        assert!(matches!(
            state,
            ClientState::Connecting { .. } | ClientState::Connected(_)
        ));
        assert!(
            machine
                .drain_events()
                .any(|e| matches!(e, PeerEvent::HandshakeTimedOut { .. }))
        );
    }

    #[test]
    fn test_pending_handshake_recreates_socket_in_compat_mode() {
        let listener = loopback_listener();
        let mut machine =
            ClientMachine::new(config_for(&listener, HandshakePolicy::RestartEveryPoll));

        let started = Instant::now();
        let socket = NonBlockingSocket::open().unwrap();
        let state = machine.resolve_handshake(socket, started, started, Handshake::Pending);

        // The pending socket was discarded and a fresh connect issued on the same poll.
        assert_eq!(machine.connect_attempts(), 1);
        assert!(!matches!(state, ClientState::Uninitialized));
    }

    #[test]
    fn test_failed_handshake_retries_under_timeout_policy() {
        let listener = loopback_listener();
        let mut machine = ClientMachine::new(config_for(&listener, HandshakePolicy::default()));

        let now = Instant::now();
        let socket = NonBlockingSocket::open().unwrap();
        let state = machine.resolve_handshake(socket, now, now, refused());

        assert!(matches!(state, ClientState::ReadyToConnect));
        let events: Vec<PeerEvent> = machine.drain_events().collect();
        assert!(matches!(events.as_slice(), [PeerEvent::ConnectFailed { .. }]));
        assert_eq!(machine.stats().connections, 0);
    }

    #[test]
    fn test_failed_handshake_stalls_in_compat_mode() {
        let listener = loopback_listener();
        let mut machine =
            ClientMachine::new(config_for(&listener, HandshakePolicy::RestartEveryPoll));

        let now = Instant::now();
        let socket = NonBlockingSocket::open().unwrap();
        machine.state = machine.resolve_handshake(socket, now, now, refused());
        assert!(matches!(
            machine.state(),
            ClientState::Connecting { stalled: true, .. }
        ));

        // Later polls never look at the dead socket again.
        let mut executor = |_: &str| Execution::default();
        for _ in 0..20 {
            machine.poll(Instant::now(), &mut executor);
            assert!(matches!(
                machine.state(),
                ClientState::Connecting { stalled: true, .. }
            ));
        }
        assert_eq!(machine.stats().connections, 0);
        assert_eq!(machine.connect_attempts(), 0);

        let events: Vec<PeerEvent> = machine.drain_events().collect();
        assert!(matches!(events.as_slice(), [PeerEvent::HandshakeStalled { .. }]));
    }

    #[test]
    fn test_failed_readiness_check_returns_to_ready() {
        let listener = loopback_listener();
        let mut machine = ClientMachine::new(config_for(&listener, HandshakePolicy::default()));

        let socket = NonBlockingSocket::open().unwrap();
        let now = Instant::now();
        let check = Handshake::CheckFailed(io::Error::other("poll failed"));
        let state = machine.resolve_handshake(socket, now, now, check);
        assert!(matches!(state, ClientState::ReadyToConnect));
    }

    #[test]
    fn test_established_handshake_connects() {
        let listener = loopback_listener();
        let mut machine = ClientMachine::new(config_for(&listener, HandshakePolicy::default()));

        let socket = NonBlockingSocket::open().unwrap();
        let now = Instant::now();
        let state = machine.resolve_handshake(socket, now, now, Handshake::Established);

        assert!(matches!(state, ClientState::Connected(_)));
        assert_eq!(machine.stats().connections, 1);
    }

    #[test]
    fn test_send_while_disconnected_is_noop() {
        let listener = loopback_listener();
        let mut machine = ClientMachine::new(config_for(&listener, HandshakePolicy::default()));

        machine.send("Echo Message=\"hi\"");
        assert!(matches!(machine.state(), ClientState::Uninitialized));
        assert_eq!(machine.stats().messages_sent, 0);
        assert_eq!(machine.drain_events().count(), 0);
    }

    #[test]
    fn test_first_poll_moves_to_ready() {
        let listener = loopback_listener();
        let mut machine = ClientMachine::new(config_for(&listener, HandshakePolicy::default()));
        let mut executor = |_: &str| Execution::default();

        machine.poll(Instant::now(), &mut executor);
        assert!(matches!(machine.state(), ClientState::ReadyToConnect));

        machine.poll(Instant::now(), &mut executor);
        assert!(matches!(
            machine.state(),
            ClientState::Connecting { .. } | ClientState::Connected(_)
        ));
        assert_eq!(machine.connect_attempts(), 1);
    }
}
