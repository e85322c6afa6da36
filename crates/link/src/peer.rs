use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::channel::CommandExecutor;
use crate::client::{ClientMachine, ClientState};
use crate::endpoint::{ConfigError, PeerConfig, Role};
use crate::events::PeerEvent;
use crate::server::{ServerMachine, ServerState};
use crate::stats::LinkStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Uninitialized,
    ReadyToConnect,
    Connecting,
    Listening,
    Connected,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Uninitialized => "uninitialized",
            PeerState::ReadyToConnect => "ready to connect",
            PeerState::Connecting => "connecting",
            PeerState::Listening => "listening",
            PeerState::Connected => "connected",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Machine {
    Idle,
    Client(ClientMachine),
    Server(ServerMachine),
}

/// Owner-facing handle for one networking session. The owner calls
/// [`Peer::poll`] once per tick; nothing here blocks or spawns threads.
pub struct Peer {
    machine: Machine,
    config: Option<PeerConfig>,
    events: VecDeque<PeerEvent>,
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer {
    pub fn new() -> Self {
        Self {
            machine: Machine::Idle,
            config: None,
            events: VecDeque::new(),
        }
    }

    pub fn startup(&mut self, config: PeerConfig) {
        self.shutdown();
        log::info!("Starting {} peer for {}", config.role, config.endpoint);
        self.machine = match config.role {
            Role::Client => Machine::Client(ClientMachine::new(config.clone())),
            Role::Server => Machine::Server(ServerMachine::new(config.clone())),
        };
        self.config = Some(config);
    }

    /// Parses the role and endpoint strings and starts the peer. Any running
    /// session is shut down first, so a malformed value leaves the peer
    /// uninitialized.
    pub fn startup_from(&mut self, role: &str, endpoint: &str) -> Result<(), ConfigError> {
        self.shutdown();
        let config = PeerConfig::from_strings(role, endpoint).inspect_err(|e| {
            log::error!("Invalid network configuration: {}", e);
            self.events.push_back(PeerEvent::Error {
                message: format!("Invalid network configuration: {}", e),
            });
        })?;
        self.startup(config);
        Ok(())
    }

    pub fn poll(&mut self, executor: &mut dyn CommandExecutor) {
        self.poll_at(Instant::now(), executor);
    }

    pub fn poll_at(&mut self, now: Instant, executor: &mut dyn CommandExecutor) {
        match &mut self.machine {
            Machine::Idle => {}
            Machine::Client(client) => client.poll(now, executor),
            Machine::Server(server) => server.poll(executor),
        }
        self.collect_events();
    }

    /// Sends a command to the remote peer. Does nothing unless connected.
    pub fn send(&mut self, command: &str) {
        match &mut self.machine {
            Machine::Idle => {}
            Machine::Client(client) => client.send(command),
            Machine::Server(server) => server.send(command),
        }
        self.collect_events();
    }

    /// Events raised since the last call, oldest first.
    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    fn collect_events(&mut self) {
        match &mut self.machine {
            Machine::Idle => {}
            Machine::Client(client) => self.events.extend(client.drain_events()),
            Machine::Server(server) => self.events.extend(server.drain_events()),
        }
    }

    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.machine, Machine::Idle) {
            Machine::Idle => {}
            Machine::Client(mut client) => {
                client.shutdown();
                self.events.extend(client.drain_events());
            }
            Machine::Server(mut server) => {
                server.shutdown();
                self.events.extend(server.drain_events());
            }
        }
        self.config = None;
    }

    pub fn state(&self) -> PeerState {
        match &self.machine {
            Machine::Idle => PeerState::Uninitialized,
            Machine::Client(client) => match client.state() {
                ClientState::Uninitialized => PeerState::Uninitialized,
                ClientState::ReadyToConnect => PeerState::ReadyToConnect,
                ClientState::Connecting { .. } => PeerState::Connecting,
                ClientState::Connected(_) => PeerState::Connected,
            },
            Machine::Server(server) => match server.state() {
                ServerState::Uninitialized => PeerState::Uninitialized,
                ServerState::Listening(_) => PeerState::Listening,
                ServerState::Connected { .. } => PeerState::Connected,
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    pub fn config(&self) -> Option<&PeerConfig> {
        self.config.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.config.as_ref().map(|c| c.role)
    }

    /// Address the server is listening on, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.machine {
            Machine::Server(server) => server.local_addr(),
            _ => None,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.machine {
            Machine::Idle => None,
            Machine::Client(client) => client.connection().and_then(|c| c.peer_addr()),
            Machine::Server(server) => server.connection().and_then(|c| c.peer_addr()),
        }
    }

    /// Bytes received on the current connection that are still waiting for
    /// a terminator.
    pub fn pending_inbound(&self) -> usize {
        match &self.machine {
            Machine::Idle => 0,
            Machine::Client(client) => client.connection().map_or(0, |c| c.pending_inbound()),
            Machine::Server(server) => server.connection().map_or(0, |c| c.pending_inbound()),
        }
    }

    pub fn connect_attempts(&self) -> u64 {
        match &self.machine {
            Machine::Client(client) => client.connect_attempts(),
            _ => 0,
        }
    }

    pub fn stats(&self) -> LinkStats {
        match &self.machine {
            Machine::Idle => LinkStats::default(),
            Machine::Client(client) => client.stats(),
            Machine::Server(server) => server.stats(),
        }
    }
}
