use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_PENDING_MESSAGE: usize = 64 * 1024;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid role {0:?} (expected \"client\" or \"server\")")]
    InvalidRole(String),
    #[error("endpoint {0:?} must contain exactly one ':' separator")]
    MissingSeparator(String),
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
    #[error("invalid port {0:?} (expected 0-65535)")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("client") {
            Ok(Role::Client)
        } else if trimmed.eq_ignore_ascii_case("server") {
            Ok(Role::Server)
        } else {
            Err(ConfigError::InvalidRole(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl EndpointConfig {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Parses `"<ipv4>:<port>"`. Only dotted-decimal IPv4 literals are accepted.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut parts = input.split(':');
        let (Some(address), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ConfigError::MissingSeparator(input.to_string()));
        };

        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;

        // u16::from_str accepts a leading '+', which is not a port.
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;

        Ok(Self { address, port })
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)
    }
}

impl From<SocketAddrV4> for EndpointConfig {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<EndpointConfig> for SocketAddr {
    fn from(endpoint: EndpointConfig) -> Self {
        SocketAddr::V4(endpoint.socket_addr())
    }
}

impl fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// How the client treats a connect that has not completed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePolicy {
    /// Keep waiting while the handshake is pending and start over only once
    /// the timeout has elapsed. A failed handshake returns to `ReadyToConnect`.
    Timeout(Duration),
    /// Compatibility mode: recreate the socket on every poll where the
    /// handshake is still pending. A failed handshake leaves the client
    /// stalled in `Connecting` until it is restarted.
    RestartEveryPoll,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        HandshakePolicy::Timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub role: Role,
    pub endpoint: EndpointConfig,
    pub send_buffer_capacity: usize,
    pub recv_buffer_capacity: usize,
    pub handshake: HandshakePolicy,
    pub max_pending_message: usize,
    pub outbound_capacity: usize,
}

impl PeerConfig {
    pub fn new(role: Role, endpoint: EndpointConfig) -> Self {
        Self {
            role,
            endpoint,
            send_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            recv_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            handshake: HandshakePolicy::default(),
            max_pending_message: DEFAULT_MAX_PENDING_MESSAGE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn from_strings(role: &str, endpoint: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(Role::parse(role)?, EndpointConfig::parse(endpoint)?))
    }

    pub fn with_buffers(mut self, send: usize, recv: usize) -> Self {
        self.send_buffer_capacity = send.max(1);
        self.recv_buffer_capacity = recv.max(1);
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakePolicy) -> Self {
        self.handshake = handshake;
        self
    }
}
