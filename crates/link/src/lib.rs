pub mod channel;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod events;
pub mod framing;
pub mod peer;
pub mod server;
pub mod socket;
pub mod stats;

pub use channel::{ACK_VERB, CommandExecutor, Execution, ResultTags, acknowledgement};
pub use client::{ClientMachine, ClientState, Handshake};
pub use connection::{CloseReason, Connection, SendError};
pub use endpoint::{
    ConfigError, DEFAULT_BUFFER_CAPACITY, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PORT,
    EndpointConfig, HandshakePolicy, PeerConfig, Role,
};
pub use events::PeerEvent;
pub use framing::{FrameError, MESSAGE_TERMINATOR, MessageFramer, OutboundMessage, encode};
pub use peer::{Peer, PeerState};
pub use server::{ServerMachine, ServerState};
pub use socket::{IoOutcome, Listener, NonBlockingSocket};
pub use stats::LinkStats;
