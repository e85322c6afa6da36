use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::channel::{CommandExecutor, acknowledgement};
use crate::endpoint::PeerConfig;
use crate::framing::{FrameError, MessageFramer, OutboundMessage};
use crate::socket::{IoOutcome, NonBlockingSocket};
use crate::stats::LinkStats;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("outbound queue full ({queued} of {capacity} bytes in use, message needs {needed})")]
    QueueFull {
        queued: usize,
        capacity: usize,
        needed: usize,
    },
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    Io(io::Error),
    Frame(FrameError),
}

impl CloseReason {
    /// The remote side closed the stream; nothing went wrong locally.
    pub fn is_graceful(&self) -> bool {
        matches!(self, CloseReason::PeerClosed)
    }

    pub fn log(&self, peer: Option<SocketAddr>) {
        let peer = peer.map_or_else(|| "<unknown>".to_string(), |addr| addr.to_string());
        match self {
            CloseReason::PeerClosed => log::info!("Connection to {} closed by peer", peer),
            CloseReason::Io(e) => log::warn!("Connection to {} lost: {}", peer, e),
            CloseReason::Frame(e) => log::warn!("Dropping connection to {}: {}", peer, e),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Io(e) => write!(f, "{}", e),
            CloseReason::Frame(e) => write!(f, "{}", e),
        }
    }
}

/// The live data socket plus everything scoped to it. Dropping a
/// `Connection` closes the socket and discards any partial inbound data.
#[derive(Debug)]
pub struct Connection {
    socket: NonBlockingSocket,
    peer_addr: Option<SocketAddr>,
    framer: MessageFramer,
    recv_buffer: Vec<u8>,
    outbound: VecDeque<u8>,
    outbound_capacity: usize,
    send_capacity: usize,
    stats: LinkStats,
}

impl Connection {
    pub fn new(socket: NonBlockingSocket, config: &PeerConfig) -> Self {
        let peer_addr = socket.peer_addr().ok();
        Self {
            socket,
            peer_addr,
            framer: MessageFramer::new(config.max_pending_message),
            recv_buffer: vec![0u8; config.recv_buffer_capacity.max(1)],
            outbound: VecDeque::new(),
            outbound_capacity: config.outbound_capacity,
            send_capacity: config.send_buffer_capacity,
            stats: LinkStats::default(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn pending_inbound(&self) -> usize {
        self.framer.pending_len()
    }

    /// Reads until the socket would block. Messages decoded before a close
    /// are still returned so they can be dispatched in stream order.
    pub fn receive(&mut self) -> (Vec<String>, Option<CloseReason>) {
        let mut messages = Vec::new();

        loop {
            match self.socket.recv(&mut self.recv_buffer) {
                IoOutcome::Success(0) => return (messages, Some(CloseReason::PeerClosed)),
                IoOutcome::Success(size) => {
                    self.stats.bytes_received += size as u64;
                    match self.framer.push(&self.recv_buffer[..size]) {
                        Ok(decoded) => messages.extend(decoded),
                        Err(e) => return (messages, Some(CloseReason::Frame(e))),
                    }
                }
                IoOutcome::WouldBlock => break,
                IoOutcome::Error(e) => return (messages, Some(CloseReason::Io(e))),
            }
        }

        (messages, None)
    }

    /// Frames `text`, queues it and writes as much of the queue as the socket
    /// takes right now.
    pub fn send(&mut self, text: &str) -> Result<(), SendError> {
        let message = OutboundMessage::new(text, self.send_capacity)?;
        self.enqueue(message)
    }

    /// Acknowledgements echo the command back, so they are bounded by the
    /// outbound queue rather than by the send buffer size.
    fn acknowledge(&mut self, text: &str) -> Result<(), SendError> {
        let message = OutboundMessage::new(text, self.outbound_capacity)?;
        self.enqueue(message)
    }

    fn enqueue(&mut self, message: OutboundMessage) -> Result<(), SendError> {
        let needed = message.wire().len();
        if self.outbound.len() + needed > self.outbound_capacity {
            self.stats.messages_dropped += 1;
            return Err(SendError::QueueFull {
                queued: self.outbound.len(),
                capacity: self.outbound_capacity,
                needed,
            });
        }

        self.outbound.extend(message.wire());
        self.stats.messages_sent += 1;
        log::trace!("Queued {:?} for {:?}", message.text(), self.peer_addr);

        self.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            let (front, _) = self.outbound.as_slices();
            match self.socket.send(front) {
                IoOutcome::Success(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ));
                }
                IoOutcome::Success(size) => {
                    self.outbound.drain(..size);
                    self.stats.bytes_sent += size as u64;
                }
                IoOutcome::WouldBlock => break,
                IoOutcome::Error(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One poll's worth of work on a connected socket: drain, decode,
    /// execute, optionally acknowledge, then flush pending output.
    pub fn service(
        &mut self,
        executor: &mut dyn CommandExecutor,
        acknowledge: bool,
    ) -> Option<CloseReason> {
        let (messages, closed) = self.receive();

        for message in messages {
            self.stats.messages_received += 1;
            log::debug!("Received {:?} from {:?}", message, self.peer_addr);

            let execution = executor.execute(&message);
            if !execution.consumed {
                log::debug!("Command {:?} was not consumed", message);
            }

            if acknowledge && closed.is_none() {
                match self.acknowledge(&acknowledgement(&message, &execution)) {
                    Ok(()) => {}
                    Err(SendError::Io(e)) => return Some(CloseReason::Io(e)),
                    Err(e) => log::warn!("Could not acknowledge {:?}: {}", message, e),
                }
            }
        }

        if closed.is_some() {
            return closed;
        }

        self.flush().err().map(CloseReason::Io)
    }
}
