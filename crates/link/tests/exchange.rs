use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tether::{
    CommandExecutor, DEFAULT_BUFFER_CAPACITY, EndpointConfig, Execution, HandshakePolicy, Peer,
    PeerConfig, PeerEvent, PeerState, ResultTags, Role,
};

#[derive(Default)]
struct Recorder {
    commands: Vec<String>,
}

impl CommandExecutor for Recorder {
    fn execute(&mut self, command: &str) -> Execution {
        self.commands.push(command.to_string());
        Execution::consumed(ResultTags::OK)
    }
}

struct Side {
    peer: Peer,
    recorder: Recorder,
}

impl Side {
    fn new(config: PeerConfig) -> Self {
        let mut peer = Peer::new();
        peer.startup(config);
        Self {
            peer,
            recorder: Recorder::default(),
        }
    }

    fn poll(&mut self) {
        self.peer.poll(&mut self.recorder);
    }
}

fn wait_for(mut step: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn pump(side: &mut Side, mut done: impl FnMut(&Side) -> bool) -> bool {
    wait_for(|| {
        side.poll();
        done(side)
    })
}

fn pump_both(
    server: &mut Side,
    client: &mut Side,
    mut done: impl FnMut(&Side, &Side) -> bool,
) -> bool {
    wait_for(|| {
        server.poll();
        client.poll();
        done(server, client)
    })
}

fn listening_server() -> (Side, SocketAddr) {
    let config = PeerConfig::new(Role::Server, EndpointConfig::new(Ipv4Addr::LOCALHOST, 0));
    let mut server = Side::new(config);
    assert!(pump(&mut server, |s| s.peer.state() == PeerState::Listening));
    let addr = server.peer.local_addr().unwrap();
    (server, addr)
}

fn client_for(addr: SocketAddr) -> Side {
    let SocketAddr::V4(addr) = addr else {
        panic!("expected an IPv4 address");
    };
    Side::new(PeerConfig::new(Role::Client, EndpointConfig::from(addr)))
}

fn accept_nonblocking(listener: &TcpListener, client: &mut Side) -> TcpStream {
    listener.set_nonblocking(true).unwrap();
    let mut accepted = None;
    assert!(wait_for(|| {
        client.poll();
        if let Ok((stream, _)) = listener.accept() {
            accepted = Some(stream);
        }
        accepted.is_some() && client.peer.is_connected()
    }));
    let stream = accepted.unwrap();
    stream.set_nonblocking(false).unwrap();
    stream
}

#[test]
fn test_echo_round_trip() {
    let (mut server, addr) = listening_server();
    let mut client = client_for(addr);

    assert!(pump_both(&mut server, &mut client, |s, c| {
        s.peer.is_connected() && c.peer.is_connected()
    }));

    client.peer.send("Echo Message=\"hi\"");

    assert!(pump_both(&mut server, &mut client, |_, c| {
        !c.recorder.commands.is_empty()
    }));

    assert_eq!(server.recorder.commands, vec!["Echo Message=\"hi\""]);
    assert_eq!(client.recorder.commands.len(), 1);
    let ack = &client.recorder.commands[0];
    assert!(ack.starts_with("Ack "));
    assert!(ack.contains("hi"));
}

#[test]
fn test_acknowledges_command_near_send_capacity() {
    let (mut server, addr) = listening_server();
    let mut client = client_for(addr);
    assert!(pump_both(&mut server, &mut client, |s, c| {
        s.peer.is_connected() && c.peer.is_connected()
    }));

    // Fits the send buffer, but the ack that echoes it back does not.
    let command = format!("Echo Message=\"{}\"", "h".repeat(2030));
    assert!(command.len() < DEFAULT_BUFFER_CAPACITY);
    client.peer.send(&command);

    assert!(pump_both(&mut server, &mut client, |_, c| {
        !c.recorder.commands.is_empty()
    }));

    assert_eq!(server.recorder.commands, vec![command]);
    let ack = &client.recorder.commands[0];
    assert!(ack.starts_with("Ack Consumed=true "));
    assert!(ack.len() > DEFAULT_BUFFER_CAPACITY);
    assert!(ack.contains(&"h".repeat(2030)));
    assert_eq!(server.peer.stats().messages_dropped, 0);
}

#[test]
fn test_commands_dispatched_in_stream_order() {
    let (mut server, addr) = listening_server();
    let mut raw = TcpStream::connect(addr).unwrap();
    assert!(pump(&mut server, |s| s.peer.is_connected()));

    let wire = b"First\0Second A=1\0Third B=\"x y\"\0";
    for chunk in wire.chunks(3) {
        raw.write_all(chunk).unwrap();
        raw.flush().unwrap();
        server.poll();
    }

    assert!(pump(&mut server, |s| s.recorder.commands.len() == 3));
    assert_eq!(
        server.recorder.commands,
        vec!["First", "Second A=1", "Third B=\"x y\""]
    );
}

#[test]
fn test_server_streams_many_commands_to_client() {
    let (mut server, addr) = listening_server();
    let mut client = client_for(addr);
    assert!(pump_both(&mut server, &mut client, |s, c| {
        s.peer.is_connected() && c.peer.is_connected()
    }));

    let expected: Vec<String> = (0..200).map(|i| format!("Tick Index={}", i)).collect();
    for command in &expected {
        server.peer.send(command);
    }

    assert!(pump_both(&mut server, &mut client, |_, c| {
        c.recorder.commands.len() == expected.len()
    }));
    assert_eq!(client.recorder.commands, expected);
    assert_eq!(server.peer.stats().messages_sent, 200);
}

#[test]
fn test_server_disconnect_discards_partial_data() {
    let (mut server, addr) = listening_server();

    let mut first = TcpStream::connect(addr).unwrap();
    assert!(pump(&mut server, |s| s.peer.is_connected()));

    first.write_all(b"stale-partial").unwrap();
    assert!(pump(&mut server, |s| s.peer.pending_inbound() > 0));

    drop(first);
    assert!(pump(&mut server, |s| s.peer.state() == PeerState::Listening));
    assert_eq!(server.peer.pending_inbound(), 0);

    let mut second = TcpStream::connect(addr).unwrap();
    assert!(pump(&mut server, |s| s.peer.is_connected()));
    second.write_all(b"fresh\0").unwrap();

    assert!(pump(&mut server, |s| !s.recorder.commands.is_empty()));
    assert_eq!(server.recorder.commands, vec!["fresh"]);
}

#[test]
fn test_client_disconnect_discards_partial_data() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let mut client = client_for(listener.local_addr().unwrap());

    let mut first = accept_nonblocking(&listener, &mut client);
    first.write_all(b"half a comm").unwrap();
    assert!(pump(&mut client, |c| c.peer.pending_inbound() > 0));

    drop(first);
    assert!(pump(&mut client, |c| {
        c.peer.state() == PeerState::ReadyToConnect
    }));
    assert_eq!(client.peer.pending_inbound(), 0);

    let mut second = accept_nonblocking(&listener, &mut client);
    second.write_all(b"and\0").unwrap();
    assert!(pump(&mut client, |c| !c.recorder.commands.is_empty()));
    assert_eq!(client.recorder.commands, vec!["and"]);
    assert_eq!(client.peer.stats().connections, 2);
}

#[test]
fn test_server_serves_one_client_at_a_time() {
    let (mut server, addr) = listening_server();

    let mut first = TcpStream::connect(addr).unwrap();
    assert!(pump(&mut server, |s| s.peer.is_connected()));
    assert_eq!(server.peer.remote_addr(), Some(first.local_addr().unwrap()));

    let mut second = TcpStream::connect(addr).unwrap();
    second.write_all(b"from-second\0").unwrap();
    first.write_all(b"from-first\0").unwrap();

    assert!(pump(&mut server, |s| !s.recorder.commands.is_empty()));
    for _ in 0..50 {
        server.poll();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(server.recorder.commands, vec!["from-first"]);
    assert_eq!(server.peer.remote_addr(), Some(first.local_addr().unwrap()));

    drop(first);
    assert!(pump(&mut server, |s| s.recorder.commands.len() == 2));
    assert_eq!(server.recorder.commands, vec!["from-first", "from-second"]);
    assert_eq!(server.peer.remote_addr(), Some(second.local_addr().unwrap()));
}

#[test]
fn test_client_keeps_retrying_unreachable_server() {
    let port = {
        let scratch = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        scratch.local_addr().unwrap().port()
    };

    let config = PeerConfig::new(Role::Client, EndpointConfig::new(Ipv4Addr::LOCALHOST, port));
    let mut client = Side::new(config);

    for _ in 0..50 {
        client.poll();
        assert_ne!(client.peer.state(), PeerState::Connected);
        thread::sleep(Duration::from_millis(1));
    }
    assert!(client.peer.connect_attempts() > 1);
    assert!(client.recorder.commands.is_empty());
}

#[test]
fn test_compat_client_never_connects_to_closed_port() {
    let port = {
        let scratch = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        scratch.local_addr().unwrap().port()
    };

    let config = PeerConfig::new(Role::Client, EndpointConfig::new(Ipv4Addr::LOCALHOST, port))
        .with_handshake(HandshakePolicy::RestartEveryPoll);
    let mut client = Side::new(config);

    for _ in 0..200 {
        client.poll();
        assert_ne!(client.peer.state(), PeerState::Connected);
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(client.peer.stats().connections, 0);

    let events: Vec<PeerEvent> = client.peer.drain_events().collect();
    assert!(!events.iter().any(|e| matches!(e, PeerEvent::Connected { .. })));
    assert!(events.iter().all(PeerEvent::is_problem));
}

#[test]
fn test_pending_handshake_keeps_socket_until_timeout() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let SocketAddr::V4(addr) = listener.local_addr().unwrap() else {
        panic!("expected an IPv4 address");
    };
    let config = PeerConfig::new(Role::Client, EndpointConfig::from(addr))
        .with_handshake(HandshakePolicy::Timeout(Duration::from_secs(60)));
    let mut client = Side::new(config);

    // Polls that land before the timeout never restart the connect, whether
    // or not the handshake has finished yet.
    let start = Instant::now();
    for _ in 0..20 {
        client.peer.poll_at(start, &mut client.recorder);
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(client.peer.connect_attempts(), 1);
    assert_eq!(client.peer.state(), PeerState::Connected);
}

#[test]
fn test_send_while_disconnected_is_silent() {
    let (mut server, _) = listening_server();
    server.peer.send("Echo Message=\"nobody home\"");
    server.poll();
    assert_eq!(server.peer.state(), PeerState::Listening);
    assert_eq!(server.peer.stats().messages_sent, 0);
}
