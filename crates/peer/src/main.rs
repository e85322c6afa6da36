mod console;
mod tui;

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use console::ConsoleExecutor;
use tether::{EndpointConfig, HandshakePolicy, Peer, PeerConfig, PeerState};
use tui::{PeerView, TuiState};

#[derive(Parser)]
#[command(name = "tether-peer")]
#[command(about = "Exchange NUL-terminated commands with a remote peer over TCP")]
struct Args {
    #[arg(short, long, default_value = "server", help = "client or server")]
    role: String,

    #[arg(
        short,
        long,
        default_value_t = EndpointConfig::default().to_string(),
        help = "IPv4 address and port"
    )]
    endpoint: String,

    #[arg(long, default_value_t = tether::DEFAULT_BUFFER_CAPACITY)]
    send_buffer: usize,

    #[arg(long, default_value_t = tether::DEFAULT_BUFFER_CAPACITY)]
    recv_buffer: usize,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(
        long,
        default_value_t = tether::DEFAULT_CONNECT_TIMEOUT_SECS,
        help = "Seconds to wait for a pending connect"
    )]
    connect_timeout: u64,

    #[arg(long, help = "Recreate the client socket on every poll while a connect is pending")]
    restart_every_poll: bool,

    #[arg(long)]
    headless: bool,

    #[arg(
        long = "send",
        value_name = "COMMAND",
        help = "Command to send once connected (repeatable)"
    )]
    send: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let handshake = if args.restart_every_poll {
        HandshakePolicy::RestartEveryPoll
    } else {
        HandshakePolicy::Timeout(Duration::from_secs(args.connect_timeout))
    };
    let config = PeerConfig::from_strings(&args.role, &args.endpoint)?
        .with_buffers(args.send_buffer, args.recv_buffer)
        .with_handshake(handshake);

    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let outgoing: VecDeque<String> = args.send.into_iter().collect();

    let mut peer = Peer::new();
    peer.startup(config);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        run_headless(&mut peer, tick_duration, outgoing);
    } else {
        run_with_tui(&mut peer, tick_duration, outgoing)?;
    }

    peer.shutdown();
    Ok(())
}

fn run_headless(peer: &mut Peer, tick_duration: Duration, mut outgoing: VecDeque<String>) {
    let mut console = ConsoleExecutor::new();

    loop {
        let tick_start = Instant::now();

        peer.poll(&mut console);
        // env_logger already printed both of these.
        console.drain_output().for_each(drop);
        peer.drain_events().for_each(drop);

        if peer.is_connected() {
            while let Some(command) = outgoing.pop_front() {
                log::info!("Sending {:?}", command);
                peer.send(&command);
            }
        }

        if let Some(remaining) = tick_duration.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
}

fn run_with_tui(
    peer: &mut Peer,
    tick_duration: Duration,
    mut outgoing: VecDeque<String>,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut console = ConsoleExecutor::new();
    let mut tui_state = TuiState::new();
    let mut last_state = peer.state();
    let role = peer.role().map_or("peer", |r| r.as_str()).to_string();
    let endpoint = peer
        .config()
        .map(|c| c.endpoint.to_string())
        .unwrap_or_default();

    tui_state.log_info(format!("Started {} for {}", role, endpoint));

    let mut running = true;
    while running {
        let tick_start = Instant::now();

        peer.poll(&mut console);
        for line in console.drain_output() {
            tui_state.log_received(line);
        }
        for event in peer.drain_events() {
            tui_state.log_event(event);
        }

        let state = peer.state();
        if state != last_state {
            let message = format!("{} -> {}", last_state, state);
            if last_state == PeerState::Connected {
                tui_state.log_warn(message);
            } else {
                tui_state.log_info(message);
            }
            last_state = state;
        }

        if peer.is_connected() {
            while let Some(command) = outgoing.pop_front() {
                peer.send(&command);
                tui_state.log_sent(command);
            }
        }

        let timeout = tick_duration.saturating_sub(tick_start.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Esc => running = false,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            running = false;
                        }
                        KeyCode::Enter => {
                            if let Some(command) = tui_state.take_input() {
                                if peer.is_connected() {
                                    peer.send(&command);
                                    tui_state.log_sent(command);
                                } else {
                                    let message = format!("Not connected, dropped {:?}", command);
                                    tui_state.log_warn(message);
                                }
                            }
                        }
                        KeyCode::Backspace => tui_state.backspace(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Char(ch) => tui_state.push_char(ch),
                        _ => {}
                    }
                }
            }
        }

        let view = PeerView {
            role: role.clone(),
            endpoint: endpoint.clone(),
            state: peer.state(),
            remote: peer.remote_addr().map(|addr| addr.to_string()),
            stats: peer.stats(),
        };
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &view);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
