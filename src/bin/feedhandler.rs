//! Process entry point: config → [`EngineState`] → reader loop (spec §9's
//! explicit `EngineState` redesign of the reference's global mutable
//! singletons; SPEC_FULL §10.4 CLI, §12 module map).
//!
//! The venue a line speaks is read off its enclosing `<venue>` config block
//! name (spec §6): `pitch`, `moldudp64`, or `ascii_tcp`. Socket and TCP
//! stream handling below is the thin production adapter over this crate's
//! [`feedhandler_core::reader::Socket`]/[`Transport`] capabilities — the
//! UDP/TCP/multicast syscall wrappers are an external collaborator per spec
//! §1, so these adapters stay deliberately minimal.

use std::net::{Ipv4Addr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use feedhandler_core::cli::{exit_code, Cli};
use feedhandler_core::config::{EndpointConfig, LineConfig, RootConfig};
use feedhandler_core::dispatch::Dispatcher;
use feedhandler_core::error::SessionError;
use feedhandler_core::gap::GapList;
use feedhandler_core::line::{Line, Process};
use feedhandler_core::reader::{AsciiTcpSource, EngineState, LineSource, MoldUdp64Source, PitchSource, Socket};
use feedhandler_core::stats::{ActionReq, ExitFlag};
use feedhandler_core::venues::ascii_tcp::{self, LoginCredentials, SessionEngine, Transport};

/// Reference: SPEC_FULL §10.1, the teacher's 5-second metrics report.
const STATS_CADENCE: Duration = Duration::from_secs(5);

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("feedhandler {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(exit_code::OK);
    }

    init_tracing(cli.debug);

    if let Err(err) = run(&cli) {
        tracing::error!(error = %err, "startup failed");
        std::process::exit(exit_code::CONFIG_ERROR);
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let root = RootConfig::load(&cli.config_path)
        .with_context(|| format!("loading config from {}", cli.config_path.display()))?;
    let (venue, process_name, process_cfg) = root
        .resolve_process_any(cli.process.as_deref())
        .context("resolving process block")?;
    let venue_cfg = root
        .venues
        .get(venue)
        .expect("resolve_process_any returned a venue key present in the map");

    tracing::info!(venue, process = process_name, "starting feedhandler process");

    let symbol_capacity = if venue_cfg.symbol_table.enabled {
        venue_cfg.symbol_table.size
    } else {
        0
    };
    let order_capacity = if venue_cfg.order_table.enabled {
        venue_cfg.order_table.size
    } else {
        0
    };
    let mut process = Process::new(process_name, symbol_capacity.max(1), order_capacity.max(1));

    let mut sources: Vec<Box<dyn LineSource>> = Vec::new();
    for line_name in &process_cfg.lines {
        let line_cfg = venue_cfg
            .lines
            .get(line_name)
            .with_context(|| format!("line {line_name:?} not configured for venue {venue:?}"))?;

        let gap_list = if venue_cfg.fill_gaps.max > 0 {
            Some(GapList::new(
                venue_cfg.fill_gaps.max,
                Duration::from_secs(venue_cfg.fill_gaps.timeout_secs),
            ))
        } else {
            None
        };
        process.lines.push(Line::new(line_name.clone(), gap_list));

        let source = build_source(venue, line_cfg)
            .with_context(|| format!("wiring line {line_name:?} for venue {venue:?}"))?;
        sources.push(source);
        tracing::info!(line = %line_name, "line initialized");
    }

    if process.lines.is_empty() {
        bail!("process {process_name:?} has no lines configured");
    }

    let exit_flag = ExitFlag::new();
    // The admin wire protocol that would feed `ActionReq`s into `_action_tx`
    // is an external collaborator (spec §1); kept alive here so the channel
    // stays open for a future wiring instead of disconnecting immediately.
    let (_action_tx, action_rx) = crossbeam_channel::unbounded::<ActionReq>();
    if cli.standalone {
        tracing::info!("standalone mode: skipping the management collaborator connection");
    }

    let mut engine = EngineState::new(process, Dispatcher::default(), exit_flag.clone(), action_rx, STATS_CADENCE);

    let reader_handle = std::thread::Builder::new()
        .name("feedhandler-io".into())
        .spawn(move || engine.run(&mut sources))
        .context("spawning I/O thread")?;

    wait_for_shutdown_signal(&exit_flag)?;
    reader_handle.join().expect("I/O thread panicked");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn wait_for_shutdown_signal(exit_flag: &ExitFlag) -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown signal received");
    exit_flag.set();
    Ok(())
}

fn build_source(venue: &str, line_cfg: &LineConfig) -> Result<Box<dyn LineSource>> {
    match venue {
        "pitch" => {
            let socket = UdpSocketAdapter::bind(&line_cfg.primary)?;
            let secondary = line_cfg
                .secondary
                .as_ref()
                .filter(|e| e.enabled)
                .map(UdpSocketAdapter::bind)
                .transpose()?;
            Ok(Box::new(PitchSource { socket, secondary }))
        }
        "moldudp64" => {
            let socket = UdpSocketAdapter::bind(&line_cfg.primary)?;
            let secondary = line_cfg
                .secondary
                .as_ref()
                .filter(|e| e.enabled)
                .map(UdpSocketAdapter::bind)
                .transpose()?;
            Ok(Box::new(MoldUdp64Source { socket, secondary }))
        }
        "ascii_tcp" => {
            let login = line_cfg
                .login
                .as_ref()
                .context("ascii_tcp line requires a [login] block")?;
            let credentials = LoginCredentials {
                name: pad6(login.name.as_bytes()),
                password: pad10(login.password.as_bytes()),
                session: [b' '; 10],
                start_seq: 1,
            };
            let transport = TcpTransportAdapter::new(line_cfg.primary.clone());
            let engine = SessionEngine::new(transport, credentials);
            Ok(Box::new(AsciiTcpSource::new(engine)))
        }
        other => bail!("unknown venue {other:?}; expected pitch, moldudp64, or ascii_tcp"),
    }
}

fn pad6(bytes: &[u8]) -> [u8; 6] {
    let mut out = [b' '; 6];
    let n = bytes.len().min(6);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn pad10(bytes: &[u8]) -> [u8; 10] {
    let mut out = [b' '; 10];
    let n = bytes.len().min(10);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Thin adapter over `std::net::UdpSocket`: non-blocking recv, multicast
/// join when the configured address is a multicast group.
struct UdpSocketAdapter(UdpSocket);

impl UdpSocketAdapter {
    fn bind(cfg: &EndpointConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.port))
            .with_context(|| format!("binding UDP port {}", cfg.port))?;
        socket.set_nonblocking(true).context("set_nonblocking")?;

        let group: Ipv4Addr = cfg
            .address
            .parse()
            .with_context(|| format!("parsing multicast address {:?}", cfg.address))?;
        if group.is_multicast() {
            let iface = cfg
                .interface
                .as_ref()
                .and_then(|i| i.parse().ok())
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            socket
                .join_multicast_v4(&group, &iface)
                .with_context(|| format!("joining multicast group {group}"))?;
        }
        Ok(Self(socket))
    }
}

impl Socket for UdpSocketAdapter {
    fn try_recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Thin adapter over `std::net::TcpStream` implementing [`Transport`]; reads
/// are non-blocking per spec §5.
struct TcpTransportAdapter {
    endpoint: EndpointConfig,
    stream: Option<TcpStream>,
}

impl TcpTransportAdapter {
    fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }
}

impl Transport for TcpTransportAdapter {
    fn connect(&mut self) -> Result<(), SessionError> {
        let addr = format!("{}:{}", self.endpoint.address, self.endpoint.port)
            .to_socket_addrs()
            .map_err(SessionError::Connect)?
            .next()
            .ok_or_else(|| {
                SessionError::Connect(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "no resolvable address",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&addr, ascii_tcp::CONNECT_TIMEOUT).map_err(SessionError::Connect)?;
        stream.set_nonblocking(true).map_err(SessionError::Connect)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), SessionError> {
        use std::io::Write;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        stream.write_all(buf).map_err(SessionError::Transport)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        use std::io::Read;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(SessionError::Transport(e)),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

fn not_connected() -> SessionError {
    SessionError::Transport(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "transport not connected",
    ))
}
