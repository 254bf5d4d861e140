//! Venue C — ASCII TCP session (spec §4.4 Venue C, §4.6 session engine).
//!
//! Two things live here: the LF-terminated record parser (stateful across
//! reader invocations because the transport is a byte stream, not
//! packet-aligned) and the session state machine that owns login, heartbeat
//! monitoring, and reconnect.
//!
//! Wire shape chosen for the sequenced envelope (spec leaves the inner field
//! widths to the implementation, requiring only "fixed offsets and widths"
//! and §4.1 ASCII decoders):
//!
//! ```text
//! 'S' seq_no(10) type(1) payload... LF
//! ```
//!
//! `type` selects the payload shape:
//! - `'A'` Add:     order_ref(10) side(1) shares(10) stock(8) price(10)
//! - `'E'` Execute: order_ref(10) executed_shares(10)
//! - `'D'` Delete:  order_ref(10)
//!
//! Non-sequenced server lines: `'H'` + LF heartbeat, `'S'` + LF (bare, no
//! trailing digits) end-of-session, `'+'`-prefixed debug lines.

use std::time::{Duration, Instant};

use crate::decode::{ascii_atoi, ascii_price10};
use crate::dispatch::{AlertKind, DecodedRecord, Dispatcher, OrderView, RecordKind, SymbolView};
use crate::error::{ParseError, SessionError};
use crate::line::Line;
use crate::sequence::{self, Classification};
use crate::tables::symbol::pad_symbol;
use crate::tables::{OrderEntry, OrderKey, OrderTable, SymbolTable};

/// Accumulates bytes from successive non-blocking reads and yields whole
/// LF-terminated lines. Lives on the `Connection` (conceptually — owned by
/// whatever drives the reader loop for this line) across invocations.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly-read bytes in; does not parse yet.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop one complete LF-terminated line (LF included) if present.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.drain(..=pos).collect();
        Some(line)
    }

    /// Drop buffered bytes up to and including the next LF, used to
    /// resynchronize after a framing error (spec §7: "the parser scans to
    /// the next LF to resynchronize").
    pub fn resync(&mut self) {
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            self.buf.drain(..=pos);
        } else {
            self.buf.clear();
        }
    }
}

/// Parse one already-extracted LF-terminated line.
pub fn parse_line(
    line: &[u8],
    state: &mut Line,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
    dispatcher: &mut Dispatcher,
    now: Instant,
) -> Result<(), ParseError> {
    let body = line.strip_suffix(b"\n").unwrap_or(line);
    if body.is_empty() {
        return Err(ParseError::InvalidEnvelope("empty line".into()));
    }

    match body[0] {
        b'+' => {
            tracing::trace!(line = %String::from_utf8_lossy(body), "debug line");
            Ok(())
        }
        b'H' => {
            state.primary.last_recv = Some(now);
            Ok(())
        }
        b'S' if body.len() == 1 => {
            dispatcher.alert(AlertKind::SessionTerminated, &state.primary);
            state.reset_session();
            Ok(())
        }
        b'S' => parse_sequenced(body, state, order_table, symbol_table, dispatcher, now),
        other => Err(ParseError::UnknownRecordType(other)),
    }
}

fn parse_sequenced(
    body: &[u8],
    line: &mut Line,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
    dispatcher: &mut Dispatcher,
    now: Instant,
) -> Result<(), ParseError> {
    if body.len() < 12 {
        return Err(ParseError::TruncatedPacket {
            expected: 12,
            actual: body.len(),
        });
    }
    let seq_no = ascii_atoi(&body[1..11]);
    let type_tag = body[11];
    let payload = &body[12..];

    let outcome = sequence::classify(&mut line.next_seq_no, line.gap_list.as_mut(), seq_no, now);
    outcome.apply_to(&mut line.primary.stats);
    for alert in &outcome.alerts {
        dispatcher.alert(*alert, &line.primary);
    }

    if outcome.classification == Some(Classification::Duplicate) {
        return Ok(());
    }

    match decode_payload(type_tag, payload, seq_no, order_table, symbol_table) {
        Ok(decoded) => {
            line.primary.stats.messages += 1;
            dispatcher.emit(&line.primary, &decoded);
            Ok(())
        }
        // `message_errors` is counted once, by the caller (`poll_streaming`),
        // which also resyncs the line reader on any parse error.
        Err(e) => Err(e),
    }
}

fn decode_payload(
    type_tag: u8,
    payload: &[u8],
    seq_no: u64,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
) -> Result<DecodedRecord, ParseError> {
    let mut decoded = DecodedRecord {
        kind: RecordKind::AsciiSequenced,
        seq_no,
        timestamp_ns: 0,
        order: None,
        symbol: None,
        raw_len: payload.len(),
    };

    match type_tag {
        b'A' => {
            if payload.len() < 39 {
                return Err(ParseError::InvalidRecordLength {
                    msg_type: type_tag,
                    expected: 39,
                    actual: payload.len(),
                });
            }
            let order_ref = ascii_atoi(&payload[0..10]);
            let side = payload[10];
            let shares = ascii_atoi(&payload[11..21]) as u32;
            // wire stock field is 8 bytes wide; only the first 6 are kept
            let mut stock = [b' '; 6];
            stock.copy_from_slice(&payload[21..27]);
            let price = ascii_price10(&payload[29..39])?;
            let mut entry = OrderEntry::new(OrderKey::Numeric(order_ref), shares, price, side, stock);
            let sym = symbol_table.get_or_insert(pad_symbol(&stock));
            entry.sym_key = Some(sym.key);
            decoded.symbol = Some(SymbolView::from(&*sym));
            match order_table.insert(entry) {
                Ok(inserted) => decoded.order = Some(OrderView::from(&*inserted)),
                Err(e) => tracing::warn!(order_ref, error = %e, "add order: table insert failed"),
            }
        }
        b'E' => {
            if payload.len() < 20 {
                return Err(ParseError::InvalidRecordLength {
                    msg_type: type_tag,
                    expected: 20,
                    actual: payload.len(),
                });
            }
            let order_ref = ascii_atoi(&payload[0..10]);
            let executed_shares = ascii_atoi(&payload[10..20]) as u32;
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_ref)) {
                entry.shares = entry.shares.saturating_sub(executed_shares);
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_ref, "order executed: no resting order");
            }
        }
        b'D' => {
            if payload.len() < 10 {
                return Err(ParseError::InvalidRecordLength {
                    msg_type: type_tag,
                    expected: 10,
                    actual: payload.len(),
                });
            }
            let order_ref = ascii_atoi(&payload[0..10]);
            if let Some(entry) = order_table.delete(&OrderKey::Numeric(order_ref)) {
                decoded.order = Some(OrderView::from(&entry));
            } else {
                tracing::warn!(order_ref, "order delete: no resting order");
            }
        }
        other => return Err(ParseError::UnknownRecordType(other)),
    }

    Ok(decoded)
}

/// TCP session state machine (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggingIn,
    Streaming,
    Reconnecting,
    EndOfSession,
}

/// Minimal transport abstraction so the state machine is testable without a
/// real socket. A production wiring implements this over `std::net::TcpStream`
/// with `set_nonblocking(true)` (spec §5: reads are non-blocking or use a
/// short poll timeout).
pub trait Transport {
    fn connect(&mut self) -> Result<(), SessionError>;
    fn send(&mut self, buf: &[u8]) -> Result<(), SessionError>;
    /// Non-blocking receive; `Ok(0)` means no data currently available.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SessionError>;
    fn close(&mut self);
}

pub struct LoginCredentials {
    pub name: [u8; 6],
    pub password: [u8; 10],
    pub session: [u8; 10],
    pub start_seq: u64,
}

impl LoginCredentials {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.password);
        out.extend_from_slice(&self.session);
        let seq_field = format!("{:>10}", self.start_seq);
        out.extend_from_slice(seq_field.as_bytes());
        out
    }
}

const HEARTBEAT_MISS_INIT: u8 = 10;
const CLIENT_HEARTBEAT: &[u8] = b"R\n";

/// Drives one TCP line through connect/login/stream/reconnect. `now` is
/// supplied by the caller (the reader loop) rather than read internally so
/// transitions stay deterministic and testable.
pub struct SessionEngine<T: Transport> {
    pub state: SessionState,
    transport: T,
    credentials: LoginCredentials,
    heartbeat_countdown: u8,
    last_tick: Option<Instant>,
    reader: LineReader,
    first_break_logged: bool,
    /// Session id and starting sequence extracted from the most recent
    /// accepted login, for the caller to apply to its `Line`.
    pub accepted_session: Option<[u8; 10]>,
    pub accepted_start_seq: Option<u64>,
}

impl<T: Transport> SessionEngine<T> {
    pub fn new(transport: T, credentials: LoginCredentials) -> Self {
        Self {
            state: SessionState::Disconnected,
            transport,
            credentials,
            heartbeat_countdown: HEARTBEAT_MISS_INIT,
            last_tick: None,
            reader: LineReader::new(),
            first_break_logged: false,
            accepted_session: None,
            accepted_start_seq: None,
        }
    }

    /// Attempt the connect → login handshake. Call repeatedly from
    /// `Disconnected`/`Reconnecting` until it reaches `Streaming` or the
    /// caller observes the exit flag.
    pub fn connect_and_login(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Connecting;
        self.transport.connect()?;
        self.state = SessionState::LoggingIn;
        self.transport.send(&self.credentials.encode())?;

        let mut buf = [0u8; 64];
        let n = self.transport.recv(&mut buf)?;
        if n == 0 {
            return Err(SessionError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no login response",
            )));
        }
        match buf[0] {
            b'A' => {
                if n >= 21 {
                    let mut session = [0u8; 10];
                    session.copy_from_slice(&buf[1..11]);
                    self.accepted_session = Some(session);
                    self.accepted_start_seq = Some(ascii_atoi(&buf[11..21]));
                }
                self.state = SessionState::Streaming;
                self.heartbeat_countdown = HEARTBEAT_MISS_INIT;
                self.last_tick = None;
                Ok(())
            }
            b'J' => {
                let reason = match buf.get(1) {
                    Some(b'A') => "Not Authorized",
                    Some(b'S') => "Invalid Session",
                    _ => "Unknown",
                };
                self.state = SessionState::Disconnected;
                Err(SessionError::LoginRejected {
                    reason: if reason == "Not Authorized" {
                        "Not Authorized"
                    } else {
                        "Invalid Session"
                    },
                })
            }
            other => Err(SessionError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected login response byte {other:#04x}"),
            ))),
        }
    }

    /// One reader-loop iteration while `Streaming`: drains available bytes,
    /// parses whole lines, advances the heartbeat countdown, and sends a
    /// client heartbeat if a full second elapsed with no inbound traffic.
    pub fn poll_streaming(
        &mut self,
        line: &mut Line,
        order_table: &mut OrderTable,
        symbol_table: &mut SymbolTable,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> Result<(), SessionError> {
        debug_assert_eq!(self.state, SessionState::Streaming);

        let mut buf = [0u8; 4096];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.reader.feed(&buf[..n]);
                    self.heartbeat_countdown = HEARTBEAT_MISS_INIT;
                    line.primary.last_recv = Some(now);
                }
                Err(e) => {
                    self.state = SessionState::Reconnecting;
                    return Err(e);
                }
            }
        }

        while let Some(raw) = self.reader.next_line() {
            if let Err(_e) = parse_line(&raw, line, order_table, symbol_table, dispatcher, now) {
                line.primary.stats.message_errors += 1;
                self.reader.resync();
            }
            if self.state != SessionState::Streaming {
                return Ok(());
            }
        }

        // `None` means no tick has ever fired on this stream: treat it as due
        // immediately rather than `unwrap_or(0)`, which would make the very
        // first idle second never arm the countdown.
        let due = self
            .last_tick
            .map(|t| now.duration_since(t).as_secs() >= 1)
            .unwrap_or(true);
        if due {
            self.last_tick = Some(now);
            if self.heartbeat_countdown == 0 {
                dispatcher.alert(AlertKind::ServerHeartbeatMissing, &line.primary);
                self.heartbeat_countdown = HEARTBEAT_MISS_INIT;
            } else {
                self.heartbeat_countdown -= 1;
            }
            self.transport
                .send(CLIENT_HEARTBEAT)
                .map_err(|_| SessionError::HeartbeatMissing)?;
        }
        Ok(())
    }

    /// Transition into reconnect, emitting `TCP_CONNECTION_BROKEN` on the
    /// first attempt (spec §4.6).
    pub fn begin_reconnect(&mut self, connection: &crate::line::Connection, dispatcher: &mut Dispatcher) {
        self.transport.close();
        self.state = SessionState::Reconnecting;
        if !self.first_break_logged {
            dispatcher.alert(AlertKind::TcpConnectionBroken, connection);
            self.first_break_logged = true;
        }
    }

    pub fn reconnected(&mut self, connection: &crate::line::Connection, dispatcher: &mut Dispatcher) {
        self.first_break_logged = false;
        dispatcher.alert(AlertKind::TcpConnectionEstablished, connection);
    }
}

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECONNECT_SLEEP: Duration = Duration::from_secs(3);
