//! Cooperative single-threaded reader loop.
//!
//! Per process there is one thread running this loop: it flushes expired
//! gap ranges, polls every enabled socket with a short wake-up interval,
//! hands whatever arrived to the matching venue parser, and invokes the
//! publish-flush hook once per connection that emitted a record this
//! iteration. Actual socket I/O — the UDP/TCP/multicast syscall wrappers —
//! is a collaborator owned by the binary crate; this module only needs the
//! [`Socket`] capability to poll one of them non-blockingly.

use std::time::{Duration, Instant};

use crate::dispatch::{AlertKind, Dispatcher};
use crate::error::SessionError;
use crate::line::{Line, Process};
use crate::stats::{ActionReq, ExitFlag, StatsSnapshot};
use crate::tables::{OrderTable, SymbolTable};
use crate::venues::ascii_tcp::{self, SessionEngine, SessionState, Transport};
use crate::venues::{moldudp64, pitch};

/// Short wake-up interval between loop iterations when nothing is ready.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Non-blocking read capability for one socket. `Ok(0)` means nothing was
/// ready this call, matching `Transport::recv`'s convention.
pub trait Socket {
    fn try_recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Drives one [`Line`]'s socket(s) for a single venue. Implementations own
/// the socket handles; the `Line` itself stays inside `Process.lines`, owned
/// exclusively by the process, so every method borrows it rather than
/// owning a copy.
pub trait LineSource {
    /// Poll once. Returns `true` if at least one record was emitted to the
    /// dispatcher this call.
    fn poll(
        &mut self,
        line: &mut Line,
        order_table: &mut OrderTable,
        symbol_table: &mut SymbolTable,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> bool;
}

/// Venue A — PITCH-like binary, one datagram per `try_recv`.
pub struct PitchSource<S: Socket> {
    pub socket: S,
    pub secondary: Option<S>,
}

impl<S: Socket> LineSource for PitchSource<S> {
    fn poll(
        &mut self,
        line: &mut Line,
        order_table: &mut OrderTable,
        symbol_table: &mut SymbolTable,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> bool {
        let mut emitted = false;
        let mut buf = [0u8; 2048];
        if let Ok(n) = self.socket.try_recv(&mut buf) {
            if n > 0 {
                emitted |= apply_pitch(&buf[..n], line, order_table, symbol_table, dispatcher, now);
            }
        }
        if let Some(secondary) = &mut self.secondary {
            if let Ok(n) = secondary.try_recv(&mut buf) {
                if n > 0 {
                    emitted |= apply_pitch(&buf[..n], line, order_table, symbol_table, dispatcher, now);
                }
            }
        }
        emitted
    }
}

fn apply_pitch(
    packet: &[u8],
    line: &mut Line,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
    dispatcher: &mut Dispatcher,
    now: Instant,
) -> bool {
    match pitch::parse_packet(packet, line, order_table, symbol_table, dispatcher, now) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(line = %line.name, error = %e, "PITCH packet rejected");
            line.primary.stats.packet_errors += 1;
            false
        }
    }
}

/// Venue B — MoldUDP64-framed binary, one datagram per `try_recv`.
pub struct MoldUdp64Source<S: Socket> {
    pub socket: S,
    pub secondary: Option<S>,
}

impl<S: Socket> LineSource for MoldUdp64Source<S> {
    fn poll(
        &mut self,
        line: &mut Line,
        order_table: &mut OrderTable,
        symbol_table: &mut SymbolTable,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> bool {
        let mut emitted = false;
        let mut buf = [0u8; 4096];
        if let Ok(n) = self.socket.try_recv(&mut buf) {
            if n > 0 {
                emitted |= apply_mold(&buf[..n], line, order_table, symbol_table, dispatcher, now);
            }
        }
        if let Some(secondary) = &mut self.secondary {
            if let Ok(n) = secondary.try_recv(&mut buf) {
                if n > 0 {
                    emitted |= apply_mold(&buf[..n], line, order_table, symbol_table, dispatcher, now);
                }
            }
        }
        emitted
    }
}

fn apply_mold(
    packet: &[u8],
    line: &mut Line,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
    dispatcher: &mut Dispatcher,
    now: Instant,
) -> bool {
    match moldudp64::parse_packet(packet, line, order_table, symbol_table, dispatcher, now) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(line = %line.name, error = %e, "MoldUDP64 packet rejected");
            line.primary.stats.packet_errors += 1;
            false
        }
    }
}

/// Venue C — ASCII TCP session: connect/login/stream/reconnect driven
/// entirely from `poll`, never blocking the loop.
pub struct AsciiTcpSource<T: Transport> {
    pub engine: SessionEngine<T>,
    next_attempt: Option<Instant>,
}

impl<T: Transport> AsciiTcpSource<T> {
    pub fn new(engine: SessionEngine<T>) -> Self {
        Self {
            engine,
            next_attempt: None,
        }
    }
}

impl<T: Transport> LineSource for AsciiTcpSource<T> {
    fn poll(
        &mut self,
        line: &mut Line,
        order_table: &mut OrderTable,
        symbol_table: &mut SymbolTable,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> bool {
        match self.engine.state {
            SessionState::Disconnected | SessionState::Reconnecting => {
                if self.next_attempt.map_or(true, |t| now >= t) {
                    self.attempt_connect(line, dispatcher, now);
                }
                false
            }
            SessionState::Streaming => match self
                .engine
                .poll_streaming(line, order_table, symbol_table, dispatcher, now)
            {
                Ok(()) => true,
                Err(err) => {
                    self.handle_transport_error(err, line, dispatcher, now);
                    false
                }
            },
            SessionState::EndOfSession => {
                self.engine.state = SessionState::Disconnected;
                false
            }
            SessionState::Connecting | SessionState::LoggingIn => false,
        }
    }
}

impl<T: Transport> AsciiTcpSource<T> {
    fn attempt_connect(&mut self, line: &mut Line, dispatcher: &mut Dispatcher, now: Instant) {
        match self.engine.connect_and_login() {
            Ok(()) => {
                if let Some(seq) = self.engine.accepted_start_seq {
                    line.next_seq_no = seq;
                }
                self.engine.reconnected(&line.primary, dispatcher);
                self.next_attempt = None;
            }
            Err(err) => {
                tracing::warn!(line = %line.name, error = %err, "TCP connect/login failed");
                self.engine.begin_reconnect(&line.primary, dispatcher);
                self.next_attempt = Some(now + ascii_tcp::RECONNECT_SLEEP);
            }
        }
    }

    fn handle_transport_error(
        &mut self,
        err: SessionError,
        line: &mut Line,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) {
        tracing::warn!(line = %line.name, error = %err, "TCP transport error, reconnecting");
        self.engine.begin_reconnect(&line.primary, dispatcher);
        self.next_attempt = Some(now + ascii_tcp::RECONNECT_SLEEP);
    }
}

/// Owns the process-level state mutated by the loop: lines, tables, the
/// dispatcher, the exit flag, and the cadence for periodic stats snapshots.
/// Per-line sockets live in the caller-supplied `Vec<Box<dyn LineSource>>`
/// handed to [`EngineState::run_iteration`] rather than inside this struct,
/// since venue wiring is process-specific.
pub struct EngineState {
    pub process: Process,
    pub dispatcher: Dispatcher,
    pub exit_flag: ExitFlag,
    pub actions: crossbeam_channel::Receiver<ActionReq>,
    pub stats_cadence: Duration,
    last_stats_at: Option<Instant>,
    last_snapshot: Option<StatsSnapshot>,
}

impl EngineState {
    pub fn new(
        process: Process,
        dispatcher: Dispatcher,
        exit_flag: ExitFlag,
        actions: crossbeam_channel::Receiver<ActionReq>,
        stats_cadence: Duration,
    ) -> Self {
        Self {
            process,
            dispatcher,
            exit_flag,
            actions,
            stats_cadence,
            last_stats_at: None,
            last_snapshot: None,
        }
    }

    /// Run until the exit flag is observed, sleeping `WAKE_INTERVAL` between
    /// iterations when nothing was ready (spec §5: the exit flag is checked
    /// every wake-up, bounded by `WAKE_INTERVAL`).
    pub fn run(&mut self, sources: &mut [Box<dyn LineSource>]) {
        self.dispatcher.lh_init();
        while !self.exit_flag.is_set() {
            let now = Instant::now();
            self.drain_actions();
            self.flush_gaps(now);
            let any_emitted = self.run_iteration(sources, now);
            self.maybe_snapshot_stats(now);
            if !any_emitted {
                std::thread::sleep(WAKE_INTERVAL);
            }
        }
    }

    /// One pass over every line's source. Returns whether anything was
    /// emitted this pass, purely so [`Self::run`] can decide whether to
    /// sleep the full wake interval.
    pub fn run_iteration(&mut self, sources: &mut [Box<dyn LineSource>], now: Instant) -> bool {
        let mut any_emitted = false;
        for (line, source) in self.process.lines.iter_mut().zip(sources.iter_mut()) {
            let emitted = source.poll(
                line,
                &mut self.process.order_table,
                &mut self.process.symbol_table,
                &mut self.dispatcher,
                now,
            );
            if emitted {
                any_emitted = true;
                self.process.stats.messages += 1;
                self.dispatcher.flush(&line.primary);
            }
        }
        any_emitted
    }

    /// Spec §4.7 step 1: expire gap ranges whose deadline has passed,
    /// accounting the remaining count as loss and alerting.
    fn flush_gaps(&mut self, now: Instant) {
        for line in &mut self.process.lines {
            let Some(gap_list) = &mut line.gap_list else {
                continue;
            };
            let loss = gap_list.flush(now);
            if loss > 0 {
                line.primary.stats.lost_messages += loss;
                self.process.stats.lost_messages += loss;
                self.dispatcher.alert(AlertKind::Loss, &line.primary);
            }
        }
    }

    fn drain_actions(&mut self) {
        while let Ok(action) = self.actions.try_recv() {
            match action {
                ActionReq::ClearStats => crate::stats::clear_stats(&mut self.process),
                ActionReq::Stop => self.exit_flag.set(),
            }
        }
    }

    fn maybe_snapshot_stats(&mut self, now: Instant) {
        let due = self
            .last_stats_at
            .map_or(true, |t| now.duration_since(t) >= self.stats_cadence);
        if due {
            self.last_snapshot = Some(crate::stats::snap_stats(
                &self.process,
                self.last_snapshot.as_ref(),
            ));
            self.last_stats_at = Some(now);
        }
    }
}
