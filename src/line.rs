//! Data model for Process/Line/Connection (spec §3).
//!
//! Process exclusively owns Lines, tables, and the gap list; Connection and
//! Line hold no tables directly. Mutation is confined to the single I/O
//! thread described in spec §5.

use std::time::Instant;

use crate::gap::GapList;
use crate::tables::{OrderTable, SymbolTable};

/// Per-connection statistics (spec §3, supplemented per §11.1 with the
/// original's "late packet" and "sequence wrap" counters).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnStats {
    pub packets: u64,
    pub messages: u64,
    pub bytes: u64,
    pub packet_errors: u64,
    pub message_errors: u64,
    pub duplicate_packets: u64,
    pub gaps: u64,
    pub lost_messages: u64,
    pub recovered_messages: u64,
    /// Supplemented per §11.1 (`fh_adm_stats_resp`'s `line_pkt_late`).
    pub late_packets: u64,
    /// Supplemented per §11.1 (`fh_adm_stats_resp`'s `line_pkt_until_reset`).
    pub packets_until_reset: u64,
    /// Supplemented per §11.1 (`fh_adm_stats_resp`'s `line_pkt_wrap_noreset`).
    pub wraps_without_reset: u64,
}

impl ConnStats {
    pub fn clear(&mut self) {
        *self = ConnStats::default();
    }
}

/// One physical connection belonging to a [`Line`] — primary, secondary, or
/// (TCP venue only) the session/request connection.
pub struct Connection {
    pub tag: &'static str,
    pub last_recv: Option<Instant>,
    pub timestamp_ns: u64,
    pub stats: ConnStats,
    pub enabled: bool,
    pub context: Option<i64>,
}

impl Connection {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            last_recv: None,
            timestamp_ns: 0,
            stats: ConnStats::default(),
            enabled: false,
            context: None,
        }
    }
}

/// A logical feed instance consisting of one or two redundant connections
/// carrying the same sequenced stream, plus (TCP variant) a request/session
/// connection.
pub struct Line {
    pub name: String,
    pub next_seq_no: u64,
    pub timestamp_base: Instant,
    pub primary: Connection,
    pub secondary: Option<Connection>,
    pub request: Option<Connection>,
    pub gap_list: Option<GapList>,
}

impl Line {
    pub fn new(name: impl Into<String>, gap_list: Option<GapList>) -> Self {
        Self {
            name: name.into(),
            next_seq_no: 1,
            timestamp_base: Instant::now(),
            primary: Connection::new("primary"),
            secondary: None,
            request: None,
            gap_list,
            // initialize secondary disabled unless a caller turns it on
        }
    }

    /// Reset to the state immediately after process start: `next_seq_no`
    /// returns to 1 (spec §3 invariant — only explicit session reset may
    /// decrease it: TCP end-of-session or binary end-of-session indicator).
    pub fn reset_session(&mut self) {
        self.next_seq_no = 1;
        self.timestamp_base = Instant::now();
    }
}

/// Process-level aggregate stats (sum of all connections on all lines, plus
/// whatever a consumer wants to track independently).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStats {
    pub packets: u64,
    pub messages: u64,
    pub duplicate_packets: u64,
    pub gaps: u64,
    pub lost_messages: u64,
    pub recovered_messages: u64,
}

/// Process owns everything mutated by the parser as a side effect of
/// decoding a message: the lines, the two lookup tables, and process-level
/// stats. Created at start, destroyed at shutdown.
pub struct Process {
    pub name: String,
    pub lines: Vec<Line>,
    pub symbol_table: SymbolTable,
    pub order_table: OrderTable,
    pub stats: ProcessStats,
    pub context: Option<i64>,
}

impl Process {
    pub fn new(name: impl Into<String>, symbol_capacity: usize, order_capacity: usize) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
            symbol_table: SymbolTable::new(symbol_capacity),
            order_table: OrderTable::new(order_capacity),
            stats: ProcessStats::default(),
            context: None,
        }
    }

    pub fn clear_stats(&mut self) {
        self.stats = ProcessStats::default();
        for line in &mut self.lines {
            line.primary.stats.clear();
            if let Some(secondary) = &mut line.secondary {
                secondary.stats.clear();
            }
            if let Some(request) = &mut line.request {
                request.stats.clear();
            }
        }
    }
}

/// Reported by `get_status()` (spec §4.8), supplemented per §11.2 with the
/// original's service name and numeric state.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub tid: u32,
    pub cpu: Option<u32>,
    pub start_time: Instant,
    pub service: String,
    pub state: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_reset_returns_to_one() {
        let mut line = Line::new("A", None);
        line.next_seq_no = 500;
        line.reset_session();
        assert_eq!(line.next_seq_no, 1);
    }

    #[test]
    fn clear_stats_zeros_every_counter() {
        let mut process = Process::new("proc", 16, 16);
        process.lines.push(Line::new("A", None));
        process.lines[0].primary.stats.packets = 10;
        process.stats.packets = 10;
        process.clear_stats();
        assert_eq!(process.lines[0].primary.stats.packets, 0);
        assert_eq!(process.stats.packets, 0);
    }
}
