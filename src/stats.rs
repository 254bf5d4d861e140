//! Stats & control surface (spec §4.8) and the management-collaborator wire
//! shapes it serves (spec §6 "Management surface").
//!
//! Per spec §5, counters are written only by the I/O thread and read by the
//! management thread; readers tolerate brief inconsistency (no atomics
//! beyond per-counter integer width are required). `clear_stats`/`exit`
//! requests are modeled as an `ActionReq` the I/O thread drains on its next
//! wake-up rather than as direct cross-thread mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::line::{ConnStats, Process, ProcessInfo};

/// Single monotonic flag visible to the I/O thread and the management
/// thread (spec §5 "The exit flag is a single monotonic boolean").
#[derive(Clone, Default)]
pub struct ExitFlag(Arc<AtomicBool>);

impl ExitFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnStatsSnapshot {
    pub tag: String,
    pub packets: u64,
    pub messages: u64,
    pub bytes: u64,
    pub packet_errors: u64,
    pub message_errors: u64,
    pub duplicate_packets: u64,
    pub gaps: u64,
    pub lost_messages: u64,
    pub recovered_messages: u64,
    pub late_packets: u64,
    pub packets_until_reset: u64,
    pub wraps_without_reset: u64,
}

impl ConnStatsSnapshot {
    fn from_stats(tag: &str, stats: &ConnStats) -> Self {
        Self {
            tag: tag.to_string(),
            packets: stats.packets,
            messages: stats.messages,
            bytes: stats.bytes,
            packet_errors: stats.packet_errors,
            message_errors: stats.message_errors,
            duplicate_packets: stats.duplicate_packets,
            gaps: stats.gaps,
            lost_messages: stats.lost_messages,
            recovered_messages: stats.recovered_messages,
            late_packets: stats.late_packets,
            packets_until_reset: stats.packets_until_reset,
            wraps_without_reset: stats.wraps_without_reset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineStatsSnapshot {
    pub name: String,
    pub next_seq_no: u64,
    pub connections: Vec<ConnStatsSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub process: String,
    pub lines: Vec<LineStatsSnapshot>,
    /// Wall-clock time the snapshot was taken, for the management
    /// collaborator's display; counters themselves are all monotonic.
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// `get_stats()` (spec §4.8): an atomic-enough per-connection read.
pub fn get_stats(process: &Process) -> StatsSnapshot {
    let lines = process
        .lines
        .iter()
        .map(|line| {
            let mut connections = vec![ConnStatsSnapshot::from_stats("primary", &line.primary.stats)];
            if let Some(secondary) = &line.secondary {
                connections.push(ConnStatsSnapshot::from_stats("secondary", &secondary.stats));
            }
            if let Some(request) = &line.request {
                connections.push(ConnStatsSnapshot::from_stats("request", &request.stats));
            }
            LineStatsSnapshot {
                name: line.name.clone(),
                next_seq_no: line.next_seq_no,
                connections,
            }
        })
        .collect();
    StatsSnapshot {
        process: process.name.clone(),
        lines,
        generated_at: chrono::Utc::now(),
    }
}

/// `clear_stats()` (spec §4.8): zeros every counter. Must be called from the
/// I/O thread (or queued as an `ActionReq::ClearStats` and drained there).
pub fn clear_stats(process: &mut Process) {
    process.clear_stats();
}

/// `snap_stats()` (spec §4.8): logs deltas since the previous call at the
/// configured cadence. `previous` is the snapshot from the last call; the
/// caller is responsible for cadence (the reader loop's periodic wake-up).
pub fn snap_stats(process: &Process, previous: Option<&StatsSnapshot>) -> StatsSnapshot {
    let current = get_stats(process);
    if let Some(prev) = previous {
        for (now_line, prev_line) in current.lines.iter().zip(prev.lines.iter()) {
            for (now_conn, prev_conn) in now_line.connections.iter().zip(prev_line.connections.iter()) {
                tracing::info!(
                    line = %now_line.name,
                    conn = %now_conn.tag,
                    delta_messages = now_conn.messages.saturating_sub(prev_conn.messages),
                    delta_gaps = now_conn.gaps.saturating_sub(prev_conn.gaps),
                    delta_lost = now_conn.lost_messages.saturating_sub(prev_conn.lost_messages),
                    "stats snapshot"
                );
            }
        }
    }
    current
}

/// `get_status()` (spec §4.8), extended per SPEC_FULL §11.2 with service
/// name and numeric state.
pub fn get_status(process: &Process, pid: u32, tid: u32, start_time: Instant) -> ProcessInfo {
    ProcessInfo {
        pid,
        tid,
        cpu: None,
        start_time,
        service: process.name.clone(),
        state: 0,
    }
}

/// Typed requests accepted from the management collaborator (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManagementRequest {
    Stats,
    Status,
    Version,
    Action(ActionReq),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ActionReq {
    ClearStats,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManagementResponse {
    Stats(StatsSnapshot),
    Status {
        pid: u32,
        tid: u32,
        cpu: Option<u32>,
        uptime_secs: u64,
    },
    Version { version: String },
    Ack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Line;

    #[test]
    fn get_stats_reflects_line_counters() {
        let mut process = Process::new("proc", 16, 16);
        process.lines.push(Line::new("A", None));
        process.lines[0].primary.stats.messages = 7;
        let snapshot = get_stats(&process);
        assert_eq!(snapshot.lines[0].connections[0].messages, 7);
    }

    #[test]
    fn clear_stats_is_visible_in_next_snapshot() {
        let mut process = Process::new("proc", 16, 16);
        process.lines.push(Line::new("A", None));
        process.lines[0].primary.stats.messages = 7;
        clear_stats(&mut process);
        let snapshot = get_stats(&process);
        assert_eq!(snapshot.lines[0].connections[0].messages, 0);
    }

    #[test]
    fn exit_flag_is_observed_after_set() {
        let flag = ExitFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }
}
