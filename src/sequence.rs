//! Per-line sequence/gap/duplicate engine (spec §4.5).
//!
//! Classifies an incoming sequence number against `line.next_seq_no`,
//! consults the line's `GapList` when the incoming sequence is behind, and
//! reports the alert the caller should raise through the [`Dispatcher`].
//! Venue parsers drive this once per packet (Venue A) or once per record
//! (Venues B and C) and then apply their own table side effects; this module
//! owns only the counting/classification, not the decoding.

use std::time::Instant;

use crate::dispatch::AlertKind;
use crate::gap::{DeleteResult, GapList};
use crate::line::ConnStats;

/// What the caller should do with the record that carried `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Process the record; it is the next expected sequence.
    InOrder,
    /// Process the record; it fills a previously recorded gap.
    GapFill,
    /// Discard the record; it has already been seen and is not a known gap.
    Duplicate,
    /// Process the record; it opens (or extends past) a forward gap. The
    /// caller must still process the record that carried `seq` itself.
    ForwardGap,
}

/// One classification outcome, bundling the verdict with the alerts to raise
/// and the stats fields to update. The caller (a venue parser) applies this
/// against its `Connection`'s stats and emits the alerts via the dispatcher;
/// this module does not reach into `Connection` or `Dispatcher` directly so
/// it stays testable without constructing either.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub classification: Option<Classification>,
    pub alerts: Vec<AlertKind>,
    pub gaps_delta: u64,
    pub duplicate_packets_delta: u64,
    pub lost_messages_delta: u64,
    pub recovered_messages_delta: u64,
}

impl Outcome {
    fn new(classification: Classification) -> Self {
        Self {
            classification: Some(classification),
            ..Default::default()
        }
    }

    /// Fold this outcome's deltas into a connection's running stats.
    pub fn apply_to(&self, stats: &mut ConnStats) {
        stats.gaps += self.gaps_delta;
        stats.duplicate_packets += self.duplicate_packets_delta;
        stats.lost_messages += self.lost_messages_delta;
        stats.recovered_messages += self.recovered_messages_delta;
    }
}

/// Classify `seq` against `next_seq_no`, consulting `gap_list` as needed, and
/// advance `next_seq_no` in place per spec §4.5. Returns the outcome the
/// caller folds into connection stats and dispatches as alerts.
pub fn classify(
    next_seq_no: &mut u64,
    gap_list: Option<&mut GapList>,
    seq: u64,
    now: Instant,
) -> Outcome {
    let expected = *next_seq_no;

    if seq == expected {
        *next_seq_no += 1;
        return Outcome::new(Classification::InOrder);
    }

    if seq < expected {
        return classify_behind(gap_list, seq);
    }

    // seq > expected: forward gap.
    let gap_size = seq - expected;
    let mut outcome = Outcome::new(Classification::ForwardGap);
    outcome.gaps_delta = 1;
    outcome.alerts.push(AlertKind::Gap);

    match gap_list {
        Some(list) => {
            let push_result = list.push(expected, gap_size, now);
            if push_result.loss > 0 {
                outcome.lost_messages_delta += push_result.loss;
                outcome.alerts.push(AlertKind::Loss);
            }
        }
        None => {
            outcome.lost_messages_delta += gap_size;
            outcome.alerts.push(AlertKind::Loss);
        }
    }

    *next_seq_no = seq + 1;
    outcome
}

fn classify_behind(gap_list: Option<&mut GapList>, seq: u64) -> Outcome {
    let Some(list) = gap_list else {
        let mut outcome = Outcome::new(Classification::Duplicate);
        outcome.duplicate_packets_delta = 1;
        return outcome;
    };

    match list.find(seq) {
        Some(index) => {
            let mut outcome = Outcome::new(Classification::GapFill);
            match list.delete_from(index, seq) {
                DeleteResult::Filled { loss } => {
                    outcome.recovered_messages_delta = 1;
                    if loss > 0 {
                        outcome.lost_messages_delta = loss;
                    }
                    if list.is_empty() {
                        outcome.alerts.push(AlertKind::NoGap);
                    }
                }
                DeleteResult::Shrunk { loss } => {
                    outcome.recovered_messages_delta = 1;
                    if loss > 0 {
                        outcome.lost_messages_delta = loss;
                    }
                }
                DeleteResult::Error => {
                    // Shouldn't happen: `find` just reported a hit at this
                    // index. Treat defensively as a duplicate.
                    outcome.classification = Some(Classification::Duplicate);
                    outcome.duplicate_packets_delta = 1;
                }
            }
            outcome
        }
        None => {
            let mut outcome = Outcome::new(Classification::Duplicate);
            outcome.duplicate_packets_delta = 1;
            outcome
        }
    }
}

/// Advance `next_seq_no` for a heartbeat carrying `seq`, per spec §4.5:
/// heartbeats move `next_seq_no` forward only, never backward.
pub fn apply_heartbeat(next_seq_no: &mut u64, seq: u64) {
    if seq > *next_seq_no {
        *next_seq_no = seq;
    }
}
