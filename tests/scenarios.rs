//! End-to-end scenarios S1-S8 from spec.md §8, driven against the public
//! `parse_packet`/`parse_line`/`SessionEngine` entry points with literal
//! byte buffers, one test per scenario (SPEC_FULL §10.5).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use feedhandler_core::dispatch::{
    AlertKind, DecodedRecord, Dispatcher, HookAction, RecordKind, Sink,
};
use feedhandler_core::gap::GapList;
use feedhandler_core::line::{Connection, Line};
use feedhandler_core::tables::{OrderKey, OrderTable, SymbolTable};
use feedhandler_core::venues::ascii_tcp::{
    LoginCredentials, SessionEngine, SessionState, Transport,
};
use feedhandler_core::venues::moldudp64;

/// Records every alert and every emitted record, and counts flush calls, so
/// each scenario can assert on dispatcher traffic without a bespoke `Sink`.
#[derive(Default)]
struct RecordingSink {
    records: Vec<DecodedRecord>,
    alerts: Vec<AlertKind>,
    flushes: u32,
}

impl Sink for RecordingSink {
    fn on_msg_send(&mut self, _conn: &Connection, record: &DecodedRecord) -> HookAction {
        self.records.push(record.clone());
        HookAction::Continue
    }
    fn on_alert(&mut self, alert: AlertKind, _conn: &Connection) {
        self.alerts.push(alert);
    }
    fn on_msg_flush(&mut self, _conn: &Connection) -> HookAction {
        self.flushes += 1;
        HookAction::Continue
    }
}

fn moldudp64_header(seq: u64, msg_count: u16) -> Vec<u8> {
    let mut pkt = Vec::new();
    pkt.extend_from_slice(b"SESSION001"); // 10-byte session id, space-padded to width
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&msg_count.to_be_bytes());
    pkt
}

/// Zero-padded right-justified ASCII decimal, `width` bytes wide — the ISE
/// ITCH wire encoding for order numbers, share counts, and match numbers.
fn ascii_field(value: u64, width: usize) -> Vec<u8> {
    format!("{value:0width$}").into_bytes()
}

/// 10-byte ISE price field: 6 whole digits, 4 fractional, from a value in
/// units of 1e-4 (spec §8 S1's literal `"0000100 0000"`-shaped bytes).
fn price_field(value: u64) -> Vec<u8> {
    let mut out = ascii_field(value / 10_000, 6);
    out.extend_from_slice(&ascii_field(value % 10_000, 4));
    out
}

fn mold_add_order(order_ref: u64, stock: &[u8; 6], shares: u32, price: u32) -> Vec<u8> {
    let mut record = Vec::new();
    record.push(b'A');
    record.extend_from_slice(&ascii_field(order_ref, 12)); // @1 w12
    record.push(b'B'); // @13
    record.extend_from_slice(&ascii_field(u64::from(shares), 6)); // @14 w6
    record.extend_from_slice(stock); // @20 w6
    record.extend_from_slice(&price_field(u64::from(price))); // @26 w10
    assert_eq!(record.len(), 36);
    record
}

/// `OrderExecutedAtPrice` ('C'): `decode_record`'s arm reads `order_no`@1 w12,
/// `shares`@13 w6, `match_no`@19 w12, `printable`@31, `exe_price`@32 w10, all
/// ASCII. `remaining` is computed as `entry.shares - executed_shares`, not
/// decoded from the wire, so `executed_shares` alone drives the zero-shares
/// case.
fn mold_exec_at_price(order_ref: u64, executed_shares: u32, price: u32) -> Vec<u8> {
    let mut record = Vec::new();
    record.push(b'C');
    record.extend_from_slice(&ascii_field(order_ref, 12)); // @1 w12
    record.extend_from_slice(&ascii_field(u64::from(executed_shares), 6)); // @13 w6
    record.extend_from_slice(&ascii_field(0, 12)); // @19 w12, match_no (unused)
    record.push(b'Y'); // @31, printable
    record.extend_from_slice(&price_field(u64::from(price))); // @32 w10
    assert_eq!(record.len(), 42);
    record
}

fn mold_record_with_len(record: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(record.len() as u16).to_be_bytes());
    out.extend_from_slice(&record);
    out
}

/// Scenario S1: in-order happy path (Venue B). Single datagram, seq=1,
/// msg_count=2, two AddOrder records for order-nos 100 and 101 on "MSFT  ".
#[test]
fn s1_in_order_happy_path() {
    let mut line = Line::new("LINE_B", None);
    let mut orders = OrderTable::new(16);
    let mut symbols = SymbolTable::new(16);
    let mut dispatcher = Dispatcher::new(Box::new(RecordingSink::default()));
    let now = Instant::now();

    let stock = *b"MSFT  ";
    let rec1 = mold_record_with_len(mold_add_order(100, &stock, 100, 1_000_000));
    let rec2 = mold_record_with_len(mold_add_order(101, &stock, 100, 1_000_000));

    let mut pkt = moldudp64_header(1, 2);
    pkt.extend_from_slice(&rec1);
    pkt.extend_from_slice(&rec2);

    moldudp64::parse_packet(&pkt, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();

    assert_eq!(line.next_seq_no, 3);
    assert!(orders.get(&OrderKey::Numeric(100)).is_some());
    assert!(orders.get(&OrderKey::Numeric(101)).is_some());
    assert_eq!(line.primary.stats.gaps, 0);
    assert_eq!(line.primary.stats.lost_messages, 0);
    assert_eq!(line.primary.stats.duplicate_packets, 0);
}

/// Scenario S2: replaying S1's packet immediately is a pure duplicate.
#[test]
fn s2_duplicate_packet() {
    let mut line = Line::new("LINE_B", None);
    let mut orders = OrderTable::new(16);
    let mut symbols = SymbolTable::new(16);
    let mut dispatcher = Dispatcher::default();
    let now = Instant::now();

    let stock = *b"MSFT  ";
    let rec1 = mold_record_with_len(mold_add_order(100, &stock, 100, 1_000_000));
    let rec2 = mold_record_with_len(mold_add_order(101, &stock, 100, 1_000_000));
    let mut pkt = moldudp64_header(1, 2);
    pkt.extend_from_slice(&rec1);
    pkt.extend_from_slice(&rec2);

    moldudp64::parse_packet(&pkt, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();
    assert_eq!(line.next_seq_no, 3);

    // Replay the identical packet.
    moldudp64::parse_packet(&pkt, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();

    assert_eq!(line.next_seq_no, 3, "duplicate must not advance the sequence");
    assert_eq!(line.primary.stats.duplicate_packets, 2); // both records in the replay
    assert_eq!(orders.len(), 2, "no re-insertion from the duplicate replay");
}

/// Scenario S3: forward gap of 2, then a later datagram fills both missing
/// sequences naturally.
#[test]
fn s3_forward_gap_then_natural_fill() {
    let mut line = Line::new("LINE_B", Some(GapList::new(8, Duration::from_secs(30))));
    let mut orders = OrderTable::new(16);
    let mut symbols = SymbolTable::new(16);
    let mut dispatcher = Dispatcher::new(Box::new(RecordingSink::default()));
    let now = Instant::now();
    let stock = *b"MSFT  ";

    // seq=1 in order.
    let mut pkt1 = moldudp64_header(1, 1);
    pkt1.extend_from_slice(&mold_record_with_len(mold_add_order(1, &stock, 10, 100_000)));
    moldudp64::parse_packet(&pkt1, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();
    assert_eq!(line.next_seq_no, 2);

    // seq=4 arrives next: gap covering 2,3.
    let mut pkt4 = moldudp64_header(4, 1);
    pkt4.extend_from_slice(&mold_record_with_len(mold_add_order(4, &stock, 10, 100_000)));
    moldudp64::parse_packet(&pkt4, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();

    assert_eq!(line.primary.stats.gaps, 1);
    assert_eq!(line.next_seq_no, 5);
    let gap_list = line.gap_list.as_ref().unwrap();
    assert_eq!(gap_list.len(), 1);
    assert_eq!(gap_list.ranges()[0].first, 2);
    assert_eq!(gap_list.ranges()[0].count, 2);

    // seq=2 and seq=3 arrive later in their own datagram, filling the gap.
    let mut pkt2 = moldudp64_header(2, 1);
    pkt2.extend_from_slice(&mold_record_with_len(mold_add_order(2, &stock, 10, 100_000)));
    moldudp64::parse_packet(&pkt2, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();
    assert_eq!(line.primary.stats.recovered_messages, 1);
    assert!(line.gap_list.as_ref().unwrap().len() == 1);

    let mut pkt3 = moldudp64_header(3, 1);
    pkt3.extend_from_slice(&mold_record_with_len(mold_add_order(3, &stock, 10, 100_000)));
    moldudp64::parse_packet(&pkt3, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();

    assert_eq!(line.primary.stats.recovered_messages, 2);
    assert!(line.gap_list.as_ref().unwrap().is_empty());
}

/// Scenario S4: GapList capacity 1, a resident range is evicted by a new push.
#[test]
fn s4_gap_list_overflow_evicts_and_reports_loss() {
    let mut gap_list = GapList::new(1, Duration::from_secs(5));
    let now = Instant::now();
    gap_list.push(10, 3, now);
    let result = gap_list.push(20, 5, now);
    assert_eq!(result.loss, 3);
    assert_eq!(gap_list.len(), 1);
    assert_eq!(gap_list.ranges()[0].first, 20);
}

/// Scenario S5: a resident range whose deadline has passed is flushed as loss.
#[test]
fn s5_gap_timeout_flushes_as_loss() {
    let mut gap_list = GapList::new(8, Duration::from_secs(10));
    let now = Instant::now();
    gap_list.push(100, 4, now);
    let later = now + Duration::from_secs(11);
    assert_eq!(gap_list.flush(later), 4);
    assert!(gap_list.is_empty());
}

/// Scenario S6: `OrderExecutedAtPrice` with `remaining == 0` removes the
/// order entry; the decoded record still carries the pre-deletion view.
#[test]
fn s6_order_execute_to_zero_removes_entry() {
    let mut line = Line::new("LINE_B", None);
    let mut orders = OrderTable::new(16);
    let mut symbols = SymbolTable::new(16);
    let records = Rc::new(RefCell::new(Vec::new()));

    struct Capturing {
        records: Rc<RefCell<Vec<DecodedRecord>>>,
    }
    impl Sink for Capturing {
        fn on_msg_send(&mut self, _conn: &Connection, record: &DecodedRecord) -> HookAction {
            self.records.borrow_mut().push(record.clone());
            HookAction::Continue
        }
    }
    let mut dispatcher = Dispatcher::new(Box::new(Capturing {
        records: records.clone(),
    }));
    let now = Instant::now();
    let stock = *b"MSFT  ";

    let mut seed = moldudp64_header(1, 1);
    seed.extend_from_slice(&mold_record_with_len(mold_add_order(7, &stock, 100, 100_000)));
    moldudp64::parse_packet(&seed, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();
    assert!(orders.get(&OrderKey::Numeric(7)).is_some());

    // All 100 resting shares executed -> remaining computes to zero -> entry removed.
    let exec = mold_exec_at_price(7, 100, 100_500);
    let mut pkt = moldudp64_header(2, 1);
    pkt.extend_from_slice(&mold_record_with_len(exec));
    moldudp64::parse_packet(&pkt, &mut line, &mut orders, &mut symbols, &mut dispatcher, now).unwrap();

    assert!(orders.get(&OrderKey::Numeric(7)).is_none());
    assert_eq!(line.next_seq_no, 3);
    let captured = records.borrow();
    let exec_view = captured
        .iter()
        .find(|r| matches!(r.kind, RecordKind::MoldOrderExecutedAtPrice))
        .expect("execute-at-price record dispatched");
    assert!(exec_view.order.is_some(), "hook sees the pre-deletion view");
}

/// Scenario S7: TCP login reject then accept on a later attempt.
#[test]
fn s7_tcp_login_reject_then_accept() {
    struct ScriptedTransport {
        responses: VecDeque<Vec<u8>>,
    }
    impl Transport for ScriptedTransport {
        fn connect(&mut self) -> Result<(), feedhandler_core::error::SessionError> {
            Ok(())
        }
        fn send(&mut self, _buf: &[u8]) -> Result<(), feedhandler_core::error::SessionError> {
            Ok(())
        }
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, feedhandler_core::error::SessionError> {
            match self.responses.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
        fn close(&mut self) {}
    }

    let credentials = LoginCredentials {
        name: *b"TRADER",
        password: *b"SECRET1234",
        session: *b"          ",
        start_seq: 1,
    };

    // First attempt: reject, "Not Authorized".
    let mut engine = SessionEngine::new(
        ScriptedTransport {
            responses: VecDeque::from([b"JA\n".to_vec()]),
        },
        credentials,
    );
    let err = engine.connect_and_login().unwrap_err();
    match err {
        feedhandler_core::error::SessionError::LoginRejected { reason } => {
            assert_eq!(reason, "Not Authorized")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.state, SessionState::Disconnected);

    // Second attempt (fresh transport, reusing the engine's retry path):
    // accept with session "SESSION042" and starting sequence 100.
    let credentials2 = LoginCredentials {
        name: *b"TRADER",
        password: *b"SECRET1234",
        session: *b"          ",
        start_seq: 1,
    };
    let mut engine2 = SessionEngine::new(
        ScriptedTransport {
            responses: VecDeque::from([b"ASESSION0420000000100\n".to_vec()]),
        },
        credentials2,
    );
    engine2.connect_and_login().unwrap();
    assert_eq!(engine2.state, SessionState::Streaming);
    assert_eq!(engine2.accepted_session.unwrap(), *b"SESSION042");
    assert_eq!(engine2.accepted_start_seq.unwrap(), 100);

    let conn = Connection::new("request");
    let mut dispatcher = Dispatcher::new(Box::new(RecordingSink::default()));
    engine2.reconnected(&conn, &mut dispatcher);
}

/// Scenario S8: no bytes arrive for 10 seconds of streaming; the heartbeat
/// countdown reaches zero and `ServerHeartbeatMissing` fires, with one
/// client heartbeat sent per idle second. The countdown re-arms after firing,
/// so a second idle 10-second window produces exactly one more alert, not a
/// re-fire on every subsequent idle tick.
#[test]
fn s8_tcp_heartbeat_absence() {
    struct SilentTransport {
        sent: Vec<Vec<u8>>,
    }
    impl Transport for SilentTransport {
        fn connect(&mut self) -> Result<(), feedhandler_core::error::SessionError> {
            Ok(())
        }
        fn send(&mut self, buf: &[u8]) -> Result<(), feedhandler_core::error::SessionError> {
            self.sent.push(buf.to_vec());
            Ok(())
        }
        fn recv(&mut self, _buf: &mut [u8]) -> Result<usize, feedhandler_core::error::SessionError> {
            Ok(0)
        }
        fn close(&mut self) {}
    }

    let credentials = LoginCredentials {
        name: *b"TRADER",
        password: *b"SECRET1234",
        session: *b"SESSION001",
        start_seq: 1,
    };
    let mut engine = SessionEngine::new(SilentTransport { sent: Vec::new() }, credentials);
    // Force straight into Streaming without a real login round-trip.
    engine.state = SessionState::Streaming;

    let mut line = Line::new("LINE_C", None);
    let mut orders = OrderTable::new(16);
    let mut symbols = SymbolTable::new(16);
    let recording = Rc::new(RefCell::new(Vec::new()));
    struct AlertCapture {
        alerts: Rc<RefCell<Vec<AlertKind>>>,
    }
    impl Sink for AlertCapture {
        fn on_alert(&mut self, alert: AlertKind, _conn: &Connection) {
            self.alerts.borrow_mut().push(alert);
        }
    }
    let mut dispatcher = Dispatcher::new(Box::new(AlertCapture {
        alerts: recording.clone(),
    }));

    // 22 idle ticks span two 10-second countdown cycles (the alert fires at
    // tick 10 and, after re-arming, again at tick 21).
    let start = Instant::now();
    for i in 0..22u64 {
        let now = start + Duration::from_secs(i);
        engine
            .poll_streaming(&mut line, &mut orders, &mut symbols, &mut dispatcher, now)
            .unwrap();
    }

    let miss_count = recording
        .borrow()
        .iter()
        .filter(|a| **a == AlertKind::ServerHeartbeatMissing)
        .count();
    assert_eq!(
        miss_count, 2,
        "expected exactly one SERVER_HB_MISSING per 10 idle seconds, not a re-fire on every tick"
    );
}
