//! Dispatcher / hook surface (spec §4.7, §9).
//!
//! The reference implementation caches raw function pointers per hook kind
//! (a closed table indexed by event kind, at most one handler per slot). That
//! global-mutable-singleton pattern doesn't translate to safe Rust; instead
//! we model the "closed set of event methods" as a `Sink` trait (spec §9's
//! redesign note) with a default no-op/fallthrough body per method, so a
//! consumer overrides exactly the methods it cares about and everything else
//! falls back to the generic `on_msg_send`/`on_record` hook, the same
//! fallback behavior described in spec §4.7 ("the generic msg-send hook, if
//! any, sees the decoded view").

use crate::line::Connection;
use crate::tables::{OrderEntry, SymbolEntry};

/// Alerts raised by the sequence engine, session engine, and gap list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Gap,
    NoGap,
    Loss,
    SessionTerminated,
    TcpConnectionEstablished,
    TcpConnectionBroken,
    ServerHeartbeatMissing,
}

/// The closed enumeration of event kinds a hook may be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CfgLoaded,
    LhInit,
    Alert(AlertKind),
    MsgSend,
    MsgFlush,
    Record(RecordKind),
}

/// One specific kind per venue record type (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    // Venue A — PITCH-like binary
    PitchTime,
    PitchAddOrderLong,
    PitchAddOrderShort,
    PitchOrderExecuted,
    PitchOrderExecutedAtPrice,
    PitchReduceSizeLong,
    PitchReduceSizeShort,
    PitchModifyLong,
    PitchModifyShort,
    PitchDeleteOrder,
    PitchTradeLong,
    PitchTradeShort,
    PitchTradeBreak,
    PitchEndOfSession,
    // Venue B — MoldUDP64-framed binary (ITCH-style catalog)
    MoldTime,
    MoldSystem,
    MoldStockDirectory,
    MoldStockTradingAction,
    MoldMarketParticipantPosition,
    MoldAddOrder,
    MoldAddOrderAttributed,
    MoldOrderExecuted,
    MoldOrderExecutedAtPrice,
    MoldOrderCancel,
    MoldOrderDelete,
    MoldOrderReplace,
    MoldTrade,
    MoldTradeCross,
    MoldTradeBreak,
    MoldNoii,
    MoldEndOfSession,
    // Venue C — ASCII TCP session
    AsciiSequenced,
    AsciiHeartbeat,
    AsciiEndOfSession,
}

/// Owned, hook-call-scoped snapshot of an order table entry. The reference
/// implementation hands the hook a raw back-pointer into the order table
/// that is only valid for the duration of the call (spec §9); because an
/// execute-to-zero or delete removes the entry from the table *before* the
/// hook is invoked with its "pre-deletion view" (see scenario S6), that
/// snapshot must be copied out at mutation time regardless — there is no
/// live entry left to borrow from by the time the hook runs. `OrderView` is
/// that copy: consumers that need a longer lifetime already have everything
/// they need without additionally cloning.
#[derive(Debug, Clone)]
pub struct OrderView {
    pub key: crate::tables::OrderKey,
    pub shares: u32,
    pub price: u64,
    pub side: u8,
    pub stock: [u8; 6],
}

impl From<&OrderEntry> for OrderView {
    fn from(e: &OrderEntry) -> Self {
        Self {
            key: e.key,
            shares: e.shares,
            price: e.price,
            side: e.side,
            stock: e.stock,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SymbolView {
    pub key: crate::tables::SymbolKey,
}

impl From<&SymbolEntry> for SymbolView {
    fn from(e: &SymbolEntry) -> Self {
        Self { key: e.key }
    }
}

/// A decoded record, with the table side effects already applied, handed to
/// the dispatcher before the sequence counter advances (spec §4.4 step 3).
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub kind: RecordKind,
    pub seq_no: u64,
    pub timestamp_ns: u64,
    pub order: Option<OrderView>,
    pub symbol: Option<SymbolView>,
    /// Raw bytes of the record as received, for consumers that want to
    /// re-derive fields the table-effect view doesn't carry.
    pub raw_len: usize,
}

/// Whether a hook wants the parser's default action to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    Veto,
}

/// The closed set of event methods a consumer may implement (spec §9's
/// "interface abstraction" redesign of dynamic plugin dispatch). All methods
/// have a default no-op/fallthrough body, so only at most one "slot" per
/// event kind is ever meaningfully populated, matching the original's
/// "empty or holds one function" semantics.
pub trait Sink {
    fn on_cfg_loaded(&mut self) {}

    fn on_lh_init(&mut self) -> HookAction {
        HookAction::Continue
    }

    fn on_alert(&mut self, _alert: AlertKind, _conn: &Connection) {}

    /// Generic fallback invoked for every accepted record when no more
    /// specific method has been overridden for its `RecordKind`.
    fn on_msg_send(&mut self, _conn: &Connection, _record: &DecodedRecord) -> HookAction {
        HookAction::Continue
    }

    fn on_msg_flush(&mut self, _conn: &Connection) -> HookAction {
        HookAction::Continue
    }

    /// Dispatch point used by the parsers. Default implementation always
    /// falls through to [`Sink::on_msg_send`]; override to special-case a
    /// particular [`RecordKind`].
    fn on_record(&mut self, conn: &Connection, record: &DecodedRecord) -> HookAction {
        self.on_msg_send(conn, record)
    }
}

/// A [`Sink`] that does nothing and always continues; used when no consumer
/// has registered a hook.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {}

/// Holds the single registered [`Sink`] for a process and routes calls into
/// it. Parsers call [`Dispatcher::emit`] after table effects and before
/// advancing `next_seq_no` (spec §4.7).
pub struct Dispatcher {
    sink: Box<dyn Sink>,
}

impl Dispatcher {
    pub fn new(sink: Box<dyn Sink>) -> Self {
        Self { sink }
    }

    pub fn emit(&mut self, conn: &Connection, record: &DecodedRecord) -> HookAction {
        self.sink.on_record(conn, record)
    }

    pub fn alert(&mut self, alert: AlertKind, conn: &Connection) {
        self.sink.on_alert(alert, conn);
    }

    pub fn flush(&mut self, conn: &Connection) -> HookAction {
        self.sink.on_msg_flush(conn)
    }

    pub fn lh_init(&mut self) -> HookAction {
        self.sink.on_lh_init()
    }

    pub fn cfg_loaded(&mut self) {
        self.sink.on_cfg_loaded();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Box::new(NullSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Connection;

    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingSink {
        records: Rc<RefCell<u32>>,
        alerts: Rc<RefCell<u32>>,
    }

    impl Sink for CountingSink {
        fn on_msg_send(&mut self, _conn: &Connection, _record: &DecodedRecord) -> HookAction {
            *self.records.borrow_mut() += 1;
            HookAction::Continue
        }
        fn on_alert(&mut self, _alert: AlertKind, _conn: &Connection) {
            *self.alerts.borrow_mut() += 1;
        }
    }

    #[test]
    fn generic_hook_receives_every_record_kind_by_default() {
        let records = Rc::new(RefCell::new(0));
        let alerts = Rc::new(RefCell::new(0));
        let mut dispatcher = Dispatcher::new(Box::new(CountingSink {
            records: records.clone(),
            alerts: alerts.clone(),
        }));
        let conn = Connection::new("primary");
        let record = DecodedRecord {
            kind: RecordKind::PitchAddOrderLong,
            seq_no: 1,
            timestamp_ns: 0,
            order: None,
            symbol: None,
            raw_len: 34,
        };
        dispatcher.emit(&conn, &record);
        dispatcher.alert(AlertKind::Gap, &conn);
        assert_eq!(*records.borrow(), 1);
        assert_eq!(*alerts.borrow(), 1);
    }
}
