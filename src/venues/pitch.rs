//! Venue A — PITCH-like binary multicast parser (spec §4.4).
//!
//! Framing header: `hdr_length: u16, msg_count: u8, unit: u8, seq_no: u32`,
//! all little-endian. Each record starts with a `msg_length` byte whose
//! value is the record's total wire size, counting itself and the type byte;
//! records are otherwise `[type: u8, payload...]`.
//!
//! Record sequence numbers are not carried on the wire individually — the
//! packet header carries only the first record's sequence number, and
//! subsequent records are assigned consecutive sequence numbers, skipping
//! the `Time` record which (per spec) never consumes a sequence slot.

use std::time::Instant;

use crate::decode::{read_u16_le, read_u32_le, read_u64_le};
use crate::dispatch::{DecodedRecord, Dispatcher, OrderView, RecordKind, SymbolView};
use crate::error::ParseError;
use crate::gap::GapList;
use crate::line::{Connection, Line};
use crate::sequence::{self, Classification};
use crate::tables::symbol::pad_symbol;
use crate::tables::{OrderEntry, OrderKey, OrderTable, SymbolTable};

const HEADER_LEN: usize = 8;

struct Header {
    #[allow(dead_code)]
    hdr_length: u16,
    msg_count: u8,
    #[allow(dead_code)]
    unit: u8,
    seq_no: u32,
}

fn parse_header(buf: &[u8]) -> Result<Header, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::TruncatedPacket {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }
    Ok(Header {
        hdr_length: read_u16_le(buf, 0)?,
        msg_count: buf[2],
        unit: buf[3],
        seq_no: read_u32_le(buf, 4)?,
    })
}

/// Parse one PITCH-like packet, mutating `line`'s sequence state, the order
/// table, and (via `dispatcher`) any registered [`crate::dispatch::Sink`].
pub fn parse_packet(
    packet: &[u8],
    line: &mut Line,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
    dispatcher: &mut Dispatcher,
    now: Instant,
) -> Result<(), ParseError> {
    let header = parse_header(packet)?;

    if header.msg_count == 0 {
        sequence::apply_heartbeat(&mut line.next_seq_no, header.seq_no as u64);
        return Ok(());
    }

    let mut cursor = HEADER_LEN;
    let mut current_seq = header.seq_no as u64;

    for _ in 0..header.msg_count {
        let msg_length = *packet
            .get(cursor)
            .ok_or(ParseError::TruncatedPacket {
                expected: cursor + 1,
                actual: packet.len(),
            })? as usize;
        let record_len = msg_length; // msg_length already counts the length byte itself
        let record = packet
            .get(cursor..cursor + record_len)
            .ok_or(ParseError::TruncatedPacket {
                expected: cursor + record_len,
                actual: packet.len(),
            })?;

        let msg_type = record[1];

        if msg_type == 0x20 {
            // Time: does not consume a sequence number.
            let time_secs = read_u32_le(record, 2)?;
            line.primary.timestamp_ns = u64::from(time_secs) * 1_000_000_000;
            cursor += record_len;
            continue;
        }

        let outcome = sequence::classify(&mut line.next_seq_no, gap_list_of(line), current_seq, now);
        outcome.apply_to(&mut line.primary.stats);
        for alert in &outcome.alerts {
            dispatcher.alert(*alert, &line.primary);
        }

        if outcome.classification != Some(Classification::Duplicate) {
            match decode_record(record, msg_type, current_seq, order_table, symbol_table) {
                Ok(decoded) => {
                    line.primary.stats.messages += 1;
                    dispatcher.emit(&line.primary, &decoded);
                }
                Err(_) => {
                    line.primary.stats.message_errors += 1;
                }
            }
        }

        current_seq += 1;
        cursor += record_len;
    }

    line.primary.stats.packets += 1;
    line.primary.stats.bytes += packet.len() as u64;
    Ok(())
}

fn gap_list_of(line: &mut Line) -> Option<&mut GapList> {
    line.gap_list.as_mut()
}

fn decode_record(
    record: &[u8],
    msg_type: u8,
    seq_no: u64,
    order_table: &mut OrderTable,
    symbol_table: &mut SymbolTable,
) -> Result<DecodedRecord, ParseError> {
    let raw_len = record.len();
    let mut decoded = DecodedRecord {
        kind: kind_of(msg_type)?,
        seq_no,
        timestamp_ns: 0,
        order: None,
        symbol: None,
        raw_len,
    };

    match msg_type {
        0x21 => {
            // AddOrderLong: len(1) type(1) time_offset(4) order_id(8) side(1) shares(4) stock(6) price(8) add_flags(1)
            expect_len(record, msg_type, 34)?;
            let order_id = read_u64_le(record, 6)?;
            let side = record[14];
            let shares = read_u32_le(record, 15)?;
            let mut stock = [0u8; 6];
            stock.copy_from_slice(&record[19..25]);
            let price = read_u64_le(record, 25)?;
            let mut entry = OrderEntry::new(OrderKey::Numeric(order_id), shares, price, side, stock);
            let sym = symbol_table.get_or_insert(pad_symbol(&stock));
            entry.sym_key = Some(sym.key);
            decoded.symbol = Some(SymbolView::from(&*sym));
            match order_table.insert(entry) {
                Ok(inserted) => decoded.order = Some(OrderView::from(&*inserted)),
                Err(e) => tracing::warn!(order_id, error = %e, "add order long: table insert failed"),
            }
        }
        0x22 => {
            // AddOrderShort: len(1) type(1) time_offset(4) order_id(8) side(1) shares(2) stock(6) price(2, x100) add_flags(1)
            expect_len(record, msg_type, 26)?;
            let order_id = read_u64_le(record, 6)?;
            let side = record[14];
            let shares = u32::from(read_u16_le(record, 15)?);
            let mut stock = [0u8; 6];
            stock.copy_from_slice(&record[17..23]);
            let price = u64::from(read_u16_le(record, 23)?) * 100;
            let mut entry = OrderEntry::new(OrderKey::Numeric(order_id), shares, price, side, stock);
            let sym = symbol_table.get_or_insert(pad_symbol(&stock));
            entry.sym_key = Some(sym.key);
            decoded.symbol = Some(SymbolView::from(&*sym));
            match order_table.insert(entry) {
                Ok(inserted) => decoded.order = Some(OrderView::from(&*inserted)),
                Err(e) => tracing::warn!(order_id, error = %e, "add order short: table insert failed"),
            }
        }
        0x23 => {
            // OrderExecuted: len(1) type(1) time_offset(4) order_id(8) executed_shares(4) execution_id(8)
            expect_len(record, msg_type, 26)?;
            let order_id = read_u64_le(record, 6)?;
            let executed_shares = read_u32_le(record, 14)?;
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                if executed_shares > entry.shares {
                    tracing::warn!(order_id, executed_shares, resting = entry.shares, "order executed past resting size");
                }
                entry.shares = entry.shares.saturating_sub(executed_shares);
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "order executed: no resting order");
            }
        }
        0x24 => {
            // OrderExecutedAtPrice: ... executed_shares(4) execution_id(8) remaining_shares(4) price(8)
            expect_len(record, msg_type, 38)?;
            let order_id = read_u64_le(record, 6)?;
            let remaining_shares = read_u32_le(record, 26)?;
            let price = read_u64_le(record, 30)?;
            if remaining_shares == 0 {
                if let Some(entry) = order_table.delete(&OrderKey::Numeric(order_id)) {
                    decoded.order = Some(OrderView::from(&entry));
                } else {
                    tracing::warn!(order_id, "order executed at price: no resting order to delete");
                }
            } else if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                entry.shares = remaining_shares;
                entry.price = price;
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "order executed at price: no resting order");
            }
        }
        0x25 => {
            // ReduceSizeLong: order_id(8) canceled_shares(4)
            expect_len(record, msg_type, 18)?;
            let order_id = read_u64_le(record, 6)?;
            let canceled_shares = read_u32_le(record, 14)?;
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                entry.shares = entry.shares.saturating_sub(canceled_shares);
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "reduce size: no resting order");
            }
        }
        0x26 => {
            // ReduceSizeShort: order_id(8) canceled_shares(2)
            expect_len(record, msg_type, 16)?;
            let order_id = read_u64_le(record, 6)?;
            let canceled_shares = u32::from(read_u16_le(record, 14)?);
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                entry.shares = entry.shares.saturating_sub(canceled_shares);
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "reduce size: no resting order");
            }
        }
        0x27 => {
            // ModifyLong: order_id(8) shares(4) price(8) mod_flags(1)
            expect_len(record, msg_type, 27)?;
            let order_id = read_u64_le(record, 6)?;
            let shares = read_u32_le(record, 14)?;
            let price = read_u64_le(record, 18)?;
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                entry.shares = shares;
                entry.price = price;
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "modify order: no resting order");
            }
        }
        0x28 => {
            // ModifyShort: order_id(8) shares(2) price(2, x100) mod_flags(1)
            expect_len(record, msg_type, 19)?;
            let order_id = read_u64_le(record, 6)?;
            let shares = u32::from(read_u16_le(record, 14)?);
            let price = u64::from(read_u16_le(record, 16)?) * 100;
            if let Some(entry) = order_table.get(&OrderKey::Numeric(order_id)) {
                entry.shares = shares;
                entry.price = price;
                decoded.order = Some(OrderView::from(&*entry));
            } else {
                tracing::warn!(order_id, "modify order: no resting order");
            }
        }
        0x29 => {
            // DeleteOrder: order_id(8)
            expect_len(record, msg_type, 14)?;
            let order_id = read_u64_le(record, 6)?;
            if let Some(entry) = order_table.delete(&OrderKey::Numeric(order_id)) {
                decoded.order = Some(OrderView::from(&entry));
            } else {
                tracing::warn!(order_id, "delete order: no resting order");
            }
        }
        0x2A => expect_len(record, msg_type, 41)?,
        0x2B => expect_len(record, msg_type, 33)?,
        0x2C => expect_len(record, msg_type, 14)?,
        0x2D => expect_len(record, msg_type, 6)?,
        other => return Err(ParseError::UnknownRecordType(other)),
    }

    Ok(decoded)
}

fn expect_len(record: &[u8], msg_type: u8, expected: usize) -> Result<(), ParseError> {
    if record.len() != expected {
        return Err(ParseError::InvalidRecordLength {
            msg_type,
            expected,
            actual: record.len(),
        });
    }
    Ok(())
}

fn kind_of(msg_type: u8) -> Result<RecordKind, ParseError> {
    Ok(match msg_type {
        0x20 => RecordKind::PitchTime,
        0x21 => RecordKind::PitchAddOrderLong,
        0x22 => RecordKind::PitchAddOrderShort,
        0x23 => RecordKind::PitchOrderExecuted,
        0x24 => RecordKind::PitchOrderExecutedAtPrice,
        0x25 => RecordKind::PitchReduceSizeLong,
        0x26 => RecordKind::PitchReduceSizeShort,
        0x27 => RecordKind::PitchModifyLong,
        0x28 => RecordKind::PitchModifyShort,
        0x29 => RecordKind::PitchDeleteOrder,
        0x2A => RecordKind::PitchTradeLong,
        0x2B => RecordKind::PitchTradeShort,
        0x2C => RecordKind::PitchTradeBreak,
        0x2D => RecordKind::PitchEndOfSession,
        other => return Err(ParseError::UnknownRecordType(other)),
    })
}
