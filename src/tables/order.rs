//! Order table (spec §4.2): fixed-capacity, keyed either by a 64-bit order
//! number or a 12/20-byte alphanumeric order reference, depending on venue.

use tracing::warn;

use crate::error::TableError;
use crate::tables::symbol::SymbolKey;

/// Alphanumeric order reference, right-padded to its venue's fixed width
/// (12 bytes for BATS PITCH, 20 for the ASCII TCP venue). Stored at full
/// width; shorter references are padded with trailing spaces.
pub type OrderRef = [u8; 20];

pub fn pad_order_ref(bytes: &[u8]) -> OrderRef {
    let mut key = [b' '; 20];
    let n = bytes.len().min(20);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

/// Order table key: either venue's numeric order number or an alphanumeric
/// order reference. Hashing treats trailing padding spaces as significant
/// for the alphanumeric variant, matching the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKey {
    Numeric(u64),
    Alpha(OrderRef),
}

/// One resting order. Created by Add Order; mutated by Execute,
/// Execute-at-price, Reduce-size, Modify, Replace; deleted by Delete, by
/// Execute/Execute-at-price reaching zero shares, and by Replace (old key
/// removed, new key inserted).
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub key: OrderKey,
    pub shares: u32,
    pub price: u64,
    pub side: u8,
    pub stock: [u8; 6],
    pub sym_key: Option<SymbolKey>,
    pub context: Option<i64>,
}

impl OrderEntry {
    pub fn new(key: OrderKey, shares: u32, price: u64, side: u8, stock: [u8; 6]) -> Self {
        Self {
            key,
            shares,
            price,
            side,
            stock,
            sym_key: None,
            context: None,
        }
    }
}

pub struct OrderTable {
    capacity: usize,
    entries: std::collections::HashMap<OrderKey, OrderEntry>,
    inserts_since_warn: u64,
}

impl OrderTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: std::collections::HashMap::with_capacity(capacity),
            inserts_since_warn: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &OrderKey) -> Option<&mut OrderEntry> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, entry: OrderEntry) -> Result<&mut OrderEntry, TableError> {
        if self.entries.contains_key(&entry.key) {
            return Err(TableError::Duplicate);
        }
        if self.entries.len() >= self.capacity {
            return Err(TableError::Full);
        }
        self.check_capacity_warning();
        let key = entry.key;
        self.entries.insert(key, entry);
        Ok(self.entries.get_mut(&key).expect("just inserted"))
    }

    pub fn delete(&mut self, key: &OrderKey) -> Option<OrderEntry> {
        self.entries.remove(key)
    }

    /// Replace: move an entry from `old_key` to `new_key`, applying `update`
    /// to the moved entry's fields before it is re-inserted. Returns
    /// `TableError::NotFound` if `old_key` isn't resident.
    pub fn replace(
        &mut self,
        old_key: &OrderKey,
        new_key: OrderKey,
        update: impl FnOnce(&mut OrderEntry),
    ) -> Result<&mut OrderEntry, TableError> {
        let mut entry = self.entries.remove(old_key).ok_or(TableError::NotFound)?;
        entry.key = new_key;
        update(&mut entry);
        self.entries.insert(new_key, entry);
        Ok(self.entries.get_mut(&new_key).expect("just inserted"))
    }

    fn check_capacity_warning(&mut self) {
        self.inserts_since_warn += 1;
        let threshold = self.capacity * 9 / 10;
        if self.entries.len() >= threshold && self.inserts_since_warn >= 100 {
            warn!(
                occupancy = self.entries.len(),
                capacity = self.capacity,
                "order table at >= 90% occupancy"
            );
            self.inserts_since_warn = 0;
        }
    }
}
