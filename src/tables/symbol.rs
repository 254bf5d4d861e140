//! Symbol table (spec §4.2): fixed-capacity, keyed by a 20-byte right-padded
//! symbol. Symbols are interned on first reference and are never deleted
//! during a session.

use tracing::warn;

use crate::error::TableError;

/// 20-byte right-space-padded symbol key. Trailing spaces are significant —
/// this matches the wire encoding, so hashing treats them as part of the key.
pub type SymbolKey = [u8; 20];

pub fn pad_symbol(bytes: &[u8]) -> SymbolKey {
    let mut key = [b' '; 20];
    let n = bytes.len().min(20);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

/// One resident symbol. Created lazily on first sighting; a plugin-supplied
/// `context` slot is reserved for downstream use but never inspected here.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub key: SymbolKey,
    pub context: Option<i64>,
}

impl SymbolEntry {
    pub fn new(key: SymbolKey) -> Self {
        Self { key, context: None }
    }
}

/// Fixed-capacity symbol table. Warns once per 100 inserts once occupancy
/// reaches 90% of capacity (spec §4.2).
pub struct SymbolTable {
    capacity: usize,
    entries: std::collections::HashMap<SymbolKey, SymbolEntry>,
    inserts_since_warn: u64,
}

impl SymbolTable {
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

    pub fn get(&mut self, key: &SymbolKey) -> Option<&mut SymbolEntry> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, entry: SymbolEntry) -> Result<&mut SymbolEntry, TableError> {
        if self.entries.contains_key(&entry.key) {
            return Err(TableError::Duplicate);
        }
        self.check_capacity_warning();
        let key = entry.key;
        self.entries.insert(key, entry);
        Ok(self.entries.get_mut(&key).expect("just inserted"))
    }

    pub fn delete(&mut self, key: &SymbolKey) -> Option<SymbolEntry> {
        self.entries.remove(key)
    }

    /// Intern a symbol: return the existing entry, or create and insert one.
    pub fn get_or_insert(&mut self, key: SymbolKey) -> &mut SymbolEntry {
        if !self.entries.contains_key(&key) {
            self.check_capacity_warning();
            self.entries.insert(key, SymbolEntry::new(key));
        }
        self.entries.get_mut(&key).expect("just ensured present")
    }

    fn check_capacity_warning(&mut self) {
        self.inserts_since_warn += 1;
        let threshold = self.capacity * 9 / 10;
        if self.entries.len() >= threshold && self.inserts_since_warn >= 100 {
            warn!(
                occupancy = self.entries.len(),
                capacity = self.capacity,
                "symbol table at >= 90% occupancy"
            );
            self.inserts_since_warn = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_symbol_right_pads_with_spaces() {
        let key = pad_symbol(b"MSFT");
        assert_eq!(&key[..4], b"MSFT");
        assert!(key[4..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn get_or_insert_interns_once() {
        let mut table = SymbolTable::new(16);
        let key = pad_symbol(b"AAPL");
        table.get_or_insert(key).context = Some(42);
        assert_eq!(table.get_or_insert(key).context, Some(42));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_rejects_duplicate() {
        let mut table = SymbolTable::new(16);
        let key = pad_symbol(b"AAPL");
        table.insert(SymbolEntry::new(key)).unwrap();
        assert_eq!(
            table.insert(SymbolEntry::new(key)).unwrap_err(),
            TableError::Duplicate
        );
    }

    #[test]
    fn delete_removes_entry() {
        let mut table = SymbolTable::new(16);
        let key = pad_symbol(b"AAPL");
        table.insert(SymbolEntry::new(key)).unwrap();
        assert!(table.delete(&key).is_some());
        assert!(table.get(&key).is_none());
    }
}
