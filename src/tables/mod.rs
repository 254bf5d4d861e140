//! The two lookup tables mutated by the parsers as side effects of add,
//! execute, cancel, delete, and replace messages (spec §4.2).

pub mod order;
pub mod symbol;

pub use order::{OrderEntry, OrderKey, OrderRef, OrderTable};
pub use symbol::{SymbolEntry, SymbolKey, SymbolTable};
