//! Venue parsers (spec §4.4). Each parser is stateless with respect to the
//! venue: all mutable state lives in [`crate::line::Line`]/[`crate::line::Connection`],
//! the lookup tables, and the [`crate::gap::GapList`] passed in by the caller.

pub mod ascii_tcp;
pub mod moldudp64;
pub mod pitch;
