//! Error taxonomy (see spec §7).
//!
//! Framing/table/sequence errors never unwind the reader loop — they are
//! caught at the loop boundary, counted into `ConnStats`, and logged.
//! Only `ConfigError` at startup and the process exit flag stop the loop.

use thiserror::Error;

/// Errors raised by the byte decoders (§4.1). Decoders are total on
/// well-formed fixed-width records; the only failure mode is a buffer that's
/// too short for the field being read.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short: need {need} bytes at offset {offset}, have {have}")]
    BufferTooShort {
        offset: usize,
        need: usize,
        have: usize,
    },
}

/// Errors raised while parsing a packet or record for any venue (§4.4, §7).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("truncated packet: expected at least {expected} bytes, got {actual}")]
    TruncatedPacket { expected: usize, actual: usize },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid record length for type {msg_type:#04x}: expected {expected}, got {actual}")]
    InvalidRecordLength {
        msg_type: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown record type {0:#04x}")]
    UnknownRecordType(u8),
}

/// Errors raised by the lookup tables (§4.2).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate key on insert")]
    Duplicate,
    #[error("table is full")]
    Full,
    #[error("key not found")]
    NotFound,
}

/// Errors raised by the TCP session engine (§4.6).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("login rejected: {reason}")]
    LoginRejected { reason: &'static str },
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("server heartbeat missing")]
    HeartbeatMissing,
}

/// Errors raised while loading or validating the process configuration (§6, §10.3).
/// Unlike the other error kinds, this one is fatal: it aborts startup with a
/// non-zero exit code rather than being recorded and continued past.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: config::ConfigError,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown process {0:?}")]
    UnknownProcess(String),
    #[error("no process configured and no default available")]
    NoProcess,
    #[error("line {line:?} references unknown connection {conn}")]
    UnknownConnection { line: String, conn: &'static str },
}
