//! Error types for aducflash.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::Command;

/// Result type for aducflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for aducflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed Intel HEX line.
    #[error("Invalid hex record at line {line}: {reason}")]
    InvalidHex {
        /// 1-based line number, 0 when decoding outside of a file.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// Data record does not fit in a single bootloader packet.
    #[error("Record of {len} data bytes exceeds the packet limit of {max}")]
    RecordTooLong {
        /// Number of data bytes in the record.
        len: usize,
        /// Maximum number of data bytes per packet.
        max: usize,
    },

    /// Write or verify packet requested without a hex record.
    #[error("{0} packet requires a hex record")]
    MissingRecord(Command),

    /// The bootloader did not answer the autobaud byte in time.
    #[error("Handshake timeout: no response after {} seconds", .0.as_secs())]
    HandshakeTimeout(Duration),

    /// Waiting for or reading the handshake reply failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The bootloader rejected a packet.
    #[error("Bootloader rejected {0} packet (NACK)")]
    Nack(Command),

    /// The bootloader answered with something other than ACK or NACK.
    #[error("Undefined response to {command} packet: {}", display_byte(*.byte))]
    UndefinedResponse {
        /// Command of the packet that was answered.
        command: Command,
        /// First response byte, `None` if nothing was read.
        byte: Option<u8>,
    },

    /// The embedding application requested the session to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn display_byte(byte: Option<u8>) -> String {
    byte.map_or_else(|| "no data".to_string(), |b| format!("0x{b:02X}"))
}
