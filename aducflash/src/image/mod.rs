//! Firmware image formats.

pub mod ihex;

pub use ihex::{Decoded, HexFile, HexLine, HexRecord, HexSummary, RecordType, decode_line};
