//! Intel HEX records.
//!
//! ## Line Format
//!
//! ```text
//! +---+-------+---------+------+-----------------+----------+
//! | : | Count | Address | Type |      Data       | Checksum |
//! +---+-------+---------+------+-----------------+----------+
//! | 1 | 2 hex | 4 hex   | 2 hex| Count * 2 hex   | 2 hex    |
//! +---+-------+---------+------+-----------------+----------+
//! ```
//!
//! Only data records (type `00`) are programmed. Address extension, start
//! address and end-of-file records are reported as skipped.
//!
//! The record checksum is read but not checked against the record contents.
//! Files that the bootloader tooling has always accepted keep being accepted.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Start code of every record line.
pub const START_CODE: char = ':';

/// Intel HEX record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RecordType {
    /// Data record (`00`).
    Data,
    /// Any other record type, by code.
    Other(u8),
}

impl RecordType {
    /// Code of the data record type.
    pub const DATA: u8 = 0x00;

    /// Map a record type code.
    pub fn from_code(code: u8) -> Self {
        if code == Self::DATA {
            Self::Data
        } else {
            Self::Other(code)
        }
    }

    /// Record type code.
    pub fn code(self) -> u8 {
        match self {
            Self::Data => Self::DATA,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.code() {
            0x00 => "data",
            0x01 => "end of file",
            0x02 => "extended segment address",
            0x03 => "start segment address",
            0x04 => "extended linear address",
            0x05 => "start linear address",
            _ => "unknown",
        };
        write!(f, "0x{:02x} ({name})", self.code())
    }
}

/// One decoded data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Number of data bytes.
    pub byte_count: u8,
    /// Load address.
    pub address: u16,
    /// Record type.
    pub record_type: RecordType,
    /// Data bytes, `byte_count` long.
    pub data: Vec<u8>,
    /// Checksum as written in the line. Not verified.
    pub checksum: u8,
}

/// Outcome of decoding a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A data record ready to be sent.
    Record(HexRecord),
    /// A record type that is not programmed.
    Skip(RecordType),
}

/// Cursor over the hex digit pairs of a line.
struct Fields<'a> {
    digits: &'a str,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(digits: &'a str) -> Self {
        Self { digits, pos: 0 }
    }

    fn byte(&mut self, field: &str) -> Result<u8> {
        let pair = self
            .digits
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| invalid(format!("line ends inside the {field} field")))?;

        if !pair
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
        {
            return Err(invalid(format!("'{pair}' in the {field} field is not hex")));
        }

        self.pos += 2;
        u8::from_str_radix(pair, 16).map_err(|e| invalid(format!("{field}: {e}")))
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidHex { line: 0, reason }
}

/// Decode a single Intel HEX line.
///
/// Trailing line terminators and whitespace are ignored. A missing start
/// code, truncated field or non-hex digit is an error; a record type other
/// than data yields [`Decoded::Skip`].
pub fn decode_line(line: &str) -> Result<Decoded> {
    let line = line.trim_end();
    let digits = line
        .strip_prefix(START_CODE)
        .ok_or_else(|| invalid(format!("missing '{START_CODE}' start code")))?;

    let mut fields = Fields::new(digits);
    let byte_count = fields.byte("byte count")?;
    let address = u16::from_be_bytes([fields.byte("address")?, fields.byte("address")?]);
    let record_type = RecordType::from_code(fields.byte("record type")?);

    if record_type != RecordType::Data {
        return Ok(Decoded::Skip(record_type));
    }

    let data = (0..byte_count)
        .map(|_| fields.byte("data"))
        .collect::<Result<Vec<u8>>>()?;
    let checksum = fields.byte("checksum")?;

    Ok(Decoded::Record(HexRecord {
        byte_count,
        address,
        record_type,
        data,
        checksum,
    }))
}

/// A decoded line with its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexLine {
    /// 1-based line number.
    pub line: usize,
    /// Decoded content.
    pub decoded: Decoded,
}

/// Overview of the data records in a hex file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HexSummary {
    /// Number of data records.
    pub data_records: usize,
    /// Number of records of other types.
    pub skipped_records: usize,
    /// Total number of data bytes.
    pub data_bytes: usize,
    /// Data bytes in the longest record.
    pub largest_record: usize,
    /// Lowest load address of a non-empty data record.
    pub lowest_address: Option<u16>,
    /// Last address written by a data record.
    pub highest_address: Option<u32>,
}

/// Rewindable line-by-line reader over an Intel HEX image.
pub struct HexFile<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl HexFile<BufReader<File>> {
    /// Open a hex file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening hex file: {}", path.display());
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Seek> HexFile<R> {
    /// Wrap a reader positioned at the start of the image.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Decode the next line, `None` at end of input.
    ///
    /// Decoding errors carry the line number.
    pub fn next_line(&mut self) -> Result<Option<HexLine>> {
        self.buf.clear();
        if self
            .reader
            .read_line(&mut self.buf)?
            == 0
        {
            return Ok(None);
        }
        self.line += 1;

        let decoded = decode_line(&self.buf).map_err(|e| match e {
            Error::InvalidHex { reason, .. } => Error::InvalidHex {
                line: self.line,
                reason,
            },
            other => other,
        })?;

        Ok(Some(HexLine {
            line: self.line,
            decoded,
        }))
    }

    /// Go back to the first line.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))?;
        self.line = 0;
        Ok(())
    }

    /// Number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Walk the whole file once and rewind.
    #[allow(clippy::cast_possible_truncation)] // record data is at most 255 bytes
    pub fn summarize(&mut self) -> Result<HexSummary> {
        self.rewind()?;
        let mut summary = HexSummary::default();

        while let Some(line) = self.next_line()? {
            match line.decoded {
                Decoded::Record(record) => {
                    summary.data_records += 1;
                    summary.data_bytes += record.data.len();
                    summary.largest_record = summary
                        .largest_record
                        .max(record.data.len());
                    if record.data.is_empty() {
                        continue;
                    }
                    let end = u32::from(record.address) + record.data.len() as u32 - 1;
                    summary.lowest_address = Some(
                        summary
                            .lowest_address
                            .map_or(record.address, |a| a.min(record.address)),
                    );
                    summary.highest_address = Some(
                        summary
                            .highest_address
                            .map_or(end, |a| a.max(end)),
                    );
                },
                Decoded::Skip(_) => summary.skipped_records += 1,
            }
        }

        self.rewind()?;
        Ok(summary)
    }
}
