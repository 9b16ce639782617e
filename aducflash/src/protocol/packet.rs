//! Bootloader packet builder.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::image::ihex::HexRecord;
use crate::protocol::checksum::checksum;

/// Start ID that opens every packet.
pub const START_ID: [u8; 2] = [0x07, 0x0E];

/// Maximum number of data bytes a single packet can carry.
///
/// The length field is one byte and also counts the command and the four
/// address bytes.
pub const MAX_DATA_LEN: usize = u8::MAX as usize - HEADER_LEN;

/// Command byte plus four address bytes.
const HEADER_LEN: usize = 5;

/// Start ID, length field and checksum.
const FRAMING_LEN: usize = 4;

/// Data byte of an erase packet selecting a mass erase.
const MASS_ERASE: u8 = 0x00;

/// Bit rotation applied to verify packet bodies.
const VERIFY_ROTATION: u32 = 3;

/// Bootloader commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Erase flash ('E').
    Erase = b'E',
    /// Write a data record ('W').
    Write = b'W',
    /// Verify a data record ('V').
    Verify = b'V',
    /// Run user code ('R').
    Run = b'R',
}

impl Command {
    /// ASCII code sent on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.code()))
    }
}

/// Encode one byte of a verify packet body.
pub fn verify_encode(byte: u8) -> u8 {
    byte.rotate_left(VERIFY_ROTATION)
}

/// Undo [`verify_encode`].
pub fn verify_decode(byte: u8) -> u8 {
    byte.rotate_right(VERIFY_ROTATION)
}

/// A single bootloader packet.
///
/// The length field, target address and checksum are derived from the
/// command and data, so a packet can never disagree with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: Command,
    address: u16,
    data: Vec<u8>,
}

impl Packet {
    /// Mass erase of the user flash.
    pub fn erase() -> Self {
        Self {
            command: Command::Erase,
            address: 0,
            data: vec![MASS_ERASE],
        }
    }

    /// Jump to user code.
    pub fn run() -> Self {
        Self {
            command: Command::Run,
            address: 0,
            data: Vec::new(),
        }
    }

    /// Program the data of `record` at its load address.
    pub fn write(record: &HexRecord) -> Result<Self> {
        Self::with_record(Command::Write, record)
    }

    /// Compare the data of `record` against flash.
    pub fn verify(record: &HexRecord) -> Result<Self> {
        Self::with_record(Command::Verify, record)
    }

    /// Build a packet for `command`.
    ///
    /// `record` is required for write and verify and ignored otherwise.
    pub fn build(command: Command, record: Option<&HexRecord>) -> Result<Self> {
        match command {
            Command::Erase => Ok(Self::erase()),
            Command::Run => Ok(Self::run()),
            Command::Write | Command::Verify => {
                let record = record.ok_or(Error::MissingRecord(command))?;
                Self::with_record(command, record)
            },
        }
    }

    fn with_record(command: Command, record: &HexRecord) -> Result<Self> {
        if record.data.len() > MAX_DATA_LEN {
            return Err(Error::RecordTooLong {
                len: record.data.len(),
                max: MAX_DATA_LEN,
            });
        }

        Ok(Self {
            command,
            address: record.address,
            data: record.data.clone(),
        })
    }

    /// Get the command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Unencoded data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length field: command, address and data bytes.
    #[allow(clippy::cast_possible_truncation)] // data.len() <= MAX_DATA_LEN
    pub fn length(&self) -> u8 {
        (HEADER_LEN + self.data.len()) as u8
    }

    /// Four byte big-endian target address. The upper half is always zero.
    pub fn target_address(&self) -> [u8; 4] {
        let mut address = [0u8; 4];
        BigEndian::write_u32(&mut address, u32::from(self.address));
        address
    }

    /// Bytes covered by the length field, as sent on the wire.
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + self.data.len());
        body.push(self.command.code());
        body.extend_from_slice(&self.target_address());
        body.extend_from_slice(&self.data);

        if self.command == Command::Verify {
            for byte in &mut body {
                *byte = verify_encode(*byte);
            }
        }

        body
    }

    /// Checksum over the length field and the encoded body.
    pub fn checksum(&self) -> u8 {
        let mut covered = Vec::with_capacity(1 + HEADER_LEN + self.data.len());
        covered.push(self.length());
        covered.extend_from_slice(&self.body());
        checksum(&covered)
    }

    /// Number of bytes on the wire.
    pub fn wire_len(&self) -> usize {
        usize::from(self.length()) + FRAMING_LEN
    }

    /// Build the complete packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body();
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&START_ID);
        buf.push(self.length());
        buf.extend_from_slice(&body);

        // Trailing checksum covers everything after the start ID
        let cs = checksum(&buf[START_ID.len()..]);
        buf.push(cs);

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ihex::RecordType;

    fn record(address: u16, data: &[u8]) -> HexRecord {
        HexRecord {
            byte_count: data.len() as u8,
            address,
            record_type: RecordType::Data,
            data: data.to_vec(),
            checksum: 0,
        }
    }

    fn sum(bytes: &[u8]) -> u8 {
        bytes
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::Erase.code(), b'E');
        assert_eq!(Command::Write.code(), b'W');
        assert_eq!(Command::Verify.code(), b'V');
        assert_eq!(Command::Run.code(), b'R');
        assert_eq!(Command::Verify.to_string(), "V");
    }

    #[test]
    fn test_erase_packet_shape() {
        let packet = Packet::build(Command::Erase, None).unwrap();
        assert_eq!(packet.length(), 6);
        assert_eq!(packet.command(), Command::Erase);
        assert_eq!(packet.data(), &[0x00]);
        assert_eq!(packet.target_address(), [0, 0, 0, 0]);
        assert_eq!(
            packet.to_bytes(),
            vec![0x07, 0x0E, 0x06, b'E', 0x00, 0x00, 0x00, 0x00, 0x00, 0xB5]
        );
        assert_eq!(packet.wire_len(), 10);
    }

    #[test]
    fn test_erase_ignores_record() {
        let rec = record(0x1234, &[1, 2, 3]);
        let packet = Packet::build(Command::Erase, Some(&rec)).unwrap();
        assert_eq!(packet, Packet::erase());
    }

    #[test]
    fn test_run_packet_shape() {
        let packet = Packet::run();
        assert_eq!(packet.length(), 5);
        assert!(packet.data().is_empty());
        assert_eq!(
            packet.to_bytes(),
            vec![0x07, 0x0E, 0x05, b'R', 0x00, 0x00, 0x00, 0x00, 0xA9]
        );
    }

    #[test]
    fn test_write_packet_layout() {
        let rec = record(0x8040, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let packet = Packet::write(&rec).unwrap();
        let bytes = packet.to_bytes();

        assert_eq!(packet.length(), 9);
        assert_eq!(bytes.len(), usize::from(packet.length()) + 4);
        assert_eq!(&bytes[0..2], &START_ID);
        assert_eq!(bytes[2], 9);
        assert_eq!(bytes[3], b'W');
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x80, 0x40]);
        assert_eq!(&bytes[8..12], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(*bytes.last().unwrap(), packet.checksum());
        // Length field + body + checksum sums to zero
        assert_eq!(sum(&bytes[2..]), 0);
    }

    #[test]
    fn test_write_packet_is_deterministic() {
        let rec = record(0x0010, &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let first = Packet::write(&rec).unwrap().to_bytes();
        let second = Packet::write(&rec).unwrap().to_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn test_verify_body_is_rotated() {
        let rec = record(0x0102, &[0x01, 0x80, 0xFF]);
        let verify = Packet::verify(&rec).unwrap();
        let body = verify.body();

        // 'V' = 0x56 rotated left by 3 -> 0xB2
        assert_eq!(body[0], 0xB2);
        assert_eq!(&body[1..5], &[0x00, 0x00, 0x08, 0x10]);
        assert_eq!(&body[5..], &[0x08, 0x04, 0xFF]);
        assert_eq!(verify.length(), 8);

        let bytes = verify.to_bytes();
        assert_eq!(bytes[2], 8, "length field is not rotated");
        assert_eq!(sum(&bytes[2..]), 0);
    }

    #[test]
    fn test_verify_body_decodes_to_verify_command() {
        let rec = record(0x2000, &[0x10, 0x20, 0x30]);
        let decoded: Vec<u8> = Packet::verify(&rec)
            .unwrap()
            .body()
            .into_iter()
            .map(verify_decode)
            .collect();
        let mut expected = vec![b'V', 0x00, 0x00, 0x20, 0x00];
        expected.extend_from_slice(&[0x10, 0x20, 0x30]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_verify_rotation_is_invertible() {
        for byte in 0..=u8::MAX {
            assert_eq!(verify_decode(verify_encode(byte)), byte);
            assert_eq!(
                verify_encode(byte),
                ((u16::from(byte) << 3) as u8) | (byte >> 5)
            );
        }
    }

    #[test]
    fn test_write_and_verify_checksums_differ() {
        let rec = record(0x0000, &[0x12, 0x34]);
        let write = Packet::write(&rec).unwrap();
        let verify = Packet::verify(&rec).unwrap();
        assert_ne!(write.checksum(), verify.checksum());
    }

    #[test]
    fn test_write_requires_record() {
        let err = Packet::build(Command::Write, None).unwrap_err();
        assert!(matches!(err, Error::MissingRecord(Command::Write)));
        let err = Packet::build(Command::Verify, None).unwrap_err();
        assert!(matches!(err, Error::MissingRecord(Command::Verify)));
    }

    #[test]
    fn test_record_length_limit() {
        let rec = record(0, &[0xAA; MAX_DATA_LEN]);
        let packet = Packet::write(&rec).unwrap();
        assert_eq!(packet.length(), 0xFF);
        assert_eq!(packet.wire_len(), 259);

        let rec = HexRecord {
            byte_count: 251,
            data: vec![0xAA; 251],
            ..record(0, &[])
        };
        let err = Packet::write(&rec).unwrap_err();
        assert!(matches!(err, Error::RecordTooLong { len: 251, max: 250 }));
    }
}
