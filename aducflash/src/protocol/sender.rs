//! Packet transmission and response classification.

use std::io::{Read, Write};

use log::trace;

use crate::error::{Error, Result};
use crate::protocol::packet::{Command, Packet};

/// Bootloader acknowledge.
pub const ACK: u8 = 0x06;

/// Bootloader rejection (BEL).
pub const NACK: u8 = 0x07;

/// Largest reply taken in a single read.
pub const MAX_RESPONSE_LEN: usize = 255;

/// Bootloader reply to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Packet accepted.
    Ack,
    /// Packet rejected.
    Nack,
    /// Anything else. Holds the first byte, `None` if nothing arrived.
    Undefined(Option<u8>),
}

impl Response {
    /// Classify a reply by its first byte.
    pub fn classify(reply: &[u8]) -> Self {
        match reply.first() {
            Some(&ACK) => Self::Ack,
            Some(&NACK) => Self::Nack,
            other => Self::Undefined(other.copied()),
        }
    }

    /// Turn anything but an ACK into an error for `command`.
    pub fn into_result(self, command: Command) -> Result<()> {
        match self {
            Self::Ack => Ok(()),
            Self::Nack => Err(Error::Nack(command)),
            Self::Undefined(byte) => Err(Error::UndefinedResponse { command, byte }),
        }
    }
}

/// Send `packet` and read the reply.
///
/// The reply is taken from a single read of at most [`MAX_RESPONSE_LEN`]
/// bytes. Nothing is retried.
pub fn send<P: Read + Write + ?Sized>(port: &mut P, packet: &Packet) -> Result<Response> {
    let bytes = packet.to_bytes();
    trace!("TX {} ({} bytes): {:02X?}", packet.command(), bytes.len(), bytes);

    port.write_all(&bytes)?;
    port.flush()?;

    let mut reply = [0u8; MAX_RESPONSE_LEN];
    let n = port.read(&mut reply)?;
    trace!("RX {n} bytes: {:02X?}", &reply[..n]);

    Ok(Response::classify(&reply[..n]))
}
