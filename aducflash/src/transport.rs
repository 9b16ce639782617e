//! Serial transport: line discipline ownership and the autobaud handshake.
//!
//! A [`Transport`] saves the line state of the port when it is acquired,
//! switches the line to the bootloader configuration and puts the saved
//! state back exactly once, either through [`Transport::close`] or when it
//! is dropped.

use std::fmt;
use std::io;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::{LineSettings, LineSnapshot, Port};
use crate::protocol::{Packet, Response, sender};

/// Byte that triggers the bootloader autobaud detector (backspace).
pub const SYNC_BYTE: u8 = 0x08;

/// How long the bootloader gets to answer the sync byte.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Length of the device ID reply.
pub const DEVICE_ID_LEN: usize = 24;

/// Device identification sent by the bootloader after autobaud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub [u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// Raw reply bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.0);
        write!(
            f,
            "{}",
            text.trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
        )
    }
}

/// Owner of an open port for the duration of a session.
pub struct Transport<P: Port> {
    port: P,
    original: LineSnapshot,
    restored: bool,
}

impl<P: Port> Transport<P> {
    /// Take over `port`, saving its line state, and apply `settings`.
    ///
    /// If applying fails the saved state is put back before the error is
    /// returned.
    pub fn acquire(mut port: P, settings: &LineSettings) -> Result<Self> {
        let original = port.save_line()?;
        debug!("Saved line state of {}", port.name());

        let mut transport = Self {
            port,
            original,
            restored: false,
        };
        transport
            .port
            .apply_line_settings(settings)?;
        Ok(transport)
    }

    /// Line state saved at acquisition.
    pub fn original_line(&self) -> &LineSnapshot {
        &self.original
    }

    /// Run the autobaud handshake and read the device ID.
    ///
    /// The ID read has no timeout of its own: a bootloader that sends fewer
    /// than [`DEVICE_ID_LEN`] bytes blocks here unless the port was opened
    /// with a response timeout.
    pub fn handshake(&mut self) -> Result<DeviceId> {
        info!("Synchronizing with bootloader on {}...", self.port.name());

        self.port.clear_input()?;
        self.port
            .write_all_bytes(&[SYNC_BYTE])?;

        let ready = self
            .port
            .wait_readable(HANDSHAKE_TIMEOUT)
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;
        if !ready {
            return Err(Error::HandshakeTimeout(HANDSHAKE_TIMEOUT));
        }

        let mut id = [0u8; DEVICE_ID_LEN];
        self.port
            .read_exact(&mut id)
            .map_err(|e| match map_io(e) {
                Error::Io(e) => Error::HandshakeFailed(format!("reading device ID: {e}")),
                other => other,
            })?;

        let id = DeviceId(id);
        info!("Device ID: {id}");
        Ok(id)
    }

    /// Send a packet and classify the reply.
    pub fn send(&mut self, packet: &Packet) -> Result<Response> {
        sender::send(&mut self.port, packet).map_err(|e| match e {
            Error::Io(e) => map_io(e),
            other => other,
        })
    }

    /// Put the saved line state back. Only the first call has an effect.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        debug!("Restoring line state of {}", self.port.name());
        self.port
            .restore_line(&self.original)
    }

    /// Restore the line state and close the port.
    pub fn close(mut self) -> Result<()> {
        let restored = self.restore();
        let closed = self.port.close();
        restored.and(closed)
    }
}

impl<P: Port> Drop for Transport<P> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore line state of {}: {e}", self.port.name());
        }
    }
}

/// Report I/O failures caused by an interrupt request as such.
fn map_io(e: io::Error) -> Error {
    if crate::is_interrupted_requested() {
        Error::Interrupted
    } else {
        Error::Io(e)
    }
}
