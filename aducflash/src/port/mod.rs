//! Port abstraction for serial communication.
//!
//! The protocol engine only talks to the [`Port`] trait. The native
//! implementation sits on top of the `serialport` crate; tests use an
//! in-memory port.
//!
//! ```text
//! +------------------+
//! |   Flasher        |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |   Transport      |  saves / restores line settings, handshake
//! +--------+---------+
//!          |
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//! +--------+---------+
//! | NativePort       |
//! |  (serialport)    |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the bootloader tooling uses by default.
pub const DEFAULT_BAUD: u32 = 9600;

/// Faster rate supported by the bootloader autobaud detector.
pub const ALTERNATE_BAUD: u32 = 38400;

/// Serial device used when none is configured.
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM1";

/// Serial device used when none is configured.
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyS0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
    /// Give up on a bootloader reply after this long. `None` blocks forever.
    pub response_timeout: Option<Duration>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            response_timeout: None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Line settings described by this configuration.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            flow_control: self.flow_control,
        }
    }
}

/// Snapshot of the line discipline of an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl LineSettings {
    /// Raw 8N1 without flow control, as the bootloader expects.
    pub fn raw(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Line state saved when a session starts and written back when it ends.
#[derive(Debug, Clone)]
pub enum LineSnapshot {
    /// Settings as reported by the driver.
    Settings(LineSettings),
    /// Complete terminal attributes, read before the port was configured.
    #[cfg(all(unix, feature = "native"))]
    Termios(nix::sys::termios::Termios),
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified port trait for serial communication.
///
/// Reads block until at least one byte is available. Implementations may
/// give up earlier when configured with a response timeout.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Current line settings.
    fn line_settings(&mut self) -> Result<LineSettings>;

    /// Reconfigure the line.
    fn apply_line_settings(&mut self, settings: &LineSettings) -> Result<()>;

    /// Save the line state so it can be put back after the session.
    ///
    /// The default records the driver-visible [`LineSettings`].
    fn save_line(&mut self) -> Result<LineSnapshot> {
        Ok(LineSnapshot::Settings(self.line_settings()?))
    }

    /// Put back a state returned by [`Port::save_line`].
    fn restore_line(&mut self, snapshot: &LineSnapshot) -> Result<()> {
        match snapshot {
            LineSnapshot::Settings(settings) => self.apply_line_settings(settings),
            #[cfg(all(unix, feature = "native"))]
            LineSnapshot::Termios(_) => Err(crate::error::Error::Config(format!(
                "{} cannot restore terminal attributes",
                self.name()
            ))),
        }
    }

    /// Discard received but unread data.
    fn clear_input(&mut self) -> Result<()>;

    /// Wait until data can be read. Returns `false` on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Port for &mut P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn line_settings(&mut self) -> Result<LineSettings> {
        (**self).line_settings()
    }

    fn apply_line_settings(&mut self, settings: &LineSettings) -> Result<()> {
        (**self).apply_line_settings(settings)
    }

    fn save_line(&mut self) -> Result<LineSnapshot> {
        (**self).save_line()
    }

    fn restore_line(&mut self, snapshot: &LineSnapshot) -> Result<()> {
        (**self).restore_line(snapshot)
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
