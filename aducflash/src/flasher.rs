//! Session orchestration: erase, write, verify and run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aducflash::{Flasher, HexFile, Operation, OperationSet, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyS0", 9600);
//!     let mut flasher = Flasher::open(&config)?;
//!     let id = flasher.connect()?;
//!     println!("Device ID: {id}");
//!
//!     let mut hex = HexFile::open("firmware.hex")?;
//!     let ops: OperationSet = [Operation::Erase, Operation::Write, Operation::Run]
//!         .into_iter()
//!         .collect();
//!     flasher.execute(ops, Some(&mut hex), |event| println!("{event:?}"))?;
//!
//!     flasher.close()?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::io::{BufRead, Seek};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::ihex::{Decoded, HexFile, RecordType};
use crate::port::{LineSettings, Port};
use crate::protocol::{Command, Packet};
use crate::transport::{DeviceId, Transport};

/// A phase of a flashing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Mass erase of the user flash.
    Erase,
    /// Program every data record.
    Write,
    /// Compare every data record against flash.
    Verify,
    /// Start the user code.
    Run,
}

impl Operation {
    /// All operations, in session order.
    pub const ALL: [Self; 4] = [Self::Erase, Self::Write, Self::Verify, Self::Run];

    fn bit(self) -> u8 {
        match self {
            Self::Erase => 0x01,
            Self::Write => 0x02,
            Self::Verify => 0x04,
            Self::Run => 0x08,
        }
    }

    /// Bootloader command carrying this operation.
    pub fn command(self) -> Command {
        match self {
            Self::Erase => Command::Erase,
            Self::Write => Command::Write,
            Self::Verify => Command::Verify,
            Self::Run => Command::Run,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Erase => "erase",
            Self::Write => "write",
            Self::Verify => "verify",
            Self::Run => "run",
        };
        f.write_str(name)
    }
}

/// Set of requested operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationSet(u8);

impl OperationSet {
    /// No operations.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add an operation.
    pub fn insert(&mut self, op: Operation) {
        self.0 |= op.bit();
    }

    /// Remove an operation.
    pub fn remove(&mut self, op: Operation) {
        self.0 &= !op.bit();
    }

    /// Copy of this set with `op` added.
    #[must_use]
    pub fn with(mut self, op: Operation) -> Self {
        self.insert(op);
        self
    }

    /// Copy of this set with `op` removed.
    #[must_use]
    pub fn without(mut self, op: Operation) -> Self {
        self.remove(op);
        self
    }

    /// Whether `op` is requested.
    pub fn contains(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    /// Whether nothing is requested.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether a hex image is needed.
    pub fn needs_image(self) -> bool {
        self.contains(Operation::Write) || self.contains(Operation::Verify)
    }

    /// Requested operations, in session order.
    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL
            .into_iter()
            .filter(move |op| self.contains(*op))
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut set = Self::empty();
        for op in iter {
            set.insert(op);
        }
        set
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .iter()
            .map(|op| op.to_string())
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Progress reported while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// Mass erase acknowledged.
    EraseDone,
    /// A write or verify pass over the image begins.
    PassStarted(Operation),
    /// A data record was acknowledged.
    RecordSent {
        /// Write or verify.
        operation: Operation,
        /// Line of the record in the image.
        line: usize,
        /// Load address.
        address: u16,
        /// Number of data bytes.
        len: usize,
    },
    /// A non-data record was passed over.
    RecordSkipped {
        /// Line of the record in the image.
        line: usize,
        /// Its type.
        record_type: RecordType,
    },
    /// A write or verify pass finished.
    PassDone {
        /// Write or verify.
        operation: Operation,
        /// Number of records sent.
        records: usize,
    },
    /// Run acknowledged.
    RunDone,
}

/// ADuC702x flasher.
///
/// Generic over the port type `P`. The line settings the port had when the
/// flasher was created are restored when it is closed or dropped, whatever
/// the outcome of the session.
pub struct Flasher<P: Port> {
    transport: Transport<P>,
}

impl<P: Port> Flasher<P> {
    /// Take over `port` and switch it to the raw bootloader line.
    pub fn new(port: P, baud_rate: u32) -> Result<Self> {
        Self::with_line(port, &LineSettings::raw(baud_rate))
    }

    /// Take over `port` and switch it to `settings`.
    pub fn with_line(port: P, settings: &LineSettings) -> Result<Self> {
        let transport = Transport::acquire(port, settings)?;
        Ok(Self { transport })
    }

    /// Get the transport.
    pub fn transport(&self) -> &Transport<P> {
        &self.transport
    }

    /// Synchronize with the bootloader and read its device ID.
    pub fn connect(&mut self) -> Result<DeviceId> {
        self.transport.handshake()
    }

    /// Mass erase the user flash.
    pub fn erase(&mut self) -> Result<()> {
        info!("Erasing user flash...");
        self.transact(&Packet::erase())?;
        info!("Flash erased");
        Ok(())
    }

    /// Start the user code.
    pub fn run(&mut self) -> Result<()> {
        info!("Starting user code...");
        self.transact(&Packet::run())
    }

    /// Run the requested operations.
    ///
    /// Erase comes first, then a write pass and a verify pass over `hex`,
    /// then run. The first failure ends the session; nothing is retried and
    /// later phases (including run) are not attempted.
    pub fn execute<R, F>(
        &mut self,
        mut ops: OperationSet,
        hex: Option<&mut HexFile<R>>,
        mut progress: F,
    ) -> Result<()>
    where
        R: BufRead + Seek,
        F: FnMut(FlashEvent),
    {
        debug!("Executing {ops}");

        if ops.needs_image() && hex.is_none() {
            return Err(Error::Config(format!("{ops} requires a hex image")));
        }

        if ops.contains(Operation::Erase) {
            self.erase()?;
            ops.remove(Operation::Erase);
            progress(FlashEvent::EraseDone);
        }

        if let Some(hex) = hex {
            for op in [Operation::Write, Operation::Verify] {
                if ops.contains(op) {
                    self.pass(op, hex, &mut progress)?;
                    ops.remove(op);
                }
            }
        }

        if ops.contains(Operation::Run) {
            self.run()?;
            ops.remove(Operation::Run);
            progress(FlashEvent::RunDone);
        }

        Ok(())
    }

    /// Restore the line settings and close the port.
    pub fn close(self) -> Result<()> {
        self.transport.close()
    }

    /// One walk over the image sending a packet per data record.
    fn pass<R, F>(&mut self, op: Operation, hex: &mut HexFile<R>, progress: &mut F) -> Result<()>
    where
        R: BufRead + Seek,
        F: FnMut(FlashEvent),
    {
        info!("Starting {op} pass");
        hex.rewind()?;
        progress(FlashEvent::PassStarted(op));

        let mut records = 0;
        while let Some(line) = hex.next_line()? {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let record = match line.decoded {
                Decoded::Record(record) => record,
                Decoded::Skip(record_type) => {
                    warn!("Skipping line {}: record type {record_type}", line.line);
                    progress(FlashEvent::RecordSkipped {
                        line: line.line,
                        record_type,
                    });
                    continue;
                },
            };

            let packet = Packet::build(op.command(), Some(&record))?;
            self.transact(&packet)?;
            records += 1;

            progress(FlashEvent::RecordSent {
                operation: op,
                line: line.line,
                address: record.address,
                len: record.data.len(),
            });
        }

        hex.rewind()?;
        info!("{op} pass complete: {records} records");
        progress(FlashEvent::PassDone {
            operation: op,
            records,
        });
        Ok(())
    }

    /// Send a packet and require an ACK.
    fn transact(&mut self, packet: &Packet) -> Result<()> {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        let response = self.transport.send(packet)?;
        debug!("{} -> {response:?}", packet.command());
        response.into_result(packet.command())
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{Flasher, Result};
    use crate::port::{NativePort, SerialConfig};

    impl Flasher<NativePort> {
        /// Open the serial port described by `config`.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            let port = NativePort::open(config)?;
            Self::with_line(port, &config.line_settings())
        }
    }
}
