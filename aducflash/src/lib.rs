//! # aducflash
//!
//! A library for programming Analog Devices ADuC702x microcontrollers
//! through their on-chip serial download bootloader.
//!
//! This crate provides:
//!
//! - Intel HEX record decoding
//! - Bootloader packet framing, checksums and the verify encoding
//! - The autobaud handshake and device ID read
//! - Erase, write, verify and run sessions over a serial port
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use aducflash::{Flasher, HexFile, Operation, OperationSet, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut hex = HexFile::open("firmware.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyS0", 9600);
//!         let mut flasher = Flasher::open(&config)?;
//!         println!("Device ID: {}", flasher.connect()?);
//!
//!         let ops: OperationSet = [Operation::Erase, Operation::Write, Operation::Verify, Operation::Run]
//!             .into_iter()
//!             .collect();
//!         flasher.execute(ops, Some(&mut hex), |event| println!("{event:?}"))?;
//!         flasher.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// List the serial ports present on this host.
#[cfg(feature = "native")]
pub fn list_ports() -> Result<Vec<PortInfo>> {
    NativePortEnumerator::list_ports()
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    flasher::{FlashEvent, Flasher, Operation, OperationSet},
    image::ihex::{Decoded, HexFile, HexLine, HexRecord, HexSummary, RecordType, decode_line},
    port::{
        ALTERNATE_BAUD, DEFAULT_BAUD, DEFAULT_PORT, LineSettings, LineSnapshot, Port,
        PortEnumerator, PortInfo, SerialConfig,
    },
    protocol::{Command, MAX_DATA_LEN, Packet, Response},
    transport::{DeviceId, Transport},
};
