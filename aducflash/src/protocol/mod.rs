//! ADuC702x serial download protocol.
//!
//! ## Packet Format
//!
//! ```text
//! +----------+--------+-----+---------------+-----------+----------+
//! | Start ID | Length | CMD |    Address    |   Data    | Checksum |
//! +----------+--------+-----+---------------+-----------+----------+
//! | 2 bytes  | 1      | 1   | 4 bytes (BE)  | Length-5  | 1        |
//! +----------+--------+-----+---------------+-----------+----------+
//! |  07 0E   | N      | E/W/V/R | 00 00 hi lo | payload | -sum     |
//! +----------+--------+-----+---------------+-----------+----------+
//! ```
//!
//! `Length` counts the command, address and data bytes. The checksum is the
//! two's complement of the sum of `Length` and those bytes. Verify packets
//! carry their body rotated left by three bits.

pub mod checksum;
pub mod packet;
pub mod sender;

pub use checksum::checksum;
pub use packet::{Command, MAX_DATA_LEN, Packet};
pub use sender::{Response, send};
