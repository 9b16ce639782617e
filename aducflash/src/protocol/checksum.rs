//! Packet checksum.

/// Two's complement of the 8-bit sum of `bytes`.
///
/// Appending the result to `bytes` makes the whole sequence sum to zero
/// modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}
