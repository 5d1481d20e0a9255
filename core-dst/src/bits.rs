//! Bit-order helpers for DSD byte streams.

/// Reverse the bit order of every byte, turning MSB-first DSD into
/// LSB-first DSD and back.
pub fn reverse_bits_in_place(buf: &mut [u8]) {
    for byte in buf {
        *byte = byte.reverse_bits();
    }
}
