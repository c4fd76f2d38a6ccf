// Alignment helpers shared by the scanners and the wire encoders.
// `align` must be a power of two everywhere in here.

pub fn round_up(x: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (x + (align - 1)) & !(align - 1)
}

/// Number of filler bytes needed to move `pos` onto an `align` boundary.
pub fn pad_len(pos: u64, align: u64) -> usize {
    debug_assert!(align.is_power_of_two());
    ((align - (pos & (align - 1))) & (align - 1)) as usize
}

/// Append zero bytes to `buf` until its length is a multiple of 4.
pub fn zero_pad4(buf: &mut Vec<u8>) {
    let pad = pad_len(buf.len() as u64, 4);
    buf.resize(buf.len() + pad, 0);
}

/// Plain byte sum, wrapping, as used by the touch controller checksums.
pub fn byte_sum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}
