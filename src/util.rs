//! Small binary helpers shared by the parser, the resize engine and the
//! selector rewrite.
//!
//! Reads and writes go through `byteorder` so unaligned little-endian access
//! compiles to a single load or store, and terminator searches use `memchr`.

use byteorder::{ByteOrder, LittleEndian};

/// Page granularity used when rounding segment virtual sizes.
pub const SEGMENT_ALIGNMENT: u64 = 0x1000;

// =============================================================================
// Unaligned Reads and Writes
// =============================================================================

/// Reads a little-endian u64 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 8`.
#[inline(always)]
pub fn read_u64_le(data: &[u8]) -> u64 {
    LittleEndian::read_u64(data)
}

/// Appends a little-endian u64 to a byte vector.
#[inline(always)]
pub fn push_u64_le(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    out.extend_from_slice(&buf);
}

// =============================================================================
// Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns `None` when the slice holds no terminator.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> Option<usize> {
    memchr::memchr(0, data)
}

/// Returns the string stored in a fixed-width, null-padded name field.
pub fn fixed_name(bytes: &[u8; 16]) -> &str {
    let end = memchr_null(bytes).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Builds a fixed-width, null-padded name field, truncating at 16 bytes.
pub fn to_fixed_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
///
/// # Panics
///
/// Debug assertion fails if `alignment` is not a power of 2.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given power-of-two alignment.
#[inline(always)]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    debug_assert!(alignment.is_power_of_two());
    (value & (alignment - 1)) == 0
}
