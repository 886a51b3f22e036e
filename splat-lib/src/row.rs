//! The fixed 32-byte splat row and its (de)quantization rules.
//!
//! ```text
//! offset  size  field
//!  0      12    center   3 x f32
//! 12      12    scale    3 x f32 (linear, not log-space)
//! 24       4    color    RGBA u8
//! 28       4    rotation quaternion u8, round(q * 128 + 128)
//! ```
//!
//! Floats use the host byte order, which is little-endian on every target the
//! `.splat` format is produced on.

use crate::common::{quantize_rotation, unquantize_unit};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const ROW_LENGTH: usize = 3 * 4 + 3 * 4 + 4 + 4;
pub const CENTER_OFFSET: usize = 0;
pub const SCALE_OFFSET: usize = 12;
pub const COLOR_OFFSET: usize = 24;
pub const ROTATION_OFFSET: usize = 28;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SplatRow {
    pub center: [f32; 3],
    pub scale: [f32; 3],
    pub color: [u8; 4],
    pub rotation: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<SplatRow>() == ROW_LENGTH);

impl SplatRow {
    pub fn new(center: [f32; 3], scale: [f32; 3], color: [u8; 4], quat: [f32; 4]) -> Self {
        Self {
            center,
            scale,
            color,
            rotation: quantize_rotation(quat),
        }
    }

    /// Rotation components dequantized to [-1, 1]. Not renormalized.
    #[inline]
    pub fn quaternion(&self) -> [f32; 4] {
        self.rotation.map(unquantize_unit)
    }

    /// Color dequantized to [0, 1].
    #[inline]
    pub fn rgba(&self) -> [f32; 4] {
        self.color.map(|c| c as f32 / 255.0)
    }
}

/// Number of complete rows in `len` bytes. Trailing partial bytes are ignored.
#[inline]
pub const fn rows_in(len: usize) -> usize {
    len / ROW_LENGTH
}

/// Writes `row` at byte `offset` of `buffer`.
///
/// Panics if the row does not fit; bounds are the caller's responsibility.
#[inline]
pub fn encode_row(buffer: &mut [u8], offset: usize, row: &SplatRow) {
    buffer[offset..offset + ROW_LENGTH].copy_from_slice(row.as_bytes());
}

/// Reads row number `index` out of `buffer`.
///
/// Panics if the row lies outside the buffer.
#[inline]
pub fn decode_row(buffer: &[u8], index: usize) -> SplatRow {
    let start = index * ROW_LENGTH;
    let mut row = SplatRow::new_zeroed();
    row.as_mut_bytes()
        .copy_from_slice(&buffer[start..start + ROW_LENGTH]);
    row
}

/// Reads only the center of row `index`, skipping the rest of the record.
#[inline]
pub fn decode_center(buffer: &[u8], index: usize) -> [f32; 3] {
    let start = index * ROW_LENGTH + CENTER_OFFSET;
    let mut center = [0.0f32; 3];
    center
        .as_mut_bytes()
        .copy_from_slice(&buffer[start..start + 12]);
    center
}
