/// Zeroth-order spherical harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_8;

/// Scale written for PLY vertices that carry no `scale_*` properties.
pub const DEFAULT_SCALE: f32 = 0.01;

/// Rotation bytes written for PLY vertices that carry no `rot_*` properties.
pub const DEFAULT_ROTATION: [u8; 4] = [255, 0, 0, 0];

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

/// Truncates toward zero, then clamps. Used for imported color and alpha.
#[inline]
pub(crate) fn truncate_u8(x: f32) -> u8 {
    x.trunc().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Quantizes one quaternion component in [-1, 1] to `round(q * 128 + 128)`.
#[inline]
pub fn quantize_unit(x: f32) -> u8 {
    clamp_u8(x * 128.0 + 128.0)
}

/// Inverse of [`quantize_unit`]; always lands in [-1, 1).
#[inline]
pub fn unquantize_unit(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

#[inline]
pub(crate) fn normalize_quat(q: [f32; 4]) -> Option<[f32; 4]> {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some([q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm])
    } else {
        None
    }
}

/// Normalizes `q` and quantizes each component. Degenerate quaternions map to
/// [`DEFAULT_ROTATION`].
pub fn quantize_rotation(q: [f32; 4]) -> [u8; 4] {
    match normalize_quat(q) {
        Some(n) => n.map(quantize_unit),
        None => DEFAULT_ROTATION,
    }
}
