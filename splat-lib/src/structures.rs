use crate::common::{clamp_u8, quantize_unit};
use crate::row::{encode_row, SplatRow, ROW_LENGTH};

/// Row-major `projection * view * model` for one render tick.
pub type ViewProj = [f32; 16];

/// De-interleaved per-splat attributes in depth order, ready to bind as
/// instance attributes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SortedAttributes {
    /// 4 per splat, [-1, 1].
    pub quat: Vec<f32>,
    /// 3 per splat.
    pub scale: Vec<f32>,
    /// 3 per splat.
    pub center: Vec<f32>,
    /// 4 per splat, [0, 1].
    pub color: Vec<f32>,
    /// The snapshot these attributes were sorted against.
    pub view_proj: ViewProj,
}

impl SortedAttributes {
    pub fn with_capacity(count: usize, view_proj: ViewProj) -> Self {
        Self {
            quat: Vec::with_capacity(count * 4),
            scale: Vec::with_capacity(count * 3),
            center: Vec::with_capacity(count * 3),
            color: Vec::with_capacity(count * 4),
            view_proj,
        }
    }

    pub fn len(&self) -> usize {
        self.quat.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.quat.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, row: &SplatRow) {
        self.quat.extend_from_slice(&row.quaternion());
        self.scale.extend_from_slice(&row.scale);
        self.center.extend_from_slice(&row.center);
        self.color.extend_from_slice(&row.rgba());
    }

    /// Re-quantizes the attributes into raw rows, in sorted order.
    pub fn to_rows(&self) -> Vec<u8> {
        let count = self.len();
        let mut output = vec![0u8; count * ROW_LENGTH];
        for j in 0..count {
            let q = &self.quat[j * 4..j * 4 + 4];
            let c = &self.color[j * 4..j * 4 + 4];
            let row = SplatRow {
                center: [self.center[j * 3], self.center[j * 3 + 1], self.center[j * 3 + 2]],
                scale: [self.scale[j * 3], self.scale[j * 3 + 1], self.scale[j * 3 + 2]],
                color: [
                    clamp_u8(c[0] * 255.0),
                    clamp_u8(c[1] * 255.0),
                    clamp_u8(c[2] * 255.0),
                    clamp_u8(c[3] * 255.0),
                ],
                rotation: [
                    quantize_unit(q[0]),
                    quantize_unit(q[1]),
                    quantize_unit(q[2]),
                    quantize_unit(q[3]),
                ],
            };
            encode_row(&mut output, j * ROW_LENGTH, &row);
        }
        output
    }
}
