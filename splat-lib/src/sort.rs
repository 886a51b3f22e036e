//! Camera-relative depth sorting of a splat buffer.

use crate::config::SortConfig;
use crate::radix::{key_index, pack_key, sort_keys};
use crate::row::{decode_center, decode_row, rows_in};
use crate::structures::{SortedAttributes, ViewProj};
use std::time::Instant;

/// Third row of the combined matrix: maps a world position to unnormalized
/// camera-space depth.
#[inline]
fn forward_axis(view: &ViewProj) -> [f32; 3] {
    [view[2], view[6], view[10]]
}

fn normalized(v: [f32; 3]) -> Option<[f32; 3]> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 0.0 && len.is_finite() {
        Some([v[0] / len, v[1] / len, v[2] / len])
    } else {
        None
    }
}

/// Owns the current splat buffer and the reusable key storage; all state the
/// sort needs between calls lives here.
#[derive(Debug, Default)]
pub struct DepthSorter {
    config: SortConfig,
    buffer: Vec<u8>,
    vertex_count: usize,
    keys: Vec<u64>,
    scratch: Vec<u64>,
    last_view: Option<ViewProj>,
    /// Splat data changed since the last emitted sort.
    dirty: bool,
}

impl DepthSorter {
    pub fn new(config: SortConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SortConfig) {
        self.config = config;
    }

    /// Number of rows the next sort may use, before any cap.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Replaces the splat buffer wholesale.
    pub fn set_buffer(&mut self, buffer: Vec<u8>, vertex_count: usize) {
        self.buffer = buffer;
        self.vertex_count = vertex_count.min(rows_in(self.buffer.len()));
        self.dirty = true;
    }

    /// Appends newly completed rows and adopts the new cumulative count.
    pub fn extend(&mut self, rows: &[u8], vertex_count: usize) {
        self.buffer.extend_from_slice(rows);
        self.vertex_count = vertex_count.min(rows_in(self.buffer.len()));
        self.dirty = true;
    }

    /// Updates the usable row count without touching the bytes. Counts past
    /// the end of the buffer are clamped.
    pub fn set_vertex_count(&mut self, vertex_count: usize) {
        let vertex_count = vertex_count.min(rows_in(self.buffer.len()));
        if vertex_count != self.vertex_count {
            self.vertex_count = vertex_count;
            self.dirty = true;
        }
    }

    /// Sorts against `view` and returns attributes farthest first.
    ///
    /// Returns `None` when there is nothing to sort, or when the data is
    /// unchanged and the camera's forward axis has barely moved since the
    /// last emitted sort.
    pub fn sort(&mut self, view: &ViewProj, max_splats: Option<usize>) -> Option<SortedAttributes> {
        let cap = max_splats.or(self.config.max_splats).unwrap_or(usize::MAX);
        let count = self.vertex_count.min(cap).min(u32::MAX as usize);
        if count == 0 {
            return None;
        }

        if self.keys.len() != count {
            self.keys = Vec::with_capacity(count);
            self.keys.extend((0..count as u32).map(|i| pack_key(0.0, i)));
        } else if !self.dirty && self.camera_coherent(view) {
            log::trace!("Skipping sort, camera forward axis unchanged");
            return None;
        }

        let start = Instant::now();
        let [fx, fy, fz] = forward_axis(view);
        for (i, key) in self.keys.iter_mut().enumerate() {
            let [x, y, z] = decode_center(&self.buffer, i);
            *key = pack_key(fx * x + fy * y + fz * z, i as u32);
        }
        sort_keys(&mut self.keys, &mut self.scratch);

        let mut attributes = SortedAttributes::with_capacity(count, *view);
        for &key in &self.keys {
            attributes.push(&decode_row(&self.buffer, key_index(key)));
        }

        self.last_view = Some(*view);
        self.dirty = false;
        log::debug!("Sorted {} splats in {:?}", count, start.elapsed());
        Some(attributes)
    }

    fn camera_coherent(&self, view: &ViewProj) -> bool {
        let Some(last) = self.last_view.as_ref() else {
            return false;
        };
        let (Some(a), Some(b)) = (normalized(forward_axis(last)), normalized(forward_axis(view)))
        else {
            return false;
        };
        let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        (dot - 1.0).abs() < self.config.coherence_threshold
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::row::{encode_row, SplatRow, ROW_LENGTH};

    /// Looks straight down +Z: depth is the world z coordinate.
    pub(crate) const LOOK_Z: ViewProj = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    /// Looks down +X.
    pub(crate) const LOOK_X: ViewProj = [
        0.0, 0.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    pub(crate) fn rows_at(centers: &[[f32; 3]]) -> Vec<u8> {
        let mut buffer = vec![0u8; centers.len() * ROW_LENGTH];
        for (i, &center) in centers.iter().enumerate() {
            let row = SplatRow {
                center,
                scale: [i as f32; 3],
                color: [i as u8, 0, 255, 255],
                rotation: [128, 128, 128, 255],
            };
            encode_row(&mut buffer, i * ROW_LENGTH, &row);
        }
        buffer
    }

    fn centers(attrs: &SortedAttributes) -> Vec<[f32; 3]> {
        attrs
            .center
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    #[test]
    fn test_farthest_first() {
        let mut sorter = DepthSorter::default();
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 0.0], [0.0, 0.0, 5.0], [0.0, 0.0, 10.0]]), 3);

        let attrs = sorter.sort(&LOOK_Z, None).unwrap();
        let zs: Vec<f32> = centers(&attrs).iter().map(|c| c[2]).collect();
        assert_eq!(zs, vec![10.0, 5.0, 0.0]);

        // Attributes travel with their row.
        assert_eq!(&attrs.scale[0..3], &[2.0, 2.0, 2.0]);
        assert_eq!(attrs.color[0], 2.0 / 255.0);
        assert_eq!(&attrs.quat[0..4], &[0.0, 0.0, 0.0, 127.0 / 128.0]);
        assert_eq!(attrs.view_proj, LOOK_Z);

        // Forcing a re-sort yields the same order.
        sorter.set_vertex_count(2);
        sorter.set_vertex_count(3);
        let again = sorter.sort(&LOOK_Z, None).unwrap();
        assert_eq!(centers(&again), centers(&attrs));
    }

    #[test]
    fn test_output_lengths_and_permutation() {
        let input: Vec<[f32; 3]> = (0..50)
            .map(|i| [(i * 7 % 13) as f32, (i % 5) as f32, ((i * 31) % 17) as f32 - 8.0])
            .collect();
        let mut sorter = DepthSorter::default();
        sorter.set_buffer(rows_at(&input), input.len());

        let view = [
            0.3, 0.1, 0.5, 0.0, //
            0.2, 0.9, -0.3, 0.0, //
            -0.7, 0.1, 0.8, 0.0, //
            0.0, 0.0, 4.0, 1.0,
        ];
        let attrs = sorter.sort(&view, None).unwrap();
        assert_eq!(attrs.quat.len(), 4 * 50);
        assert_eq!(attrs.scale.len(), 3 * 50);
        assert_eq!(attrs.center.len(), 3 * 50);
        assert_eq!(attrs.color.len(), 4 * 50);

        let mut got = centers(&attrs);
        let mut want = input.clone();
        let by_bits = |a: &[f32; 3], b: &[f32; 3]| {
            a.map(f32::to_bits).cmp(&b.map(f32::to_bits))
        };
        got.sort_by(by_bits);
        want.sort_by(by_bits);
        assert_eq!(got, want);

        let depth = |c: &[f32; 3]| view[2] * c[0] + view[6] * c[1] + view[10] * c[2];
        let sorted = centers(&attrs);
        for pair in sorted.windows(2) {
            assert!(depth(&pair[0]) >= depth(&pair[1]));
        }
    }

    #[test]
    fn test_max_splats_caps_output() {
        let mut sorter = DepthSorter::new(SortConfig::default().with_max_splats(2));
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0], [0.0, 0.0, 2.0], [0.0, 0.0, 3.0]]), 3);

        let attrs = sorter.sort(&LOOK_Z, None).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(centers(&attrs), vec![[0.0, 0.0, 2.0], [0.0, 0.0, 1.0]]);

        // A per-request cap wins over the configured one and resizes the keys.
        let attrs = sorter.sort(&LOOK_Z, Some(3)).unwrap();
        assert_eq!(attrs.len(), 3);
        let attrs = sorter.sort(&LOOK_Z, Some(1)).unwrap();
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_identical_view_is_skipped() {
        let mut sorter = DepthSorter::default();
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]), 2);

        assert!(sorter.sort(&LOOK_Z, None).is_some());
        assert!(sorter.sort(&LOOK_Z, None).is_none());

        // Scaling the forward axis does not count as motion.
        let mut scaled = LOOK_Z;
        scaled[10] = 3.0;
        assert!(sorter.sort(&scaled, None).is_none());

        assert!(sorter.sort(&LOOK_X, None).is_some());
    }

    /// LOOK_Z turned about the y axis so that `dot(forward, +z) == cos`.
    fn turned(cos: f32) -> ViewProj {
        let mut view = LOOK_Z;
        view[2] = (1.0 - cos * cos).sqrt();
        view[10] = cos;
        view
    }

    #[test]
    fn test_coherence_threshold_boundary() {
        let config = SortConfig::default().with_coherence_threshold(0.05);
        let mut sorter = DepthSorter::new(config);
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]), 2);
        assert!(sorter.sort(&LOOK_Z, None).is_some());

        // |0.97 - 1| = 0.03 is inside the threshold.
        assert!(sorter.sort(&turned(0.97), None).is_none());
        // |0.93 - 1| = 0.07 is outside it.
        assert!(sorter.sort(&turned(0.93), None).is_some());

        // The default threshold treats the smaller turn as motion.
        let mut sorter = DepthSorter::default();
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]), 2);
        assert!(sorter.sort(&LOOK_Z, None).is_some());
        assert!(sorter.sort(&turned(0.97), None).is_some());
        // Relative to the last emitted view this is a turn of about 2 degrees.
        assert!(sorter.sort(&turned(0.96), None).is_none());
    }

    #[test]
    fn test_new_data_defeats_skip() {
        let mut sorter = DepthSorter::default();
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0], [0.0, 0.0, 2.0]]), 2);
        assert!(sorter.sort(&LOOK_Z, None).is_some());

        sorter.set_buffer(rows_at(&[[0.0, 0.0, 4.0], [0.0, 0.0, 3.0]]), 2);
        let attrs = sorter.sort(&LOOK_Z, None).unwrap();
        assert_eq!(attrs.center[2], 4.0);
    }

    #[test]
    fn test_zero_threshold_always_sorts() {
        let mut sorter = DepthSorter::new(SortConfig::default().with_coherence_threshold(0.0));
        sorter.set_buffer(rows_at(&[[0.0, 0.0, 1.0]]), 1);
        assert!(sorter.sort(&LOOK_Z, None).is_some());
        assert!(sorter.sort(&LOOK_Z, None).is_some());
    }

    #[test]
    fn test_empty_buffer_is_noop() {
        let mut sorter = DepthSorter::default();
        assert!(sorter.sort(&LOOK_Z, None).is_none());
        sorter.set_buffer(vec![0u8; 31], 1);
        assert_eq!(sorter.vertex_count(), 0);
        assert!(sorter.sort(&LOOK_Z, None).is_none());
    }

    #[test]
    fn test_extend_appends_rows() {
        let all = rows_at(&[[0.0, 0.0, 1.0], [0.0, 0.0, 2.0], [0.0, 0.0, 3.0]]);
        let mut sorter = DepthSorter::default();
        sorter.extend(&all[..ROW_LENGTH + 5], 1);
        assert_eq!(sorter.vertex_count(), 1);
        sorter.extend(&all[ROW_LENGTH + 5..], 3);
        assert_eq!(sorter.vertex_count(), 3);

        let attrs = sorter.sort(&LOOK_Z, None).unwrap();
        assert_eq!(attrs.center[2], 3.0);
    }
}
