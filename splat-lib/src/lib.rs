pub mod common;
pub mod config;
pub mod error;
pub mod ingest;
pub mod ply;
pub mod radix;
pub mod row;
pub mod scheduler;
pub mod sort;
mod structures;
pub mod worker;

pub use config::SortConfig;
pub use error::SplatError;
pub use ingest::{ingest_chunks, CancelFlag, IngestResult, IngestUpdate, StreamIngest};
pub use ply::{import_ply, is_ply};
pub use row::{rows_in, SplatRow, ROW_LENGTH};
pub use scheduler::{SchedulerState, SortScheduler, ViewRequest};
pub use sort::DepthSorter;
pub use structures::{SortedAttributes, ViewProj};
pub use worker::{SortMessage, SortReply, SortWorker};

#[cfg(feature = "async")]
pub use ingest::{fetch_splats, fetch_splats_with, ingest_stream};

/// Loads a splat buffer from file contents: PLY input is imported, anything
/// else is taken as raw rows. A trailing partial row is dropped.
pub fn prepare_rows(raw_data: &[u8]) -> Result<Vec<u8>, SplatError> {
    if is_ply(raw_data) {
        return import_ply(raw_data);
    }
    let usable = rows_in(raw_data.len()) * ROW_LENGTH;
    if usable != raw_data.len() {
        log::warn!(
            "Ignoring {} trailing bytes after the last complete row",
            raw_data.len() - usable
        );
    }
    Ok(raw_data[..usable].to_vec())
}

/// Converts a PLY file into raw rows, ordered by importance.
pub fn convert_ply(raw_data: &[u8], output: &mut Vec<u8>) -> Result<(), SplatError> {
    let rows = import_ply(raw_data)?;
    if rows.is_empty() {
        log::warn!("PLY input has no vertices");
    }
    output.clear();
    output.extend_from_slice(&rows);
    Ok(())
}

/// Sorts `buffer` once against `view` on the calling thread.
pub fn sort_once(
    buffer: Vec<u8>,
    view: &ViewProj,
    config: SortConfig,
) -> Option<SortedAttributes> {
    let vertex_count = rows_in(buffer.len());
    let mut sorter = DepthSorter::new(config);
    sorter.set_buffer(buffer, vertex_count);
    sorter.sort(view, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ply::tests::build_ply;

    const LOOK_Z: ViewProj = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    fn create_test_ply() -> Vec<u8> {
        #[rustfmt::skip]
        let vertices = vec![
            // x, y, z, scale_0..2, opacity
            vec![0.0, 0.0, 2.0, -1.0, -1.0, -1.0, 0.0],
            vec![0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 4.0],
            vec![0.0, 0.0, 5.0, -2.0, -2.0, -2.0, -4.0],
        ];
        build_ply(
            &["x", "y", "z", "scale_0", "scale_1", "scale_2", "opacity"],
            &vertices,
        )
    }

    #[test]
    fn test_convert_orders_by_importance() {
        let mut out = vec![1, 2, 3];
        convert_ply(&create_test_ply(), &mut out).expect("convert_ply(...) failed");
        assert_eq!(out.len(), 3 * ROW_LENGTH);

        let zs: Vec<f32> = (0..3).map(|i| row::decode_center(&out, i)[2]).collect();
        assert_eq!(zs, vec![8.0, 2.0, 5.0]);
    }

    #[test]
    fn test_convert_rejects_raw_rows() {
        let mut out = Vec::new();
        let err = convert_ply(&[0u8; ROW_LENGTH], &mut out).unwrap_err();
        assert!(matches!(err, SplatError::Format(_)));
    }

    #[test]
    fn test_prepare_rows_detects_format() {
        let from_ply = prepare_rows(&create_test_ply()).unwrap();
        assert_eq!(rows_in(from_ply.len()), 3);

        let raw = vec![7u8; ROW_LENGTH * 2 + 5];
        let rows = prepare_rows(&raw).unwrap();
        assert_eq!(rows.len(), ROW_LENGTH * 2);
    }

    #[test]
    fn test_converted_rows_sort_back_to_front() {
        let rows = prepare_rows(&create_test_ply()).unwrap();
        let sorted = sort_once(rows, &LOOK_Z, SortConfig::default()).unwrap();
        let zs: Vec<f32> = sorted.center.chunks_exact(3).map(|c| c[2]).collect();
        assert_eq!(zs, vec![8.0, 5.0, 2.0]);

        let resorted = sorted.to_rows();
        assert_eq!(rows_in(resorted.len()), 3);
        assert_eq!(row::decode_center(&resorted, 0), [0.0, 0.0, 8.0]);
    }

    #[test]
    fn test_sort_once_empty() {
        assert!(sort_once(Vec::new(), &LOOK_Z, SortConfig::default()).is_none());
    }
}
