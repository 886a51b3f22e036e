//! Sort key packing and the LSD radix sort over packed keys.

const RADIX_BITS: u32 = 8;
const BUCKETS: usize = 1 << RADIX_BITS;

/// Maps a float to a `u32` whose ascending order is the float's descending
/// order.
#[inline]
pub fn descending_bits(depth: f32) -> u32 {
    let bits = depth.to_bits();
    let ascending = if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    };
    !ascending
}

/// Packs a depth and the row index it belongs to into one key. Ascending keys
/// visit rows farthest first; equal depths keep index order.
#[inline]
pub fn pack_key(depth: f32, index: u32) -> u64 {
    ((descending_bits(depth) as u64) << 32) | index as u64
}

#[inline]
pub fn key_index(key: u64) -> usize {
    (key & 0xFFFF_FFFF) as usize
}

/// Sorts `keys` ascending by their upper 32 bits, using `scratch` as the
/// ping-pong buffer.
///
/// Keys must arrive with their index halves ascending; the sort is stable, so
/// the result equals a full 64-bit numeric sort. Passes whose digit is the
/// same for every key are skipped.
pub fn sort_keys(keys: &mut Vec<u64>, scratch: &mut Vec<u64>) {
    let n = keys.len();
    if n < 2 {
        return;
    }
    scratch.resize(n, 0);

    for shift in (32..64).step_by(RADIX_BITS as usize) {
        let mut counts = [0usize; BUCKETS];
        for &key in keys.iter() {
            counts[((key >> shift) as usize) & (BUCKETS - 1)] += 1;
        }
        if counts.iter().any(|&c| c == n) {
            continue;
        }

        let mut offsets = [0usize; BUCKETS];
        let mut total = 0;
        for (offset, &count) in offsets.iter_mut().zip(counts.iter()) {
            *offset = total;
            total += count;
        }

        for &key in keys.iter() {
            let digit = ((key >> shift) as usize) & (BUCKETS - 1);
            scratch[offsets[digit]] = key;
            offsets[digit] += 1;
        }
        std::mem::swap(keys, scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descending_bits_order() {
        let depths = [
            f32::NEG_INFINITY,
            -1e30,
            -5.0,
            -0.5,
            -0.0,
            0.0,
            1e-30,
            0.5,
            5.0,
            1e30,
            f32::INFINITY,
        ];
        for pair in depths.windows(2) {
            assert!(
                descending_bits(pair[0]) >= descending_bits(pair[1]),
                "{} should not sort before {}",
                pair[0],
                pair[1]
            );
        }
        assert!(descending_bits(10.0) < descending_bits(5.0));
    }

    #[test]
    fn test_pack_roundtrip_index() {
        let key = pack_key(3.5, 123_456);
        assert_eq!(key_index(key), 123_456);
    }

    #[test]
    fn test_matches_std_sort() {
        // Small LCG so the test is deterministic without extra crates.
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f32 / u32::MAX as f32 - 0.25) * 200.0
        };

        let mut keys: Vec<u64> = (0..5000).map(|i| pack_key(next(), i)).collect();
        // Duplicate depths exercise stability.
        keys.extend((5000..5100).map(|i| pack_key(1.0, i)));

        let mut expected = keys.clone();
        expected.sort_unstable();

        let mut scratch = Vec::new();
        sort_keys(&mut keys, &mut scratch);
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_uniform_depth_is_noop() {
        let mut keys: Vec<u64> = (0..10).map(|i| pack_key(2.0, i)).collect();
        let expected = keys.clone();
        sort_keys(&mut keys, &mut Vec::new());
        assert_eq!(keys, expected);
    }
}
