const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Hard ceiling on concurrent part transfers for one file.
pub const MAX_CONCURRENCY: usize = 10;

/// Chunk size and parallelism chosen for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub concurrency: usize,
}

/// Size tiers: (exclusive upper bound, chunk size, concurrency).
const TIERS: [(u64, u64, usize); 3] = [
    (100 * MIB, 5 * MIB, 3),
    (GIB, 10 * MIB, 4),
    (10 * GIB, 20 * MIB, 6),
];

const LARGEST_TIER: (u64, usize) = (50 * MIB, 8);

/// Picks a chunk size and concurrency for a file of `size` bytes.
pub fn plan(size: u64) -> ChunkPlan {
    let (chunk_size, concurrency) = TIERS
        .iter()
        .find(|(limit, _, _)| size < *limit)
        .map(|&(_, chunk, conc)| (chunk, conc))
        .unwrap_or(LARGEST_TIER);

    ChunkPlan {
        chunk_size,
        concurrency: clamp_concurrency(concurrency),
    }
}

/// Clamps a concurrency hint into `1..=MAX_CONCURRENCY`.
pub fn clamp_concurrency(hint: usize) -> usize {
    hint.clamp(1, MAX_CONCURRENCY)
}

/// Number of parts needed to cover `size` bytes.
pub fn total_parts(size: u64, chunk_size: u64) -> u32 {
    if size == 0 || chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size) as u32
}

/// Byte range `[start, end)` of 1-based `part`.
pub fn part_range(part: u32, chunk_size: u64, size: u64) -> (u64, u64) {
    let start = (u64::from(part.saturating_sub(1)) * chunk_size).min(size);
    let end = (start + chunk_size).min(size);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tiers_match_size_bands() {
        assert_eq!(plan(0).chunk_size, 5 * MIB);
        assert_eq!(plan(100 * MIB - 1).chunk_size, 5 * MIB);
        assert_eq!(plan(100 * MIB).chunk_size, 10 * MIB);
        assert_eq!(plan(GIB - 1).chunk_size, 10 * MIB);
        assert_eq!(plan(GIB).chunk_size, 20 * MIB);
        assert_eq!(plan(10 * GIB).chunk_size, 50 * MIB);
        assert_eq!(plan(u64::MAX).chunk_size, 50 * MIB);
    }

    #[test]
    fn concurrency_grows_with_tier() {
        assert_eq!(plan(MIB).concurrency, 3);
        assert_eq!(plan(500 * MIB).concurrency, 4);
        assert_eq!(plan(5 * GIB).concurrency, 6);
        assert_eq!(plan(50 * GIB).concurrency, 8);
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(7), 7);
        assert_eq!(clamp_concurrency(64), MAX_CONCURRENCY);
    }

    #[test]
    fn part_math() {
        assert_eq!(total_parts(0, 5), 0);
        assert_eq!(total_parts(10, 5), 2);
        assert_eq!(total_parts(11, 5), 3);
        assert_eq!(part_range(1, 5, 11), (0, 5));
        assert_eq!(part_range(3, 5, 11), (10, 11));
    }

    proptest! {
        #[test]
        fn plan_is_monotonic(a in any::<u64>(), b in any::<u64>()) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(plan(lo).chunk_size <= plan(hi).chunk_size);
            prop_assert!(plan(lo).concurrency <= plan(hi).concurrency);
        }

        #[test]
        fn concurrency_always_in_bounds(size in any::<u64>()) {
            let c = plan(size).concurrency;
            prop_assert!((1..=MAX_CONCURRENCY).contains(&c));
        }

        #[test]
        fn parts_cover_file_exactly(size in 1u64..(1 << 40), chunk in 1024u64..(1 << 30)) {
            let n = total_parts(size, chunk);
            prop_assert!(n >= 1);
            prop_assert_eq!(part_range(1, chunk, size).0, 0);
            prop_assert_eq!(part_range(n, chunk, size).1, size);
            let (s, e) = part_range(n, chunk, size);
            prop_assert!(e > s);
        }
    }
}
