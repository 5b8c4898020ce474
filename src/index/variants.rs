//! Hash variant generation
//!
//! Enumerates every 64-bit value within a small Hamming radius of a query
//! hash. The flip masks are computed once per process and shared by all
//! queries, so a query always probes the same number of candidates
//! regardless of how large the index is.
//!
//! | flipped bits | masks            |
//! |--------------|------------------|
//! | 1            | 64               |
//! | 2            | C(64,2) = 2016   |
//! | 3            | C(64,3) = 41664  |

use std::sync::OnceLock;

/// Largest Hamming radius the engine will ever search.
///
/// Hashes farther apart than this are never matched.
pub const MAX_FLIPS: u32 = 3;

/// Number of candidates produced at the full radius (1 + 64 + 2016 + 41664).
pub const FULL_CANDIDATE_COUNT: usize = 43_745;

static MASKS: OnceLock<VariantMasks> = OnceLock::new();

/// Precomputed XOR masks flipping exactly one, two or three bits
#[derive(Debug)]
pub struct VariantMasks {
    one: Vec<u64>,
    two: Vec<u64>,
    three: Vec<u64>,
}

impl VariantMasks {
    fn generate() -> Self {
        let one: Vec<u64> = (0..64).map(|i| 1u64 << i).collect();

        let mut two = Vec::with_capacity(2016);
        for i in 0..64 {
            for j in (i + 1)..64 {
                two.push((1u64 << i) | (1u64 << j));
            }
        }

        let mut three = Vec::with_capacity(41_664);
        for i in 0..64 {
            for j in (i + 1)..64 {
                for k in (j + 1)..64 {
                    three.push((1u64 << i) | (1u64 << j) | (1u64 << k));
                }
            }
        }

        Self { one, two, three }
    }

    /// Process-wide mask table
    pub fn global() -> &'static VariantMasks {
        MASKS.get_or_init(Self::generate)
    }

    /// Masks flipping exactly `bits` bits (empty for 0 or anything above 3)
    pub fn with_flips(&self, bits: u32) -> &[u64] {
        match bits {
            1 => &self.one,
            2 => &self.two,
            3 => &self.three,
            _ => &[],
        }
    }

    /// Number of candidates produced for a radius of `max_flips`
    pub fn candidate_count(&self, max_flips: u32) -> usize {
        1 + (1..=max_flips.min(MAX_FLIPS))
            .map(|bits| self.with_flips(bits).len())
            .sum::<usize>()
    }
}

/// Every hash reachable from `hash` by flipping at most `max_flips` bits.
///
/// The result is sorted ascending as signed values (the order of the
/// on-disk hash array) and contains the query itself. `max_flips` is
/// clamped to [`MAX_FLIPS`].
pub fn candidates(hash: i64, max_flips: u32) -> Vec<i64> {
    let masks = VariantMasks::global();
    let max_flips = max_flips.min(MAX_FLIPS);
    let base = hash as u64;

    let mut out = Vec::with_capacity(masks.candidate_count(max_flips));
    out.push(hash);
    for bits in 1..=max_flips {
        out.extend(masks.with_flips(bits).iter().map(|m| (base ^ m) as i64));
    }

    out.sort_unstable();
    out.dedup();
    out
}

/// Number of differing bits between two hashes
#[inline]
pub fn hamming_distance(a: i64, b: i64) -> u32 {
    ((a as u64) ^ (b as u64)).count_ones()
}
