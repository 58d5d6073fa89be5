//! Dictionary sweep strategies
//!
//! Reordering the dictionary differently per sector amortizes discovery time
//! across many unknown cards instead of committing to one ordering bias.
//! Each strategy is a pure reordering of the input slice, decoupled from any
//! hardware.

use rand::seq::SliceRandom;
use rand::Rng;

/// Chunk length used by [`SweepStrategy::ChunkShuffle`].
pub const CHUNK_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStrategy {
    /// Dictionary order.
    Forward,
    /// Dictionary order reversed.
    Reverse,
    /// Start at the middle element, then alternate one step left, one step
    /// right, walking outward.
    MiddleOut,
    /// Full random shuffle.
    Shuffle,
    /// Shuffle inside fixed-size contiguous chunks, chunk order preserved.
    ChunkShuffle,
    /// Alternate between the first and last remaining elements.
    InterleavedEnds,
}

impl SweepStrategy {
    pub const ALL: [SweepStrategy; 6] = [
        SweepStrategy::Forward,
        SweepStrategy::Reverse,
        SweepStrategy::MiddleOut,
        SweepStrategy::Shuffle,
        SweepStrategy::ChunkShuffle,
        SweepStrategy::InterleavedEnds,
    ];

    /// Pick a strategy for the next sector, avoiding an immediate repeat of
    /// the previous sector's strategy.
    pub fn pick<R: Rng>(rng: &mut R, previous: Option<SweepStrategy>) -> SweepStrategy {
        let pool: Vec<SweepStrategy> = Self::ALL
            .iter()
            .copied()
            .filter(|s| Some(*s) != previous)
            .collect();
        *pool.choose(rng).unwrap_or(&SweepStrategy::Forward)
    }

    /// Produce the sweep order for this strategy.
    pub fn reorder<T: Clone, R: Rng>(self, items: &[T], rng: &mut R) -> Vec<T> {
        match self {
            SweepStrategy::Forward => items.to_vec(),
            SweepStrategy::Reverse => items.iter().rev().cloned().collect(),
            SweepStrategy::MiddleOut => middle_out(items),
            SweepStrategy::Shuffle => {
                let mut out = items.to_vec();
                out.shuffle(rng);
                out
            }
            SweepStrategy::ChunkShuffle => {
                let mut out = items.to_vec();
                for chunk in out.chunks_mut(CHUNK_LEN) {
                    chunk.shuffle(rng);
                }
                out
            }
            SweepStrategy::InterleavedEnds => interleaved_ends(items),
        }
    }
}

fn middle_out<T: Clone>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    if items.is_empty() {
        return out;
    }
    let mid = items.len() / 2;
    out.push(items[mid].clone());
    for step in 1..=items.len() {
        if step > mid && mid + step >= items.len() {
            break;
        }
        if step <= mid {
            out.push(items[mid - step].clone());
        }
        if mid + step < items.len() {
            out.push(items[mid + step].clone());
        }
    }
    out
}

fn interleaved_ends<T: Clone>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    let mut lo = 0usize;
    let mut hi = items.len();
    while lo < hi {
        out.push(items[lo].clone());
        lo += 1;
        if lo < hi {
            hi -= 1;
            out.push(items[hi].clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn every_strategy_is_a_permutation() {
        let items: Vec<u32> = (0..100).collect();
        let mut rng = StdRng::seed_from_u64(3);
        for strategy in SweepStrategy::ALL {
            let out = strategy.reorder(&items, &mut rng);
            assert_eq!(sorted(out), items, "{strategy:?}");
        }
    }

    #[test]
    fn forward_and_reverse_shapes() {
        let items: Vec<u32> = (0..5).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            SweepStrategy::Forward.reorder(&items, &mut rng),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(
            SweepStrategy::Reverse.reorder(&items, &mut rng),
            vec![4, 3, 2, 1, 0]
        );
    }

    #[test]
    fn middle_out_alternates_from_center() {
        let items: Vec<u32> = (0..5).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            SweepStrategy::MiddleOut.reorder(&items, &mut rng),
            vec![2, 1, 3, 0, 4]
        );
        let even: Vec<u32> = (0..6).collect();
        assert_eq!(
            SweepStrategy::MiddleOut.reorder(&even, &mut rng),
            vec![3, 2, 4, 1, 5, 0]
        );
    }

    #[test]
    fn interleaved_ends_alternates_first_last() {
        let items: Vec<u32> = (0..5).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            SweepStrategy::InterleavedEnds.reorder(&items, &mut rng),
            vec![0, 4, 1, 3, 2]
        );
    }

    #[test]
    fn chunk_shuffle_preserves_chunk_membership() {
        let items: Vec<u32> = (0..100).collect();
        let mut rng = StdRng::seed_from_u64(9);
        let out = SweepStrategy::ChunkShuffle.reorder(&items, &mut rng);
        for (chunk_idx, chunk) in out.chunks(CHUNK_LEN).enumerate() {
            let lo = (chunk_idx * CHUNK_LEN) as u32;
            let hi = lo + chunk.len() as u32;
            assert!(chunk.iter().all(|v| (lo..hi).contains(v)));
        }
    }

    #[test]
    fn pick_never_repeats_previous() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut previous = None;
        for _ in 0..200 {
            let strategy = SweepStrategy::pick(&mut rng, previous);
            assert_ne!(Some(strategy), previous);
            previous = Some(strategy);
        }
    }

    #[test]
    fn empty_input_is_fine() {
        let items: Vec<u32> = Vec::new();
        let mut rng = StdRng::seed_from_u64(0);
        for strategy in SweepStrategy::ALL {
            assert!(strategy.reorder(&items, &mut rng).is_empty());
        }
    }
}
