use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// The order in which one sweep over the corpus visits its samples.
///
/// Shuffled orders are seeded by `seed + sweep`, so every worker of a job
/// derives the same global order on its own.
#[derive(Debug, Clone)]
pub struct SweepOrder {
    sweep: usize,
    order: Vec<usize>,
}

impl SweepOrder {
    /// Creates the order of sweep `sweep` over `len` samples.
    ///
    /// # Arguments
    /// * `len` - Number of samples in the corpus.
    /// * `sweep` - Zero-based index of the pass over the data.
    /// * `randomize` - Identity order when `false`.
    /// * `seed` - Base seed shared by every worker.
    pub fn new(len: usize, sweep: usize, randomize: bool, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        if randomize {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(sweep as u64));
            order.shuffle(&mut rng);
        }
        Self { sweep, order }
    }

    #[inline]
    pub fn sweep(&self) -> usize {
        self.sweep
    }

    /// Returns the corpus row visited at `offset` within the sweep.
    #[inline]
    pub fn row(&self, offset: usize) -> usize {
        self.order[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_randomization() {
        let order = SweepOrder::new(5, 3, false, 42);
        let rows: Vec<_> = (0..5).map(|i| order.row(i)).collect();
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);
        assert_eq!(order.sweep(), 3);
    }

    #[test]
    fn shuffled_order_is_a_reproducible_permutation() {
        let a = SweepOrder::new(100, 1, true, 7);
        let b = SweepOrder::new(100, 1, true, 7);
        assert_eq!(a.order, b.order);

        let mut sorted = a.order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let next = SweepOrder::new(100, 2, true, 7);
        assert_ne!(a.order, next.order);
    }
}
