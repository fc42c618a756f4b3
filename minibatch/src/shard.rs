use std::num::NonZeroUsize;
use std::ops::Range;

use comms::{CommsError, Communicator};

use crate::Result;

/// Splits `total` samples among `num_workers` and returns the shard for `worker_id`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition), earlier workers get the extra samples.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    assert!(num_workers > 0);
    assert!(worker_id < num_workers);

    let base = total / num_workers;
    let rem = total % num_workers;

    let start = worker_id * base + worker_id.min(rem);
    let extra = if worker_id < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Which slice of every global minibatch belongs to this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub worker_id: usize,
    pub num_workers: NonZeroUsize,
}

impl ShardSpec {
    pub fn new(worker_id: usize, num_workers: NonZeroUsize) -> Self {
        assert!(worker_id < num_workers.get(), "worker_id out of range");
        Self {
            worker_id,
            num_workers,
        }
    }

    /// Derives the shard of the worker `comm` currently runs as.
    ///
    /// # Errors
    /// `CommsError::UnknownRank` if the job is empty or the current rank is
    /// not one of its workers.
    pub fn from_communicator(comm: &dyn Communicator) -> Result<Self> {
        let me = comm.current_worker();
        let num_workers = comm.num_workers();

        let unknown = || CommsError::UnknownRank {
            rank: me.global_rank,
            num_workers,
        };

        let Some(n) = NonZeroUsize::new(num_workers) else {
            return Err(unknown().into());
        };
        if me.global_rank >= num_workers || !comm.workers().contains(&me) {
            return Err(unknown().into());
        }

        Ok(Self::new(me.global_rank, n))
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.worker_id, self.num_workers.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comms::{LocalCommunicator, MockCommunicator};

    #[test]
    fn shard_range_balanced() {
        // total 10, workers 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shard_ranges_cover_the_minibatch() {
        for total in 0..20 {
            for n in 1..6 {
                let mut next = 0;
                for w in 0..n {
                    let r = shard_range(total, w, n);
                    assert_eq!(r.start, next);
                    assert!(r.len() == total / n || r.len() == total / n + 1);
                    next = r.end;
                }
                assert_eq!(next, total);
            }
        }
    }

    #[test]
    fn shard_spec_range_matches_function() {
        let spec = ShardSpec::new(1, NonZeroUsize::new(3).unwrap());
        assert_eq!(spec.range(10), 4..7);
    }

    #[test]
    fn shard_spec_follows_the_communicator() {
        let comm = MockCommunicator::new(4);
        comm.set_rank(3).unwrap();
        let spec = ShardSpec::from_communicator(&comm).unwrap();
        assert_eq!(spec, ShardSpec::new(3, NonZeroUsize::new(4).unwrap()));

        let local = ShardSpec::from_communicator(&LocalCommunicator::default()).unwrap();
        assert_eq!(local.range(8), 0..8);

        assert!(ShardSpec::from_communicator(&MockCommunicator::new(0)).is_err());
    }
}
