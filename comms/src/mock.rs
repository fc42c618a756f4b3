use std::collections::HashSet;

use log::debug;
use parking_lot::RwLock;

use crate::{
    CommsError, Communicator, CommunicatorPtr, Result, Value, WorkerDescriptor, WorkerSet,
    communicator::pass_through,
};

/// Host id reported by every worker of a `MockCommunicator`.
pub const MOCK_HOST_ID: &str = "MockCommunicator";

/// A communicator that simulates a multi-worker job inside one process.
///
/// It reports a fixed worker set and a current worker, and performs no real
/// coordination: collectives hand values back unchanged and the barrier
/// returns immediately. The current rank can be switched to simulate running
/// as another worker of the job.
#[derive(Debug)]
pub struct MockCommunicator {
    workers: WorkerSet,
    current: RwLock<WorkerDescriptor>,
}

impl MockCommunicator {
    /// Creates a new `MockCommunicator`.
    ///
    /// # Arguments
    /// * `num_workers` - The size of the simulated job. Zero is accepted and
    ///   yields an empty worker set.
    ///
    /// # Returns
    /// A mock running as rank 0.
    pub fn new(num_workers: usize) -> Self {
        Self {
            workers: WorkerSet::single_host(MOCK_HOST_ID, num_workers),
            current: RwLock::new(WorkerDescriptor::new(MOCK_HOST_ID, 0)),
        }
    }

    /// Switches the simulated identity to `rank`, keeping the host id.
    ///
    /// # Errors
    /// Returns `CommsError::UnknownRank` if no worker of the set has `rank`.
    pub fn set_rank(&self, rank: usize) -> Result<()> {
        if self.workers.by_rank(rank).is_none() {
            return Err(CommsError::UnknownRank {
                rank,
                num_workers: self.workers.len(),
            });
        }

        debug!(rank = rank; "mock communicator switching rank");
        self.current.write().global_rank = rank;
        Ok(())
    }

    pub fn worker_set(&self) -> &WorkerSet {
        &self.workers
    }
}

impl Communicator for MockCommunicator {
    fn workers(&self) -> &HashSet<WorkerDescriptor> {
        self.workers.as_set()
    }

    fn current_worker(&self) -> WorkerDescriptor {
        self.current.read().clone()
    }

    fn sub_group(&self, _workers: &HashSet<WorkerDescriptor>) -> Option<CommunicatorPtr> {
        None
    }

    fn concatenate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        _workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        pass_through(values, output)
    }

    fn aggregate_in_place(
        &self,
        _values: &mut [Value],
        _workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        Ok(())
    }

    fn aggregate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        _workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        pass_through(values, output)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}
