use std::{collections::HashSet, sync::Arc};

use crate::{
    CommsError, Communicator, CommunicatorPtr, Result, Value, WorkerDescriptor, WorkerSet,
    communicator::pass_through,
};

/// A job made of the current process alone.
///
/// Collectives over a single participant are the identity, so this is a
/// complete communicator rather than a stand-in. Minibatch sources use it
/// when no communicator is injected.
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    workers: WorkerSet,
    me: WorkerDescriptor,
}

impl LocalCommunicator {
    pub fn new(host_id: impl Into<String>) -> Self {
        let me = WorkerDescriptor::new(host_id, 0);
        let workers = std::iter::once(me.clone()).collect();
        Self { workers, me }
    }

    fn check_selection(&self, workers: &HashSet<WorkerDescriptor>) -> Result<()> {
        match workers.iter().find(|w| !self.workers.contains(w)) {
            Some(w) => Err(CommsError::UnknownWorker(w.clone())),
            None => Ok(()),
        }
    }
}

impl Default for LocalCommunicator {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl Communicator for LocalCommunicator {
    fn workers(&self) -> &HashSet<WorkerDescriptor> {
        self.workers.as_set()
    }

    fn current_worker(&self) -> WorkerDescriptor {
        self.me.clone()
    }

    fn sub_group(&self, workers: &HashSet<WorkerDescriptor>) -> Option<CommunicatorPtr> {
        if workers == self.workers.as_set() {
            Some(Arc::new(self.clone()))
        } else {
            None
        }
    }

    fn concatenate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        self.check_selection(workers)?;
        pass_through(values, output)
    }

    fn aggregate_in_place(
        &self,
        _values: &mut [Value],
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        self.check_selection(workers)
    }

    fn aggregate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()> {
        self.check_selection(workers)?;
        pass_through(values, output)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn local_job_has_one_worker() {
        let comm = LocalCommunicator::new("box");
        assert_eq!(comm.num_workers(), 1);
        assert_eq!(comm.current_worker(), WorkerDescriptor::new("box", 0));
    }

    #[test]
    fn sub_group_of_itself_only() {
        let comm = LocalCommunicator::default();
        assert!(comm.sub_group(comm.workers()).is_some());

        let other: HashSet<_> = [WorkerDescriptor::new("elsewhere", 1)].into();
        assert!(comm.sub_group(&other).is_none());
    }

    #[test]
    fn collectives_reject_foreign_workers() {
        let comm = LocalCommunicator::default();
        let values = vec![ArrayD::from_elem(IxDyn(&[1]), 2.0)];
        let foreign: HashSet<_> = [WorkerDescriptor::new("elsewhere", 1)].into();

        let mut out = Vec::new();
        let err = comm.aggregate(&values, &mut out, &foreign).unwrap_err();
        assert_eq!(
            err,
            CommsError::UnknownWorker(WorkerDescriptor::new("elsewhere", 1))
        );

        comm.aggregate(&values, &mut out, &HashSet::new()).unwrap();
        assert_eq!(out, values);
    }
}
