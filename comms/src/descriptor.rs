use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Identifies one participant of a distributed job.
///
/// Two descriptors are the same worker when both the host id and the global
/// rank match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerDescriptor {
    pub host_id: String,
    pub global_rank: usize,
}

impl WorkerDescriptor {
    pub fn new(host_id: impl Into<String>, global_rank: usize) -> Self {
        Self {
            host_id: host_id.into(),
            global_rank,
        }
    }
}

/// The whole membership of a distributed job.
///
/// Built once and handed to a communicator at construction, it never changes
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSet {
    workers: HashSet<WorkerDescriptor>,
}

impl WorkerSet {
    /// Creates a worker set of `num_workers` descriptors sharing one host.
    ///
    /// # Arguments
    /// * `host_id` - The host identifier every worker reports.
    /// * `num_workers` - The amount of workers, ranked `0..num_workers`.
    ///
    /// # Returns
    /// A new `WorkerSet`, empty when `num_workers` is zero.
    pub fn single_host(host_id: &str, num_workers: usize) -> Self {
        let workers = (0..num_workers)
            .map(|rank| WorkerDescriptor::new(host_id, rank))
            .collect();

        Self { workers }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    #[inline]
    pub fn contains(&self, worker: &WorkerDescriptor) -> bool {
        self.workers.contains(worker)
    }

    #[inline]
    pub fn as_set(&self) -> &HashSet<WorkerDescriptor> {
        &self.workers
    }

    /// Returns the descriptor with the given rank, if any.
    pub fn by_rank(&self, rank: usize) -> Option<&WorkerDescriptor> {
        self.workers.iter().find(|w| w.global_rank == rank)
    }
}

impl FromIterator<WorkerDescriptor> for WorkerSet {
    fn from_iter<I: IntoIterator<Item = WorkerDescriptor>>(iter: I) -> Self {
        Self {
            workers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_host_ranks_are_dense() {
        let set = WorkerSet::single_host("host", 3);
        assert_eq!(set.len(), 3);

        let mut ranks: Vec<_> = set.as_set().iter().map(|w| w.global_rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(set.as_set().iter().all(|w| w.host_id == "host"));
    }

    #[test]
    fn descriptors_are_keyed_by_host_and_rank() {
        let set: WorkerSet = [
            WorkerDescriptor::new("a", 0),
            WorkerDescriptor::new("a", 0),
            WorkerDescriptor::new("b", 0),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert!(set.contains(&WorkerDescriptor::new("b", 0)));
        assert!(!set.contains(&WorkerDescriptor::new("b", 1)));
    }

    #[test]
    fn descriptor_serializes_with_snake_case_keys() {
        let json = serde_json::to_string(&WorkerDescriptor::new("h", 4)).unwrap();
        assert_eq!(json, r#"{"host_id":"h","global_rank":4}"#);
    }
}
