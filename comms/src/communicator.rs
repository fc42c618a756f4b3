use std::{collections::HashSet, sync::Arc};

use ndarray::ArrayD;

use crate::{Result, WorkerDescriptor};

/// A dense buffer moved between workers by the collective operations.
pub type Value = ArrayD<f32>;

/// Shared handle to a communicator, the form in which one is injected into
/// a minibatch source.
pub type CommunicatorPtr = Arc<dyn Communicator>;

/// The coordination channel between the workers of a distributed job.
///
/// Every collective takes the set of workers that participate in it; an empty
/// selection means every worker of the job.
pub trait Communicator: Send + Sync {
    /// Returns every worker of the job.
    fn workers(&self) -> &HashSet<WorkerDescriptor>;

    /// Returns the identity of the worker this communicator runs as.
    fn current_worker(&self) -> WorkerDescriptor;

    /// Creates a communicator restricted to `workers`.
    ///
    /// # Returns
    /// `None` when the implementation cannot partition the job.
    fn sub_group(&self, workers: &HashSet<WorkerDescriptor>) -> Option<CommunicatorPtr>;

    /// Gathers `values` from every selected worker into `output`.
    fn concatenate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()>;

    /// Sums `values` across the selected workers, overwriting them.
    fn aggregate_in_place(
        &self,
        values: &mut [Value],
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()>;

    /// Sums `values` across the selected workers into `output`.
    fn aggregate(
        &self,
        values: &[Value],
        output: &mut Vec<Value>,
        workers: &HashSet<WorkerDescriptor>,
    ) -> Result<()>;

    /// Blocks until every worker of the job reaches the barrier.
    fn barrier(&self) -> Result<()>;

    #[inline]
    fn num_workers(&self) -> usize {
        self.workers().len()
    }

    #[inline]
    fn rank(&self) -> usize {
        self.current_worker().global_rank
    }
}

/// Writes `values` into `output` unchanged.
///
/// An empty `output` is filled, otherwise its layout must match `values`.
pub(crate) fn pass_through(values: &[Value], output: &mut Vec<Value>) -> Result<()> {
    if output.is_empty() {
        output.extend(values.iter().cloned());
        return Ok(());
    }

    if output.len() != values.len() {
        return Err(crate::CommsError::LengthMismatch {
            got: output.len(),
            expected: values.len(),
        });
    }

    for (i, (out, value)) in output.iter_mut().zip(values).enumerate() {
        if out.shape() != value.shape() {
            return Err(crate::CommsError::ShapeMismatch {
                index: i,
                got: out.shape().to_vec(),
                expected: value.shape().to_vec(),
            });
        }
        out.assign(value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommsError;
    use ndarray::IxDyn;

    #[test]
    fn pass_through_fills_empty_output() {
        let values = vec![ArrayD::from_elem(IxDyn(&[2]), 1.5)];
        let mut output = Vec::new();

        pass_through(&values, &mut output).unwrap();
        assert_eq!(output, values);
    }

    #[test]
    fn pass_through_rejects_mismatched_layout() {
        let values = vec![ArrayD::from_elem(IxDyn(&[2]), 1.0)];

        let mut output = vec![ArrayD::zeros(IxDyn(&[3]))];
        let err = pass_through(&values, &mut output).unwrap_err();
        assert!(matches!(err, CommsError::ShapeMismatch { index: 0, .. }));

        let mut output = vec![ArrayD::zeros(IxDyn(&[2])), ArrayD::zeros(IxDyn(&[2]))];
        let err = pass_through(&values, &mut output).unwrap_err();
        assert!(matches!(
            err,
            CommsError::LengthMismatch {
                got: 2,
                expected: 1
            }
        ));
    }
}
