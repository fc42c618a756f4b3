use std::{error::Error, fmt};

use crate::WorkerDescriptor;

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsError>;

/// Communicator failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommsError {
    /// The rank does not belong to the worker set.
    UnknownRank { rank: usize, num_workers: usize },
    /// A collective selected a worker outside the job.
    UnknownWorker(WorkerDescriptor),
    /// The output buffer count differs from the input buffer count.
    LengthMismatch { got: usize, expected: usize },
    /// An output buffer's shape differs from its input.
    ShapeMismatch {
        index: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl fmt::Display for CommsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRank { rank, num_workers } => {
                write!(f, "rank {rank} is not part of a job of {num_workers} worker(s)")
            }
            Self::UnknownWorker(w) => {
                write!(f, "worker {}:{} is not part of the job", w.host_id, w.global_rank)
            }
            Self::LengthMismatch { got, expected } => {
                write!(f, "output length mismatch: got {got}, expected {expected}")
            }
            Self::ShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "output {index} shape mismatch: got {got:?}, expected {expected:?}"
            ),
        }
    }
}

impl Error for CommsError {}
