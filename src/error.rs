use std::fmt;

use minibatch::MinibatchError;

/// Ways a warm-start run can fail.
#[derive(Debug)]
pub enum ScenarioError {
    /// The run was configured with impossible parameters.
    InvalidParams(String),
    /// The source itself failed to serve a minibatch.
    Source(MinibatchError),
    /// The source's distributed flag disagrees with the samples seen so far.
    DistributedState {
        iteration: usize,
        expected: bool,
        actual: bool,
    },
    /// The tracked stream delivered the wrong number of samples.
    SampleCount {
        iteration: usize,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParams(msg) => write!(f, "invalid parameters: {msg}"),
            Self::Source(e) => write!(f, "minibatch source error: {e}"),
            Self::DistributedState {
                iteration,
                expected,
                actual,
            } => write!(
                f,
                "warm start failed in distributed state at minibatch {iteration}: expected {expected}, actual {actual}"
            ),
            Self::SampleCount {
                iteration,
                expected,
                actual,
            } => write!(
                f,
                "warm start failed in sample count at minibatch {iteration}: expected {expected}, actual {actual}"
            ),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MinibatchError> for ScenarioError {
    fn from(e: MinibatchError) -> Self {
        Self::Source(e)
    }
}
