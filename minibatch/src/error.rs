use std::{error::Error, fmt, io, path::PathBuf};

use comms::CommsError;

/// The minibatch module's result type.
pub type Result<T> = std::result::Result<T, MinibatchError>;

/// Failures while configuring or reading from a minibatch source.
#[derive(Debug)]
pub enum MinibatchError {
    /// The data file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// Invalid configuration, caught before any data is read.
    InvalidConfig(String),
    /// A line of the text format could not be parsed.
    Parse { line: usize, msg: String },
    /// The data file holds no samples.
    EmptyDataset(PathBuf),
    /// No stream with that name is configured.
    UnknownStream(String),
    /// A minibatch of zero samples was requested.
    ZeroMinibatch,
    /// The global position would overflow.
    PositionOverflow { position: usize, size: usize },
    /// The requested minibatch cannot be held in memory.
    MinibatchTooLarge(usize),
    /// The communicator cannot describe a valid shard for this worker.
    Comms(CommsError),
}

impl MinibatchError {
    pub(crate) fn parse(line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            line,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for MinibatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read '{}': {source}", path.display()),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Parse { line, msg } => write!(f, "parse error at line {line}: {msg}"),
            Self::EmptyDataset(path) => write!(f, "no samples in '{}'", path.display()),
            Self::UnknownStream(name) => write!(f, "unknown stream '{name}'"),
            Self::ZeroMinibatch => write!(f, "minibatch size must be > 0"),
            Self::PositionOverflow { position, size } => {
                write!(f, "cannot advance position {position} by {size} samples")
            }
            Self::MinibatchTooLarge(size) => write!(f, "minibatch of {size} samples is too large"),
            Self::Comms(e) => write!(f, "communicator error: {e}"),
        }
    }
}

impl Error for MinibatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommsError> for MinibatchError {
    fn from(value: CommsError) -> Self {
        Self::Comms(value)
    }
}

impl From<serde_json::Error> for MinibatchError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
