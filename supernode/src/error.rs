use std::{error::Error, fmt, io, path::PathBuf};

use comms::{DecodeError, InvalidIdentity};

use crate::client::ConnectionState;

/// The supernode crate's result type.
pub type Result<T> = std::result::Result<T, NodeErr>;

/// Invalid startup configuration, detected before connecting.
#[derive(Debug)]
pub enum ConfigError {
    Identity(InvalidIdentity),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Identity(e) => write!(f, "invalid node identity: {e}"),
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Identity(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Numeric failures inside the local trainer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingError {
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The parameters or the loss stopped being finite at `iteration`.
    NonFinite { iteration: usize },
    /// The fit was abandoned because the node is shutting down.
    Cancelled { iteration: usize },
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got}, expected {expected}"),
            TrainingError::NonFinite { iteration } => {
                write!(f, "training diverged to a non finite value at iteration {iteration}")
            }
            TrainingError::Cancelled { iteration } => {
                write!(f, "training cancelled at iteration {iteration}")
            }
        }
    }
}

impl Error for TrainingError {}

/// A network operation that failed for good, either fatally or after exhausting retries.
#[derive(Debug)]
pub struct TransportError {
    pub op: &'static str,
    pub attempts: u32,
    pub source: io::Error,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.op, self.attempts, self.source
        )
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Failures while reading the local input files.
#[derive(Debug)]
pub enum DataError {
    Io { path: PathBuf, source: io::Error },
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    Empty(PathBuf),
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Io { path, source } => write!(f, "reading {}: {source}", path.display()),
            DataError::Parse { path, line, reason } => {
                write!(f, "{}:{line}: {reason}", path.display())
            }
            DataError::Empty(path) => write!(f, "no samples found in {}", path.display()),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Supernode runtime failures.
#[derive(Debug)]
pub enum NodeErr {
    Config(ConfigError),
    Data(DataError),
    Transport(TransportError),
    Decode(DecodeError),
    Training(TrainingError),
    UnexpectedMessage {
        state: ConnectionState,
        got: &'static str,
    },
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The aggregator reported an error of its own.
    Remote(String),
    Io(io::Error),
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErr::Config(e) => write!(f, "config error: {e}"),
            NodeErr::Data(e) => write!(f, "data error: {e}"),
            NodeErr::Transport(e) => write!(f, "transport error: {e}"),
            NodeErr::Decode(e) => write!(f, "decode error: {e}"),
            NodeErr::Training(e) => write!(f, "training error: {e}"),
            NodeErr::UnexpectedMessage { state, got } => {
                write!(f, "unexpected message while {state}: got {got}")
            }
            NodeErr::InvalidTransition { from, to } => {
                write!(f, "invalid state transition {from} -> {to}")
            }
            NodeErr::Remote(msg) => write!(f, "aggregator error: {msg}"),
            NodeErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for NodeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeErr::Config(e) => Some(e),
            NodeErr::Data(e) => Some(e),
            NodeErr::Transport(e) => Some(e),
            NodeErr::Decode(e) => Some(e),
            NodeErr::Training(e) => Some(e),
            NodeErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NodeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ConfigError> for NodeErr {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<InvalidIdentity> for ConfigError {
    fn from(value: InvalidIdentity) -> Self {
        Self::Identity(value)
    }
}

impl From<DataError> for NodeErr {
    fn from(value: DataError) -> Self {
        Self::Data(value)
    }
}

impl From<TransportError> for NodeErr {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<DecodeError> for NodeErr {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<TrainingError> for NodeErr {
    fn from(value: TrainingError) -> Self {
        Self::Training(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<NodeErr> for io::Error {
    fn from(value: NodeErr) -> Self {
        match value {
            NodeErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
