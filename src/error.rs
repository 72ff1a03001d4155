use crate::interval::Interval;
use crate::SeqId;
use std::io::Error as IoError;

#[derive(Debug)]
pub enum NlmsaError {
    /// Path was never inserted into the store.
    NotFound(SeqId),
    /// The path is indexed but nothing aligns to this region.
    EmptySlice(Interval),
    PathMismatch(String),
    MalformedInterval(String),
    RoundingAmbiguity {
        position: i64,
        numerator: i128,
        denominator: i128,
    },
    NoSuchAttribute(String),
    UnsupportedJoin(String),
    Parse { line: usize, message: String },
    Serialization(String),
    Io(IoError),
}

pub type Result<T> = std::result::Result<T, NlmsaError>;

impl std::fmt::Display for NlmsaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NlmsaError::NotFound(id) => write!(f, "Sequence {} is not in this alignment", id),
            NlmsaError::EmptySlice(ival) => write!(f, "Interval {} is not aligned", ival),
            NlmsaError::PathMismatch(msg) => write!(f, "Path mismatch: {}", msg),
            NlmsaError::MalformedInterval(msg) => write!(f, "Malformed interval: {}", msg),
            NlmsaError::RoundingAmbiguity {
                position,
                numerator,
                denominator,
            } => write!(
                f,
                "Position {} does not map exactly under scale {}/{}",
                position, numerator, denominator
            ),
            NlmsaError::NoSuchAttribute(name) => write!(f, "No such attribute: {}", name),
            NlmsaError::UnsupportedJoin(msg) => write!(f, "Unsupported join: {}", msg),
            NlmsaError::Parse { line, message } => {
                write!(f, "Parse error at line {}: {}", line, message)
            }
            NlmsaError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            NlmsaError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for NlmsaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NlmsaError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for NlmsaError {
    fn from(e: IoError) -> Self {
        NlmsaError::Io(e)
    }
}

impl From<NlmsaError> for IoError {
    fn from(e: NlmsaError) -> Self {
        match e {
            NlmsaError::Io(e) => e,
            NlmsaError::NotFound(_) => IoError::new(std::io::ErrorKind::NotFound, e.to_string()),
            NlmsaError::Parse { .. } | NlmsaError::Serialization(_) => {
                IoError::new(std::io::ErrorKind::InvalidData, e.to_string())
            }
            other => IoError::new(std::io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
