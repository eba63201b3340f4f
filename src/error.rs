use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum NNError {
    // Construction errors, fatal for the layer being built
    InvalidLayerConfiguration(String),
    InvalidConfig(String),
    EmptyModel,

    // Numeric errors
    ShapeMismatch(String),
    SingularMatrix(String),

    // Training loop
    Cancelled,
    WorkerPanicked(String),

    // File operations
    IoError(std::io::Error),
    SerializationError(Box<bincode::ErrorKind>),
    ConfigParseError(serde_json::Error),
}

impl fmt::Display for NNError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NNError::InvalidLayerConfiguration(msg) => write!(f, "Invalid layer configuration: {}", msg),
            NNError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            NNError::EmptyModel => write!(f, "Pipeline has no layers"),
            NNError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            NNError::SingularMatrix(msg) => write!(f, "Singular matrix: {}", msg),
            NNError::Cancelled => write!(f, "Training cancelled"),
            NNError::WorkerPanicked(msg) => write!(f, "Worker thread panicked: {}", msg),
            NNError::IoError(err) => write!(f, "I/O error: {}", err),
            NNError::SerializationError(err) => write!(f, "Serialization error: {}", err),
            NNError::ConfigParseError(err) => write!(f, "Config parse error: {}", err),
        }
    }
}

impl From<std::io::Error> for NNError {
    fn from(err: std::io::Error) -> NNError {
        NNError::IoError(err)
    }
}

impl From<Box<bincode::ErrorKind>> for NNError {
    fn from(err: Box<bincode::ErrorKind>) -> NNError {
        NNError::SerializationError(err)
    }
}

impl From<serde_json::Error> for NNError {
    fn from(err: serde_json::Error) -> NNError {
        NNError::ConfigParseError(err)
    }
}

impl Error for NNError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NNError::IoError(err) => Some(err),
            NNError::SerializationError(err) => Some(err.as_ref()),
            NNError::ConfigParseError(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NNError>;
