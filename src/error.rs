use thiserror::Error;

/// Error type for transport and device identification operations.
///
/// Statuses returned by the protocol engine's own calls pass through as
/// [`DcError::Engine`] without reinterpretation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DcError {
    #[error("out of memory")]
    NoMemory,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport i/o failure: {0}")]
    Io(String),

    #[error("unsupported device")]
    Unsupported,

    #[error("protocol engine failure: {0}")]
    Engine(String),
}

pub type DcResult<T> = Result<T, DcError>;
