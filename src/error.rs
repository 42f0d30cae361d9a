use thiserror::Error;

use crate::services::driver::DriverError;
use crate::services::typeql_analyzer::AnalyzeError;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Failure reported by the driver (authentication, availability, server errors)
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("not connected to a server")]
    NotConnected,
    #[error("{0}")]
    InvalidState(String),
    /// A background task panicked; the panic message is preserved.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Error::Unexpected(_))
    }

    pub fn as_driver_error(&self) -> Option<&DriverError> {
        match self {
            Error::Driver(error) => Some(error),
            _ => None,
        }
    }
}
