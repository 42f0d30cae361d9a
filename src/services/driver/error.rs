use thiserror::Error;

/// Failures reported by the database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Error returned by the server, tagged with its error code (e.g. `DBS01`).
    #[error("[{code}] {message}")]
    Server { code: String, message: String },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("server unavailable: {0}")]
    Unavailable(String),
    /// The account is still on a default or temporary password.
    #[error("the password must be changed before continuing: {0}")]
    PasswordChangeRequired(String),
    #[error("the session is closed")]
    SessionClosed,
    #[error("the transaction is closed")]
    TransactionClosed,
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Server error code, if the server supplied one
    pub fn code(&self) -> Option<&str> {
        match self {
            DriverError::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns true for failures that mean the server could not be reached
    /// or refused the credentials.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DriverError::Authentication(_) | DriverError::Unavailable(_)
        )
    }
}
