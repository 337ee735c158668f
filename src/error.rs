// Error handling module
// Defines the closed error taxonomy produced at the Request Gateway boundary

use thiserror::Error;

/// Errors that can occur while talking to the back-office API.
///
/// Every transport failure is normalized into exactly one of these kinds at
/// the gateway boundary, so downstream components match on a stable shape
/// instead of digging through raw response bodies.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Rejected login attempt (4xx on the login endpoint).
    /// Local and recoverable: the user fixes their input and retries.
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// The server no longer accepts the current token (401 on any
    /// authenticated call, or a failed refresh). Fatal to the session.
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// No response at all: connect failure, timeout, or a broken transport.
    /// Distinct from HTTP error statuses so the UI can say "check your
    /// connection" instead of "bad credentials".
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// The server answered with an error status (5xx, or an unexpected
    /// status outside the taxonomy). Does not by itself invalidate the
    /// session.
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// Kind tag used in structured log events and `Session.last_error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Credentials(_) => ErrorKind::Credentials,
            ApiError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            ApiError::Unreachable(_) => ErrorKind::Unreachable,
            ApiError::Server { .. } => ErrorKind::Server,
        }
    }
}

/// Discriminant-only view of [`ApiError`], cheap to store and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Credentials,
    SessionInvalid,
    Unreachable,
    Server,
}

/// Error details carried inside a `Session` snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ApiError> for ErrorInfo {
    fn from(err: &ApiError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for gateway operations
#[allow(dead_code)]
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::Credentials("wrong password".to_string());
        assert_eq!(err.to_string(), "Invalid credentials: wrong password");

        let err = ApiError::SessionInvalid("token rejected".to_string());
        assert_eq!(err.to_string(), "Session invalid: token rejected");

        let err = ApiError::Unreachable("connection refused".to_string());
        assert_eq!(err.to_string(), "Server unreachable: connection refused");

        let err = ApiError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Server error: 502 - bad gateway");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ApiError::Credentials(String::new()).kind(),
            ErrorKind::Credentials
        );
        assert_eq!(
            ApiError::SessionInvalid(String::new()).kind(),
            ErrorKind::SessionInvalid
        );
        assert_eq!(
            ApiError::Unreachable(String::new()).kind(),
            ErrorKind::Unreachable
        );
        assert_eq!(
            ApiError::Server {
                status: 500,
                message: String::new()
            }
            .kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn test_error_info_conversion() {
        let err = ApiError::Credentials("nope".to_string());
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::Credentials);
        assert_eq!(info.message, "Invalid credentials: nope");
    }
}
