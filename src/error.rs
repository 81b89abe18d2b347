/*!
 * Error types for smbshare
 */

use std::fmt;
use std::io;

use crate::protocols::smb::{FailureKind, SmbError};

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum Error {
    /// Remote operation failed
    Smb(SmbError),

    /// Configuration error
    Config(String),

    /// Logging could not be set up
    Logging(String),

    /// I/O error on the local side
    Io(io::Error),

    /// Generic error with message
    Other(String),
}

impl Error {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // Nothing can succeed until these are fixed
            Error::Config(_) | Error::Logging(_) => EXIT_FATAL,
            Error::Smb(err) if Self::is_fatal_smb(err) => EXIT_FATAL,
            _ => EXIT_FAILURE,
        }
    }

    /// Check if this error is fatal (retrying the same invocation cannot help)
    pub fn is_fatal(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }

    fn is_fatal_smb(err: &SmbError) -> bool {
        match err {
            SmbError::InvalidPath { .. } | SmbError::NoBackend(_) | SmbError::Unsupported(_) => true,
            SmbError::Failure { kind, .. } => matches!(
                kind,
                FailureKind::AuthenticationFailed
                    | FailureKind::HostUnreachable
                    | FailureKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Smb(err) => write!(f, "{}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Logging(msg) => write!(f, "Logging error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Smb(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<SmbError> for Error {
    fn from(err: SmbError) -> Self {
        Error::Smb(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("TOML serialize error: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Config("bad".to_string()).exit_code(), EXIT_FATAL);
        assert_eq!(
            Error::from(SmbError::failure(FailureKind::AuthenticationFailed, "//h/s")).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            Error::from(SmbError::InvalidPath {
                path: "/a?".to_string(),
                reason: "'?' is not allowed".to_string()
            })
            .exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            Error::from(SmbError::failure(FailureKind::NotFound, "/x")).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::Other, "x")).exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_FAILURE, 1);
        assert_eq!(EXIT_FATAL, 2);
    }

    #[test]
    fn test_is_fatal() {
        assert!(Error::Logging("x".to_string()).is_fatal());
        assert!(!Error::from(SmbError::failure(FailureKind::FileInUse, "/x")).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = Error::from(SmbError::failure(FailureKind::NotFound, "/docs/a.txt"));
        assert_eq!(err.to_string(), "not found: /docs/a.txt");
        assert_eq!(
            Error::Config("missing host".to_string()).to_string(),
            "Configuration error: missing host"
        );
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
        assert!(Error::Other("x".to_string()).source().is_none());
    }

    #[test]
    fn test_from_toml_error() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
