//! SMB error types and the status-code taxonomy
//!
//! Both backends report failures through [`SmbError`]. The process backend
//! classifies `NT_STATUS_*` tokens printed by smbclient, the native backend
//! classifies numeric errno values, and both land on the same
//! [`FailureKind`] so callers never see which backend served a share.

use std::fmt;
use thiserror::Error;

/// Closed set of classified failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    AlreadyExists,
    AccessDenied,
    /// File where a directory was expected, or the other way around
    InvalidType,
    NotEmpty,
    FileInUse,
    ConnectionRefused,
    HostUnreachable,
    AuthenticationFailed,
    TimedOut,
    Generic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::NotFound => "not found",
            FailureKind::AlreadyExists => "already exists",
            FailureKind::AccessDenied => "access denied",
            FailureKind::InvalidType => "invalid type",
            FailureKind::NotEmpty => "directory not empty",
            FailureKind::FileInUse => "file in use",
            FailureKind::ConnectionRefused => "connection refused",
            FailureKind::HostUnreachable => "host unreachable",
            FailureKind::AuthenticationFailed => "authentication failed",
            FailureKind::TimedOut => "timed out",
            FailureKind::Generic => "smb error",
        };
        f.write_str(text)
    }
}

/// SMB-specific errors
#[derive(Error, Debug)]
pub enum SmbError {
    /// A classified remote failure attached to the path that produced it
    #[error("{kind}: {path}{}", code_suffix(.code))]
    Failure {
        kind: FailureKind,
        path: String,
        /// Raw vendor code, kept for diagnostics
        code: Option<String>,
    },

    /// Path rejected before any command was issued
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The client could not open the local side of a transfer
    #[error("failed opening local file {path:?}")]
    LocalResource { path: String },

    /// Transport not usable (process missing, exited, or unknown response)
    #[error("connection error: {0}")]
    ConnectionFailed(String),

    /// Operation not offered by this backend
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Neither the native binding nor the smbclient binary is usable
    #[error("no usable SMB backend: {0}")]
    NoBackend(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, SmbError>;

impl SmbError {
    pub fn failure(kind: FailureKind, path: impl Into<String>) -> Self {
        SmbError::Failure {
            kind,
            path: path.into(),
            code: None,
        }
    }

    pub fn with_code(kind: FailureKind, path: impl Into<String>, code: impl Into<String>) -> Self {
        SmbError::Failure {
            kind,
            path: path.into(),
            code: Some(code.into()),
        }
    }

    /// The taxonomy kind, when this is a classified failure
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SmbError::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            Some(FailureKind::FileInUse | FailureKind::TimedOut)
        ) || matches!(self, SmbError::ConnectionFailed(_) | SmbError::Io(_))
    }

    /// Check if this error is a permission issue
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self.kind(),
            Some(FailureKind::AccessDenied | FailureKind::AuthenticationFailed)
        )
    }

    /// Check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(FailureKind::NotFound)
    }
}

/// `NT_STATUS_*` tokens printed by smbclient and the kind each maps to
const STATUS_TABLE: &[(&str, FailureKind)] = &[
    ("NT_STATUS_OBJECT_PATH_NOT_FOUND", FailureKind::NotFound),
    ("NT_STATUS_OBJECT_NAME_NOT_FOUND", FailureKind::NotFound),
    ("NT_STATUS_NO_SUCH_FILE", FailureKind::NotFound),
    ("NT_STATUS_OBJECT_NAME_COLLISION", FailureKind::AlreadyExists),
    ("NT_STATUS_ACCESS_DENIED", FailureKind::AccessDenied),
    ("NT_STATUS_DIRECTORY_NOT_EMPTY", FailureKind::NotEmpty),
    ("NT_STATUS_FILE_IS_A_DIRECTORY", FailureKind::InvalidType),
    ("NT_STATUS_NOT_A_DIRECTORY", FailureKind::InvalidType),
    ("NT_STATUS_SHARING_VIOLATION", FailureKind::FileInUse),
    ("NT_STATUS_LOGON_FAILURE", FailureKind::AuthenticationFailed),
    ("NT_STATUS_NO_LOGON_SERVERS", FailureKind::AuthenticationFailed),
    ("NT_STATUS_BAD_NETWORK_NAME", FailureKind::HostUnreachable),
    ("NT_STATUS_HOST_UNREACHABLE", FailureKind::HostUnreachable),
    ("NT_STATUS_UNSUCCESSFUL", FailureKind::HostUnreachable),
    ("NT_STATUS_CONNECTION_REFUSED", FailureKind::ConnectionRefused),
    ("NT_STATUS_CONNECTION_RESET", FailureKind::ConnectionRefused),
    ("NT_STATUS_IO_TIMEOUT", FailureKind::TimedOut),
];

/// Statuses that end a session before the first prompt, checked as suffixes
/// of the first response line
const CONNECTION_STATUSES: &[&str] = &[
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_BAD_NETWORK_NAME",
    "NT_STATUS_UNSUCCESSFUL",
    "NT_STATUS_CONNECTION_REFUSED",
    "NT_STATUS_NO_LOGON_SERVERS",
    "NT_STATUS_HOST_UNREACHABLE",
    "NT_STATUS_IO_TIMEOUT",
    "NT_STATUS_ACCESS_DENIED",
];

/// Connection-level failure carried by the first line of a session, if any
pub fn connection_failure(line: &str, target: &str) -> Option<SmbError> {
    let line = line.trim_end().trim_end_matches(')');
    CONNECTION_STATUSES
        .iter()
        .find(|status| line.ends_with(*status))
        .map(|status| status_error(status, target))
}

/// Map a vendor status token; unknown tokens become `Generic`
pub fn classify_status(status: &str) -> FailureKind {
    STATUS_TABLE
        .iter()
        .find(|(token, _)| *token == status)
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Generic)
}

/// Build the error for a vendor status token, keeping the raw code
pub fn status_error(status: &str, path: &str) -> SmbError {
    SmbError::with_code(classify_status(status), path, status)
}

/// Map a native errno value
#[cfg(unix)]
pub fn classify_errno(errno: i32) -> FailureKind {
    match errno {
        libc::EPERM | libc::EACCES => FailureKind::AccessDenied,
        libc::ENOENT => FailureKind::NotFound,
        libc::EBUSY => FailureKind::FileInUse,
        libc::EEXIST => FailureKind::AlreadyExists,
        libc::ENOTDIR | libc::EISDIR => FailureKind::InvalidType,
        libc::ENOTEMPTY => FailureKind::NotEmpty,
        libc::ETIMEDOUT => FailureKind::TimedOut,
        libc::ECONNREFUSED => FailureKind::ConnectionRefused,
        libc::EHOSTDOWN | libc::EHOSTUNREACH => FailureKind::HostUnreachable,
        _ => FailureKind::Generic,
    }
}

/// Build the error for a native errno value, keeping the raw number
#[cfg(unix)]
pub fn errno_error(errno: i32, path: &str) -> SmbError {
    SmbError::with_code(classify_errno(errno), path, format!("errno {errno}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmbError::failure(FailureKind::NotFound, "/path/to/file");
        assert_eq!(err.to_string(), "not found: /path/to/file");

        let err = status_error("NT_STATUS_WEIRD_THING", "/x");
        assert_eq!(err.to_string(), "smb error: /x (NT_STATUS_WEIRD_THING)");

        let err = SmbError::Unsupported("append");
        assert_eq!(err.to_string(), "unsupported operation: append");
    }

    #[test]
    fn test_status_table() {
        assert_eq!(classify_status("NT_STATUS_NO_SUCH_FILE"), FailureKind::NotFound);
        assert_eq!(
            classify_status("NT_STATUS_OBJECT_NAME_COLLISION"),
            FailureKind::AlreadyExists
        );
        assert_eq!(
            classify_status("NT_STATUS_SHARING_VIOLATION"),
            FailureKind::FileInUse
        );
        assert_eq!(
            classify_status("NT_STATUS_FILE_IS_A_DIRECTORY"),
            FailureKind::InvalidType
        );
        assert_eq!(classify_status("NT_STATUS_SOMETHING_NEW"), FailureKind::Generic);
    }

    #[test]
    fn test_connection_failure() {
        let err = connection_failure(
            "session setup failed: NT_STATUS_LOGON_FAILURE",
            "//host/share",
        )
        .unwrap();
        assert_eq!(err.kind(), Some(FailureKind::AuthenticationFailed));
        assert!(err.to_string().contains("//host/share"));

        let err = connection_failure(
            "do_connect: Connection to host failed (Error NT_STATUS_CONNECTION_REFUSED)",
            "//host/share",
        )
        .unwrap();
        assert_eq!(err.kind(), Some(FailureKind::ConnectionRefused));

        let err = connection_failure("tree connect failed: NT_STATUS_BAD_NETWORK_NAME", "//h/s");
        assert_eq!(err.unwrap().kind(), Some(FailureKind::HostUnreachable));

        assert!(connection_failure("smb: \\> dir", "//h/s").is_none());
        assert!(connection_failure("NT_STATUS_NO_SUCH_FILE listing \\x", "//h/s").is_none());
    }

    #[test]
    fn test_unknown_status_keeps_code() {
        let err = status_error("NT_STATUS_DISK_FULL", "/big.bin");
        assert_eq!(err.kind(), Some(FailureKind::Generic));
        assert!(err.to_string().contains("NT_STATUS_DISK_FULL"));
    }

    #[cfg(unix)]
    #[test]
    fn test_errno_table() {
        assert_eq!(classify_errno(libc::ENOENT), FailureKind::NotFound);
        assert_eq!(classify_errno(libc::EACCES), FailureKind::AccessDenied);
        assert_eq!(classify_errno(libc::EPERM), FailureKind::AccessDenied);
        assert_eq!(classify_errno(libc::EISDIR), FailureKind::InvalidType);
        assert_eq!(classify_errno(libc::ENOTEMPTY), FailureKind::NotEmpty);
        assert_eq!(classify_errno(libc::EBUSY), FailureKind::FileInUse);
        assert_eq!(classify_errno(libc::ENOSPC), FailureKind::Generic);

        let err = errno_error(libc::ENOSPC, "/full");
        assert!(err.to_string().contains(&format!("errno {}", libc::ENOSPC)));
    }

    #[test]
    fn test_retryable() {
        assert!(SmbError::failure(FailureKind::FileInUse, "x").is_retryable());
        assert!(SmbError::ConnectionFailed("gone".to_string()).is_retryable());
        assert!(!SmbError::failure(FailureKind::AuthenticationFailed, "x").is_retryable());
        assert!(!SmbError::failure(FailureKind::NotFound, "x").is_retryable());
    }

    #[test]
    fn test_permission_error() {
        assert!(SmbError::failure(FailureKind::AccessDenied, "x").is_permission_error());
        assert!(SmbError::failure(FailureKind::AuthenticationFailed, "x").is_permission_error());
        assert!(!SmbError::failure(FailureKind::NotFound, "x").is_permission_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let smb_err: SmbError = io_err.into();

        assert!(matches!(smb_err, SmbError::Io(_)));
        assert!(smb_err.to_string().contains("I/O error"));
        assert!(!smb_err.is_not_found());
    }
}
