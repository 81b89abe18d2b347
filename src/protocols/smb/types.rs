//! SMB value types shared by both backends

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::AuthStrategy;

bitflags! {
    /// DOS attribute bits as reported by `allinfo` and `system.dos_attr.mode`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Mode: u32 {
        const READONLY  = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        const NORMAL    = 0x80;
    }
}

impl Mode {
    /// Bits `setmode` can change, with the letter smbclient uses for each
    pub const SETTABLE: [(Mode, char); 4] = [
        (Mode::READONLY, 'r'),
        (Mode::HIDDEN, 'h'),
        (Mode::SYSTEM, 's'),
        (Mode::ARCHIVE, 'a'),
    ];

    /// Decode the mode letters of a `dir` listing line
    pub fn from_letters(letters: &str) -> Mode {
        letters.chars().fold(Mode::empty(), |mode, c| {
            mode | match c {
                'R' => Mode::READONLY,
                'H' => Mode::HIDDEN,
                'S' => Mode::SYSTEM,
                'D' => Mode::DIRECTORY,
                'A' => Mode::ARCHIVE,
                'N' => Mode::NORMAL,
                _ => Mode::empty(),
            }
        })
    }
}

/// One entry produced by a listing or stat call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full path inside the share, `/`-separated
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub mode: Mode,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.mode.contains(Mode::DIRECTORY)
    }

    pub fn is_readonly(&self) -> bool {
        self.mode.contains(Mode::READONLY)
    }

    pub fn is_hidden(&self) -> bool {
        self.mode.contains(Mode::HIDDEN)
    }

    pub fn is_system(&self) -> bool {
        self.mode.contains(Mode::SYSTEM)
    }

    pub fn is_archived(&self) -> bool {
        self.mode.contains(Mode::ARCHIVE)
    }
}

/// Change notification operation codes, numbered as the server sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeCode {
    Added,
    Removed,
    Modified,
    RenamedFrom,
    RenamedTo,
    AddedStream,
    RemovedStream,
    ModifiedStream,
    RemovedByDelete,
}

impl ChangeCode {
    pub fn from_code(code: u32) -> Option<ChangeCode> {
        Some(match code {
            1 => ChangeCode::Added,
            2 => ChangeCode::Removed,
            3 => ChangeCode::Modified,
            4 => ChangeCode::RenamedFrom,
            5 => ChangeCode::RenamedTo,
            6 => ChangeCode::AddedStream,
            7 => ChangeCode::RemovedStream,
            8 => ChangeCode::ModifiedStream,
            9 => ChangeCode::RemovedByDelete,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            ChangeCode::Added => 1,
            ChangeCode::Removed => 2,
            ChangeCode::Modified => 3,
            ChangeCode::RenamedFrom => 4,
            ChangeCode::RenamedTo => 5,
            ChangeCode::AddedStream => 6,
            ChangeCode::RemovedStream => 7,
            ChangeCode::ModifiedStream => 8,
            ChangeCode::RemovedByDelete => 9,
        }
    }
}

/// One decoded change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub code: ChangeCode,
    pub path: String,
}

/// A disk share advertised by a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub name: String,
    pub comment: String,
}

/// Dialect names accepted by `client min protocol` / `client max protocol`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolVersion {
    Nt1,
    Smb2,
    #[serde(rename = "SMB2_02")]
    Smb2_02,
    #[serde(rename = "SMB2_10")]
    Smb2_10,
    #[serde(rename = "SMB2_22")]
    Smb2_22,
    #[serde(rename = "SMB2_24")]
    Smb2_24,
    Smb3,
    #[serde(rename = "SMB3_00")]
    Smb3_00,
    #[serde(rename = "SMB3_02")]
    Smb3_02,
    #[serde(rename = "SMB3_10")]
    Smb3_10,
    #[serde(rename = "SMB3_11")]
    Smb3_11,
}

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::Nt1 => "NT1",
            ProtocolVersion::Smb2 => "SMB2",
            ProtocolVersion::Smb2_02 => "SMB2_02",
            ProtocolVersion::Smb2_10 => "SMB2_10",
            ProtocolVersion::Smb2_22 => "SMB2_22",
            ProtocolVersion::Smb2_24 => "SMB2_24",
            ProtocolVersion::Smb3 => "SMB3",
            ProtocolVersion::Smb3_00 => "SMB3_00",
            ProtocolVersion::Smb3_02 => "SMB3_02",
            ProtocolVersion::Smb3_10 => "SMB3_10",
            ProtocolVersion::Smb3_11 => "SMB3_11",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details for one logical remote server
///
/// Built once and shared (behind an `Arc`) by every session for the host.
///
/// # Example
///
/// ```
/// use smbshare::protocols::smb::{AuthStrategy, HostConnection, ProtocolVersion};
///
/// let host = HostConnection::new("fileserver.acme.corp", AuthStrategy::basic("jdoe", "ACME", "secret"))
///     .with_min_protocol(ProtocolVersion::Smb2)
///     .with_timeout(std::time::Duration::from_secs(10));
/// assert_eq!(host.host, "fileserver.acme.corp");
/// ```
#[derive(Debug, Clone)]
pub struct HostConnection {
    /// Hostname or IP address
    pub host: String,

    pub auth: AuthStrategy,

    pub min_protocol: Option<ProtocolVersion>,

    pub max_protocol: Option<ProtocolVersion>,

    /// Connection-level timeout handed to the client
    pub timeout: Duration,
}

impl HostConnection {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new(host: impl Into<String>, auth: AuthStrategy) -> Self {
        Self {
            host: host.into(),
            auth,
            min_protocol: None,
            max_protocol: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_min_protocol(mut self, version: ProtocolVersion) -> Self {
        self.min_protocol = Some(version);
        self
    }

    pub fn with_max_protocol(mut self, version: ProtocolVersion) -> Self {
        self.max_protocol = Some(version);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `//host/share` target understood by smbclient
    pub fn share_target(&self, share: &str) -> String {
        format!("//{}/{}", self.host, share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_letters() {
        assert_eq!(Mode::from_letters("A"), Mode::ARCHIVE);
        assert_eq!(Mode::from_letters("DH"), Mode::DIRECTORY | Mode::HIDDEN);
        assert_eq!(Mode::from_letters("N"), Mode::NORMAL);
        assert_eq!(Mode::from_letters(""), Mode::empty());
    }

    #[test]
    fn test_change_codes() {
        for code in 1..=9 {
            let change = ChangeCode::from_code(code).unwrap();
            assert_eq!(change.code(), code);
        }
        assert_eq!(ChangeCode::from_code(0), None);
        assert_eq!(ChangeCode::from_code(10), None);
    }

    #[test]
    fn test_host_connection_defaults() {
        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        assert_eq!(host.timeout, Duration::from_secs(20));
        assert!(host.min_protocol.is_none());
        assert_eq!(host.share_target("data"), "//server/data");
    }

    #[test]
    fn test_protocol_version_serde() {
        let version: ProtocolVersion = serde_json::from_str("\"SMB3_11\"").unwrap();
        assert_eq!(version, ProtocolVersion::Smb3_11);
        let version: ProtocolVersion = serde_json::from_str("\"NT1\"").unwrap();
        assert_eq!(version.to_string(), "NT1");
    }
}
