/*!
 * Configuration types for smbshare
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::protocols::smb::{
    AuthStrategy, HostConnection, NativeFactory, ProtocolVersion, ServerFacade, System,
    TimeZoneProvider,
};

/// Client configuration shared by every host a process talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// smbclient binary (None = search PATH)
    #[serde(default)]
    pub smbclient_path: Option<PathBuf>,

    /// `net` binary used for server time zones (None = search PATH)
    #[serde(default)]
    pub net_path: Option<PathBuf>,

    /// `stdbuf` binary used to unbuffer the client (None = search PATH)
    #[serde(default)]
    pub stdbuf_path: Option<PathBuf>,

    /// Connection timeout handed to the client, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Lowest protocol dialect to negotiate
    #[serde(default)]
    pub min_protocol: Option<ProtocolVersion>,

    /// Highest protocol dialect to negotiate
    #[serde(default)]
    pub max_protocol: Option<ProtocolVersion>,

    /// Use the native binding when one is compiled in and covers every
    /// share operation
    #[serde(default = "default_true")]
    pub prefer_native: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            smbclient_path: None,
            net_path: None,
            stdbuf_path: None,
            timeout_secs: default_timeout(),
            min_protocol: None,
            max_protocol: None,
            prefer_native: true,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    HostConnection::DEFAULT_TIMEOUT.as_secs()
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Probe the host for tools, letting configured paths win
    pub fn system(&self) -> System {
        System::detect()
            .with_smbclient(self.smbclient_path.clone())
            .with_net(self.net_path.clone())
            .with_stdbuf(self.stdbuf_path.clone())
    }

    /// Connection details for `host` with this configuration's bounds
    pub fn host_connection(&self, host: impl Into<String>, auth: AuthStrategy) -> HostConnection {
        let mut connection = HostConnection::new(host, auth).with_timeout(self.timeout());
        if let Some(version) = self.min_protocol {
            connection = connection.with_min_protocol(version);
        }
        if let Some(version) = self.max_protocol {
            connection = connection.with_max_protocol(version);
        }
        connection
    }

    /// Facade for `host`, with the compiled-in native binding if any
    pub fn server(&self, host: impl Into<String>, auth: AuthStrategy) -> Result<ServerFacade> {
        let system = self.system();
        let time_zone = TimeZoneProvider::new(&system);
        let facade = ServerFacade::new(
            self.host_connection(host, auth),
            system,
            time_zone,
            native_binding(),
            self.prefer_native,
        )?;
        Ok(facade)
    }
}

#[cfg(feature = "smb-native")]
fn native_binding() -> Option<NativeFactory> {
    Some(crate::protocols::smb::server::smb_rs_factory())
}

#[cfg(not(feature = "smb-native"))]
fn native_binding() -> Option<NativeFactory> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_secs, 20);
        assert!(config.prefer_native);
        assert!(config.min_protocol.is_none());
        assert_eq!(config.log_level, LogLevel::Info);
        // stderr
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            smbclient_path = "/opt/samba/bin/smbclient"
            timeout_secs = 5
            min_protocol = "SMB2"
            max_protocol = "SMB3_11"
            prefer_native = false
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.smbclient_path, Some(PathBuf::from("/opt/samba/bin/smbclient")));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.min_protocol, Some(ProtocolVersion::Smb2));
        assert_eq!(config.max_protocol, Some(ProtocolVersion::Smb3_11));
        assert!(!config.prefer_native);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let config = ClientConfig {
            net_path: Some(PathBuf::from("/usr/bin/net")),
            max_protocol: Some(ProtocolVersion::Nt1),
            verbose: true,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_host_connection_applies_bounds() {
        let config = ClientConfig {
            timeout_secs: 7,
            min_protocol: Some(ProtocolVersion::Smb2_10),
            ..Default::default()
        };
        let host = config.host_connection("server", AuthStrategy::Anonymous);
        assert_eq!(host.timeout, Duration::from_secs(7));
        assert_eq!(host.min_protocol, Some(ProtocolVersion::Smb2_10));
        assert!(host.max_protocol.is_none());
    }

    #[test]
    fn test_configured_paths_win() {
        let config = ClientConfig {
            smbclient_path: Some(PathBuf::from("/custom/smbclient")),
            ..Default::default()
        };
        assert_eq!(
            config.system().smbclient_path(),
            Some(std::path::Path::new("/custom/smbclient"))
        );
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
