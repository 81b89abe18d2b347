//! Host system probe and per-host time zone lookup
//!
//! Locates the external tools the process backend drives and answers which
//! UTC offset a server uses, since `dir` prints local times without a zone.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use chrono::{FixedOffset, Local, Offset};

use super::error::{Result, SmbError};
use super::parser::parse_offset;

/// External tools found on this host
#[derive(Debug, Clone, Default)]
pub struct System {
    smbclient: Option<PathBuf>,
    net: Option<PathBuf>,
    stdbuf: Option<PathBuf>,
    fd_path: PathBuf,
}

impl System {
    /// Probe `PATH` for the tools and pick the descriptor directory
    pub fn detect() -> Self {
        let fd_path = if Path::new("/proc/self/fd").is_dir() {
            PathBuf::from("/proc/self/fd")
        } else {
            PathBuf::from("/dev/fd")
        };
        let system = Self {
            smbclient: find_binary("smbclient"),
            net: find_binary("net"),
            stdbuf: find_binary("stdbuf"),
            fd_path,
        };
        tracing::debug!(
            smbclient = ?system.smbclient,
            net = ?system.net,
            stdbuf = ?system.stdbuf,
            "probed system tools"
        );
        system
    }

    /// Override the smbclient location; `None` keeps the probed one
    pub fn with_smbclient(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.smbclient = path;
        }
        self
    }

    pub fn with_net(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.net = path;
        }
        self
    }

    pub fn with_stdbuf(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.stdbuf = path;
        }
        self
    }

    /// Never wrap the client in stdbuf, even when it was found
    pub fn without_stdbuf(mut self) -> Self {
        self.stdbuf = None;
        self
    }

    pub fn smbclient_path(&self) -> Option<&Path> {
        self.smbclient.as_deref()
    }

    pub fn net_path(&self) -> Option<&Path> {
        self.net.as_deref()
    }

    pub fn stdbuf_path(&self) -> Option<&Path> {
        self.stdbuf.as_deref()
    }

    pub fn has_smbclient(&self) -> bool {
        self.smbclient.is_some()
    }

    /// Path the child opens to reach one of its own descriptors
    pub fn fd(&self, num: i32) -> String {
        format!("{}/{}", self.fd_path.display(), num)
    }

    /// Program and leading arguments that start smbclient, unbuffered when
    /// stdbuf is available
    pub fn client_command(&self) -> Result<(PathBuf, Vec<OsString>)> {
        let smbclient = self
            .smbclient
            .clone()
            .ok_or_else(|| SmbError::NoBackend("smbclient not found".to_string()))?;
        Ok(match &self.stdbuf {
            Some(stdbuf) => (
                stdbuf.clone(),
                vec![OsString::from("-o0"), smbclient.into_os_string()],
            ),
            None => (smbclient, Vec::new()),
        })
    }
}

/// First executable named `name` on `PATH`
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Per-host UTC offsets, looked up once and cached
#[derive(Debug, Default)]
pub struct TimeZoneProvider {
    net: Option<PathBuf>,
    fixed: Option<FixedOffset>,
    cache: Mutex<HashMap<String, FixedOffset>>,
}

impl TimeZoneProvider {
    pub fn new(system: &System) -> Self {
        Self {
            net: system.net.clone(),
            fixed: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Provider that answers the same offset for every host
    pub fn fixed(offset: FixedOffset) -> Self {
        Self {
            net: None,
            fixed: Some(offset),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Offset for `host`
    ///
    /// Dotted host names are asked with `net time zone`; everything else,
    /// and any failure, falls back to the local offset.
    pub fn get(&self, host: &str) -> FixedOffset {
        if let Some(offset) = self.fixed {
            return offset;
        }
        if let Ok(cache) = self.cache.lock() {
            if let Some(offset) = cache.get(host) {
                return *offset;
            }
        }

        let offset = self
            .remote_offset(host)
            .or_else(local_offset_from_date)
            .unwrap_or_else(|| Local::now().offset().fix());
        tracing::debug!(host, offset = %offset, "resolved server time zone");

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(host.to_string(), offset);
        }
        offset
    }

    fn remote_offset(&self, host: &str) -> Option<FixedOffset> {
        let net = self.net.as_ref()?;
        if !host.contains('.') {
            return None;
        }
        let output = Command::new(net)
            .args(["time", "zone", "-S", host])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_offset(String::from_utf8_lossy(&output.stdout).trim())
    }
}

fn local_offset_from_date() -> Option<FixedOffset> {
    let output = Command::new("date")
        .arg("+%z")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    parse_offset(String::from_utf8_lossy(&output.stdout).trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_binary() {
        assert!(find_binary("sh").is_some());
        assert!(find_binary("definitely-not-a-real-tool-xyz").is_none());
    }

    #[test]
    fn test_client_command_with_stdbuf() {
        let system = System::default()
            .with_smbclient(Some(PathBuf::from("/usr/bin/smbclient")))
            .with_stdbuf(Some(PathBuf::from("/usr/bin/stdbuf")));
        let (program, args) = system.client_command().unwrap();
        assert_eq!(program, PathBuf::from("/usr/bin/stdbuf"));
        assert_eq!(args, vec![OsString::from("-o0"), OsString::from("/usr/bin/smbclient")]);

        let (program, args) = system.without_stdbuf().client_command().unwrap();
        assert_eq!(program, PathBuf::from("/usr/bin/smbclient"));
        assert!(args.is_empty());
    }

    #[test]
    fn test_missing_client_is_no_backend() {
        let system = System::default();
        assert!(matches!(system.client_command(), Err(SmbError::NoBackend(_))));
    }

    #[test]
    fn test_overrides_keep_probe_when_none() {
        let system = System::default()
            .with_net(Some(PathBuf::from("/opt/samba/bin/net")))
            .with_net(None);
        assert_eq!(system.net_path(), Some(Path::new("/opt/samba/bin/net")));
    }

    #[test]
    fn test_fd_path() {
        let system = System::detect();
        assert!(system.fd(3).ends_with("/3"));
    }

    #[test]
    fn test_fixed_time_zone() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let provider = TimeZoneProvider::fixed(offset);
        assert_eq!(provider.get("server.example.com"), offset);
    }

    #[test]
    fn test_undotted_host_uses_local_offset_and_caches() {
        let provider = TimeZoneProvider::new(&System::default());
        let first = provider.get("fileserver");
        assert_eq!(provider.get("fileserver"), first);
    }
}
