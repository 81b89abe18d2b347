//! Process-backed share session
//!
//! Every operation is one (or two) smbclient commands on a lazily spawned
//! transport. Transfers and notify run on their own dedicated transports so
//! the interactive framing of the session transport is never disturbed.

use std::path::Path;
use std::sync::Arc;

use super::auth::AuthStrategy;
use super::error::{FailureKind, Result, SmbError};
use super::notify::NotifyStream;
use super::parser::{check_for_error, error_code, parse_listing, parse_stat};
use super::stream::{DownloadStream, RemoteRead, RemoteWrite, UploadStream};
use super::system::{System, TimeZoneProvider};
use super::transport::{SpawnSpec, Transport, AUTH_FD, DOWNLOAD_FD, UPLOAD_FD};
use super::types::{HostConnection, Mode, RemoteEntry};
use super::Share;

/// Characters smbclient cannot carry inside a quoted path
pub const FORBIDDEN_PATH_CHARS: [char; 7] = ['?', '<', '>', ':', '*', '|', '"'];

/// Everything a session needs to spawn a client for a host
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub host: Arc<HostConnection>,
    pub system: Arc<System>,
    pub time_zone: Arc<TimeZoneProvider>,
}

impl SessionContext {
    pub fn new(host: HostConnection, system: System, time_zone: TimeZoneProvider) -> Self {
        Self {
            host: Arc::new(host),
            system: Arc::new(system),
            time_zone: Arc::new(time_zone),
        }
    }

    pub fn auth(&self) -> &AuthStrategy {
        &self.host.auth
    }

    /// Client invocation with auth, timeout and protocol bounds applied;
    /// `target` arguments go last
    pub fn client_spec<I, S>(&self, description: &str, target: I) -> Result<SpawnSpec>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let (program, leading) = self.system.client_command()?;
        let host = &self.host;
        let mut spec = SpawnSpec::new(program, description)
            .args(leading)
            .args(host.auth.command_line_args())
            .arg(format!("--authentication-file={}", self.system.fd(AUTH_FD)))
            .arg("-t")
            .arg(host.timeout.as_secs().max(1).to_string());
        if let Some(version) = host.min_protocol {
            spec = spec.arg(format!("--option=client min protocol={version}"));
        }
        if let Some(version) = host.max_protocol {
            spec = spec.arg(format!("--option=client max protocol={version}"));
        }
        for (key, value) in host.auth.environment() {
            spec = spec.env(key, value);
        }
        Ok(spec.args(target))
    }
}

/// Reject paths smbclient cannot represent
pub fn verify_path(path: &str) -> Result<()> {
    let bad = path
        .chars()
        .find(|c| FORBIDDEN_PATH_CHARS.contains(c) || c.is_control());
    match bad {
        Some(c) => Err(SmbError::InvalidPath {
            path: path.to_string(),
            reason: format!("{c:?} is not allowed"),
        }),
        None => Ok(()),
    }
}

/// Quote a remote path for the command syntax: backslash separated, no
/// leading separator
pub fn escape_path(path: &str) -> Result<String> {
    verify_path(path)?;
    let path = if path == "/" { "" } else { path };
    let path = path.replace('/', "\\");
    Ok(format!("\"{}\"", path.trim_start_matches('\\')))
}

/// Quote a local path for `get`/`put`
pub fn escape_local_path(path: &Path) -> String {
    format!("\"{}\"", path.to_string_lossy().replace('"', "\\\""))
}

fn base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// One share driven through a long-lived smbclient process
pub struct ShareSession {
    context: SessionContext,
    name: String,
    transport: Option<Transport>,
    reconnects: usize,
}

impl ShareSession {
    pub fn new(context: SessionContext, name: impl Into<String>) -> Self {
        Self {
            context,
            name: name.into(),
            transport: None,
            reconnects: 0,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// How many times the session transport was replaced after a transient failure
    pub fn reconnect_count(&self) -> usize {
        self.reconnects
    }

    fn spawn_spec(&self) -> Result<SpawnSpec> {
        let target = self.context.host.share_target(&self.name);
        self.context.client_spec(&target, [target.as_str()])
    }

    /// Spawn a client, authenticate and wait for the first prompt
    pub(crate) fn open_transport(&self) -> Result<Transport> {
        let mut transport = Transport::open(self.spawn_spec()?)?;
        if let Err(err) = transport.write_auth_credentials(self.context.auth()) {
            // a client that rejected us early says why on stdout
            transport.clear_till_prompt()?;
            return Err(err);
        }
        transport.clear_till_prompt()?;
        Ok(transport)
    }

    fn connect(&mut self) -> Result<&mut Transport> {
        let valid = self.transport.as_mut().is_some_and(|t| t.is_valid());
        if !valid {
            self.transport = Some(self.open_transport()?);
        }
        self.transport
            .as_mut()
            .ok_or_else(|| SmbError::ConnectionFailed("no session transport".to_string()))
    }

    /// Replace the session transport with a fresh process
    pub fn reconnect(&mut self) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => {
                transport.reconnect()?;
                transport.clear_till_prompt()?;
            }
            None => self.transport = Some(self.open_transport()?),
        }
        self.reconnects += 1;
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<Vec<String>> {
        let transport = self.connect()?;
        transport.command(command)?;
        transport.read_response()
    }

    /// Execute a command whose success is silence, reconnecting once when
    /// the file is in use
    fn run(&mut self, command: &str, path: &str) -> Result<()> {
        let output = self.execute(command)?;
        match check_for_error(&output, path) {
            Err(err) if err.kind() == Some(FailureKind::FileInUse) => {
                tracing::warn!(share = %self.name, path, "file in use, reconnecting");
                self.reconnect()?;
                let output = self.execute(command)?;
                check_for_error(&output, path)
            }
            other => other,
        }
    }

    /// Close the session transport; the next operation spawns a new one
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(true);
        }
    }
}

impl Share for ShareSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let escaped = escape_path(path)?;
        let output = self.execute(&format!("cd {escaped}"))?;
        check_for_error(&output, path)?;
        let output = self.execute("dir")?;
        self.execute("cd /")?;
        if output.first().is_some_and(|line| error_code(line).is_some()) {
            check_for_error(&output, path)?;
        }
        let offset = self.context.time_zone.get(&self.context.host.host);
        Ok(parse_listing(&output, path, offset))
    }

    fn stat(&mut self, path: &str) -> Result<RemoteEntry> {
        let escaped = escape_path(path)?;
        let output = self.execute(&format!("allinfo {escaped}"))?;
        // some servers answer allinfo on the root with almost nothing
        if output.len() < 3 || output.first().is_some_and(|line| error_code(line).is_some()) {
            check_for_error(&output, path)?;
        }
        let offset = self.context.time_zone.get(&self.context.host.host);
        let record = parse_stat(&output, offset);
        Ok(RemoteEntry {
            path: path.to_string(),
            name: base_name(path),
            size: record.size,
            mtime: record.mtime,
            mode: record.mode,
        })
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let escaped = escape_path(path)?;
        self.run(&format!("mkdir {escaped}"), path)
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let escaped = escape_path(path)?;
        self.run(&format!("rmdir {escaped}"), path)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let escaped = escape_path(path)?;
        match self.run(&format!("del {escaped}"), path) {
            // del reports a directory as missing; a listing tells the two apart
            Err(err) if err.is_not_found() => match self.list(path) {
                Ok(_) => Err(SmbError::failure(FailureKind::InvalidType, path)),
                Err(_) => Err(err),
            },
            other => other,
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let source = escape_path(from)?;
        let target = escape_path(to)?;
        self.run(&format!("rename {source} {target}"), from)
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        let escaped = escape_path(remote)?;
        self.run(&format!("put {} {escaped}", escape_local_path(local)), remote)
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        let escaped = escape_path(remote)?;
        self.run(&format!("get {escaped} {}", escape_local_path(local)), remote)
    }

    fn read(&mut self, path: &str) -> Result<RemoteRead> {
        let escaped = escape_path(path)?;
        let mut transport = self.open_transport()?;
        transport.write(&format!("get {escaped} {}", self.context.system.fd(DOWNLOAD_FD)))?;
        transport.write("exit")?;
        let download = transport.take_download()?;
        Ok(Box::new(DownloadStream::new(transport, download, path)))
    }

    fn write(&mut self, path: &str) -> Result<Box<dyn RemoteWrite>> {
        let escaped = escape_path(path)?;
        let mut transport = self.open_transport()?;
        transport.write(&format!("put {} {escaped}", self.context.system.fd(UPLOAD_FD)))?;
        transport.write("exit")?;
        let upload = transport.take_upload()?;
        Ok(Box::new(UploadStream::new(transport, upload, path)))
    }

    fn append(&mut self, _path: &str) -> Result<Box<dyn RemoteWrite>> {
        Err(SmbError::Unsupported("append with the smbclient backend"))
    }

    fn set_attributes(&mut self, path: &str, mode: Mode) -> Result<()> {
        let escaped = escape_path(path)?;
        // setmode only adds or removes flags, so clear everything first
        self.run(&format!("setmode {escaped} -rsha"), path)?;
        let letters: String = Mode::SETTABLE
            .iter()
            .filter(|(bit, _)| mode.contains(*bit))
            .map(|(_, letter)| *letter)
            .collect();
        if letters.is_empty() {
            return Ok(());
        }
        self.run(&format!("setmode {escaped} +{letters}"), path)
    }

    fn notify(&mut self, path: &str) -> Result<NotifyStream> {
        let path = format!("/{}", path.trim_start_matches('/'));
        let escaped = escape_path(&path)?;
        let transport = self.open_transport()?;
        NotifyStream::start(transport, &path, &escaped)
    }
}

impl std::fmt::Debug for ShareSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareSession")
            .field("host", &self.context.host.host)
            .field("name", &self.name)
            .field("connected", &self.transport.as_ref().is_some_and(Transport::is_open))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::protocols::smb::types::ProtocolVersion;

    fn context(auth: AuthStrategy) -> SessionContext {
        let system = System::default()
            .with_smbclient(Some(PathBuf::from("/usr/bin/smbclient")))
            .without_stdbuf();
        let host = HostConnection::new("server", auth)
            .with_min_protocol(ProtocolVersion::Smb2)
            .with_max_protocol(ProtocolVersion::Smb3);
        SessionContext::new(
            host,
            system,
            TimeZoneProvider::fixed(chrono::FixedOffset::east_opt(0).unwrap()),
        )
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("/").unwrap(), "\"\"");
        assert_eq!(escape_path("/docs/a b.txt").unwrap(), "\"docs\\a b.txt\"");
        assert_eq!(escape_path("docs").unwrap(), "\"docs\"");
    }

    #[test]
    fn test_forbidden_characters() {
        for path in ["/a?b", "/a<b", "/a>b", "/c:", "/*", "/a|b", "/\"q\"", "/tab\there", "/nl\n"] {
            match escape_path(path) {
                Err(SmbError::InvalidPath { path: rejected, .. }) => assert_eq!(rejected, path),
                other => panic!("{path:?} was not rejected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_escape_local_path() {
        assert_eq!(
            escape_local_path(Path::new("/tmp/say \"hi\".txt")),
            "\"/tmp/say \\\"hi\\\".txt\""
        );
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/docs/a.txt"), "a.txt");
        assert_eq!(base_name("/docs/"), "docs");
        assert_eq!(base_name("/"), "");
    }

    #[test]
    fn test_spawn_spec_arguments() {
        let session = ShareSession::new(context(AuthStrategy::basic("jdoe", "ACME", "pw")), "data");
        let spec = session.spawn_spec().unwrap();
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(spec.program, PathBuf::from("/usr/bin/smbclient"));
        assert_eq!(&args[..2], ["-W", "ACME"]);
        assert!(args[2].starts_with("--authentication-file="));
        assert!(args[2].ends_with("/3"));
        assert!(args.contains(&"--option=client min protocol=SMB2".to_string()));
        assert!(args.contains(&"--option=client max protocol=SMB3".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("//server/data"));
        assert_eq!(spec.target, "//server/data");
    }

    #[test]
    fn test_invalid_path_never_spawns() {
        // the client path does not exist, so any spawn would fail differently
        let mut session = ShareSession::new(context(AuthStrategy::Anonymous), "data");
        assert!(matches!(session.mkdir("/bad?"), Err(SmbError::InvalidPath { .. })));
        assert!(matches!(session.delete("/bad*"), Err(SmbError::InvalidPath { .. })));
        assert!(session.transport.is_none());
    }

    #[test]
    fn test_append_is_unsupported() {
        let mut session = ShareSession::new(context(AuthStrategy::Anonymous), "data");
        assert!(matches!(session.append("/x"), Err(SmbError::Unsupported(_))));
    }
}
