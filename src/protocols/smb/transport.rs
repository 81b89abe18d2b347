//! Subprocess transport for the smbclient backend
//!
//! A [`Transport`] owns one smbclient process and the six descriptors the
//! protocol needs:
//!
//! | child fd | direction | purpose |
//! |---|---|---|
//! | 0 | request in | interactive commands |
//! | 1 | response out | command output and prompts |
//! | 2 | diagnostic out | drained in the background |
//! | 3 | auth in | `username=`/`password=` payload, closed after one write |
//! | 4 | upload in | bulk data for `put <fd 4> <remote>` |
//! | 5 | download out | bulk data for `get <remote> <fd 5>` |
//!
//! Requests and responses are framed by the prompt: every
//! [`Transport::command`] must be followed by exactly one
//! [`Transport::read_response`] before the next command, otherwise the
//! framing for this process is lost.

#![allow(unsafe_code)]

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::auth::{AuthStrategy, Secret};
use super::error::{connection_failure, FailureKind, Result, SmbError};

/// Prefix of every prompt line; the only response delimiter
pub const PROMPT_DELIMITER: &str = "smb:";

/// Locale pinned for the child so dates and messages parse the same way everywhere
pub const LOCALE: &str = "en_US.UTF-8";

/// Terminal width handed to the child so listing lines never wrap
pub const TERMINAL_COLUMNS: &str = "8192";

const DIAGNOSTIC_LIMIT: usize = 64 * 1024;

/// Child-side descriptor numbers
pub const AUTH_FD: RawFd = 3;
pub const UPLOAD_FD: RawFd = 4;
pub const DOWNLOAD_FD: RawFd = 5;

/// Program, arguments and environment a transport is (re)spawned from
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Target used as the path of connection-level failures, e.g. `//host/share`
    pub target: String,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            target: target.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir("/")
            .env("CLI_FORCE_INTERACTIVE", "y")
            .env("LC_ALL", LOCALE)
            .env("LANG", LOCALE)
            .env("COLUMNS", TERMINAL_COLUMNS)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        command
    }
}

/// Shared handle on the child process, usable from other threads to force
/// the transport closed
#[derive(Debug)]
pub struct ProcessHandle {
    child: Mutex<Child>,
    pid: u32,
    reaped: AtomicBool,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The child was waited for; its pid and group id may belong to
    /// someone else now
    pub fn has_exited(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }

    /// Signal the whole process group; the client may have forked helpers
    /// that hold the pipes open
    pub fn terminate(&self) {
        match self.child.try_lock() {
            // holding the lock keeps an exited child unreaped, so its
            // group id cannot be reused under us
            Ok(mut child) => {
                if self.has_exited() {
                    return;
                }
                self.kill_group();
                let _ = child.kill();
            }
            // a waiter holds the lock, so the child is not reaped yet
            Err(_) if !self.has_exited() => self.kill_group(),
            Err(_) => {}
        }
    }

    fn kill_group(&self) {
        if let Ok(pid) = i32::try_from(self.pid) {
            // SAFETY: kill has no memory-safety preconditions; the group id
            // is the child's pid because it was spawned as a group leader
            // and has not been reaped.
            unsafe {
                libc::kill(-pid, libc::SIGTERM);
            }
        }
    }

    fn reap_if_exited(&self, child: &mut Child) -> bool {
        if self.has_exited() {
            return true;
        }
        match child.try_wait() {
            Ok(None) => false,
            _ => {
                self.reaped.store(true, Ordering::SeqCst);
                true
            }
        }
    }

    fn is_running(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => !self.reap_if_exited(&mut child),
            Err(_) => false,
        }
    }

    fn wait(&self) {
        if let Ok(mut child) = self.child.lock() {
            if !self.has_exited() {
                let _ = child.wait();
                self.reaped.store(true, Ordering::SeqCst);
            }
        }
    }
}

struct Channels {
    process: Arc<ProcessHandle>,
    request: Option<ChildStdin>,
    response: BufReader<ChildStdout>,
    diagnostics: Arc<Mutex<String>>,
    auth: Option<File>,
    upload: Option<File>,
    download: Option<File>,
}

enum State {
    Open(Box<Channels>),
    Closed,
}

/// How a framed read ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The next prompt was seen
    Delimited,
    /// The line callback asked to stop
    Stopped,
    /// The response stream closed before a prompt
    Closed,
}

/// One smbclient process and its pipe set
pub struct Transport {
    spec: SpawnSpec,
    state: State,
    credentials: Option<Secret>,
}

impl Transport {
    /// Spawn the client with all six descriptors wired up
    pub fn open(spec: SpawnSpec) -> Result<Self> {
        let state = State::Open(Box::new(spawn(&spec)?));
        let mut transport = Self {
            spec,
            state,
            credentials: None,
        };
        if !transport.is_valid() {
            let detail = transport.diagnostics();
            transport.close(true);
            return Err(SmbError::ConnectionFailed(format!(
                "client exited immediately{}",
                stderr_suffix(&detail)
            )));
        }
        Ok(transport)
    }

    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    /// Open and the process still running
    pub fn is_valid(&mut self) -> bool {
        match &self.state {
            State::Open(channels) => channels.process.is_running(),
            State::Closed => false,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Handle that can force this transport closed from another thread
    pub fn process_handle(&self) -> Option<Arc<ProcessHandle>> {
        match &self.state {
            State::Open(channels) => Some(Arc::clone(&channels.process)),
            State::Closed => None,
        }
    }

    /// Everything the client wrote to its diagnostic stream so far
    pub fn diagnostics(&self) -> String {
        match &self.state {
            State::Open(channels) => channels
                .diagnostics
                .lock()
                .map(|text| text.clone())
                .unwrap_or_default(),
            State::Closed => String::new(),
        }
    }

    /// Write one payload to the auth descriptor and close it, which tells the
    /// client authentication data is complete
    pub fn write_auth_credentials(&mut self, auth: &AuthStrategy) -> Result<()> {
        let payload = Secret(auth.auth_payload());
        self.write_auth_payload(&payload)?;
        self.credentials = Some(payload);
        Ok(())
    }

    fn write_auth_payload(&mut self, payload: &Secret) -> Result<()> {
        let channels = self.channels_mut()?;
        let mut auth = channels.auth.take().ok_or_else(|| {
            SmbError::ConnectionFailed("authentication already written".to_string())
        })?;
        auth.write_all(payload.expose().as_bytes()).map_err(|e| {
            SmbError::ConnectionFailed(format!("failed writing authentication: {e}"))
        })?;
        Ok(())
    }

    /// Append a line terminator and flush to the request stream
    pub fn write(&mut self, line: &str) -> Result<()> {
        if !self.is_valid() {
            return Err(SmbError::ConnectionFailed(
                "transport is not valid".to_string(),
            ));
        }
        self.send(line)
    }

    /// Write a command followed by an empty line; the client answers the
    /// empty line with the prompt that closes the response
    pub fn command(&mut self, command: &str) -> Result<()> {
        self.write(command)?;
        self.write("")
    }

    fn send(&mut self, line: &str) -> Result<()> {
        tracing::trace!(target: "smbshare::transport", command = line, "write");
        let channels = self.channels_mut()?;
        let request = channels
            .request
            .as_mut()
            .ok_or_else(|| SmbError::ConnectionFailed("request stream closed".to_string()))?;
        request.write_all(line.as_bytes())?;
        request.write_all(b"\n")?;
        request.flush()?;
        Ok(())
    }

    /// Blocking read of one line; `None` once the process closed its output
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let channels = self.channels_mut()?;
        let mut buf = Vec::new();
        let read = channels.response.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read one framed response: every line up to the next prompt
    ///
    /// The first line after a write is the echoed prompt. It is checked for
    /// connection-level failures and discarded. A response that ends without
    /// a prompt is an error; partial output is never returned.
    pub fn read_response(&mut self) -> Result<Vec<String>> {
        let mut output = Vec::new();
        let outcome = self.read_response_with(|line| {
            output.push(line.to_string());
            ControlFlow::Continue(())
        })?;
        match outcome {
            ReadOutcome::Closed => Err(self.unknown_error(output.first().map(String::as_str))),
            _ => Ok(output),
        }
    }

    /// Framed read feeding each line to `on_line`, for responses that stream
    pub fn read_response_with<F>(&mut self, mut on_line: F) -> Result<ReadOutcome>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let first = match self.read_line()? {
            Some(line) => line,
            None => return Err(self.unknown_error(None)),
        };
        if let Some(err) = connection_failure(&first, &self.spec.target) {
            return Err(err);
        }

        let mut line = if is_prompt(&first) {
            self.read_line()?
        } else {
            Some(first)
        };
        while let Some(current) = line {
            if is_prompt(&current) {
                return Ok(ReadOutcome::Delimited);
            }
            if on_line(&current).is_break() {
                return Ok(ReadOutcome::Stopped);
            }
            line = self.read_line()?;
        }
        Ok(ReadOutcome::Closed)
    }

    /// Consume lines up to the first prompt right after spawning, checking
    /// each for connection failures, then resynchronize with an empty command
    pub fn clear_till_prompt(&mut self) -> Result<()> {
        // a client that already exited still left its reason on stdout
        let _ = self.send("");
        loop {
            match self.read_line()? {
                None => return Err(self.unknown_error(None)),
                Some(line) => {
                    if let Some(err) = connection_failure(&line, &self.spec.target) {
                        return Err(err);
                    }
                    if is_prompt(&line) {
                        break;
                    }
                }
            }
        }
        self.write("")
            .map_err(|_| SmbError::failure(FailureKind::ConnectionRefused, &self.spec.target))?;
        self.read_line()?;
        Ok(())
    }

    /// Read every remaining output line until the process closes its output
    pub fn read_remaining(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Hand the upload channel (parent end of child fd 4) to the caller
    pub fn take_upload(&mut self) -> Result<File> {
        self.channels_mut()?
            .upload
            .take()
            .ok_or_else(|| SmbError::ConnectionFailed("upload channel already taken".to_string()))
    }

    /// Hand the download channel (parent end of child fd 5) to the caller
    pub fn take_download(&mut self) -> Result<File> {
        self.channels_mut()?
            .download
            .take()
            .ok_or_else(|| {
                SmbError::ConnectionFailed("download channel already taken".to_string())
            })
    }

    /// Close the transport
    ///
    /// With `terminate` the process group is signalled. Without it only the
    /// request and bulk pipes are closed and the process is left to finish
    /// what it is doing and exit on its own.
    pub fn close(&mut self, terminate: bool) {
        let State::Open(mut channels) = std::mem::replace(&mut self.state, State::Closed) else {
            return;
        };
        tracing::debug!(
            target: "smbshare::transport",
            pid = channels.process.pid(),
            terminate,
            "closing smbclient"
        );
        if terminate {
            channels.process.terminate();
        }
        channels.request.take();
        channels.auth.take();
        channels.upload.take();
        channels.download.take();
        if !terminate {
            let mut sink = Vec::new();
            let _ = channels.response.read_to_end(&mut sink);
        }
        channels.process.wait();
    }

    /// Close without terminating, then spawn again from the same spec and
    /// replay the credentials written to the previous process
    pub fn reconnect(&mut self) -> Result<()> {
        tracing::info!(target: "smbshare::transport", target_share = %self.spec.target, "reconnecting");
        self.close(false);
        self.state = State::Open(Box::new(spawn(&self.spec)?));
        if let Some(payload) = self.credentials.take() {
            let result = self.write_auth_payload(&payload);
            self.credentials = Some(payload);
            result?;
        }
        if !self.is_valid() {
            return Err(SmbError::ConnectionFailed(
                "client exited after reconnect".to_string(),
            ));
        }
        Ok(())
    }

    fn channels_mut(&mut self) -> Result<&mut Channels> {
        match &mut self.state {
            State::Open(channels) => Ok(channels),
            State::Closed => Err(SmbError::ConnectionFailed(
                "transport is closed".to_string(),
            )),
        }
    }

    fn unknown_error(&self, line: Option<&str>) -> SmbError {
        match line {
            Some(line) if !line.is_empty() => {
                SmbError::ConnectionFailed(format!("unknown error ({line})"))
            }
            _ => {
                let detail = self.diagnostics();
                SmbError::ConnectionFailed(format!("unknown error{}", stderr_suffix(&detail)))
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close(true);
    }
}

pub fn is_prompt(line: &str) -> bool {
    line.starts_with(PROMPT_DELIMITER)
}

fn stderr_suffix(detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        String::new()
    } else {
        format!(" (stderr: {detail})")
    }
}

fn spawn(spec: &SpawnSpec) -> Result<Channels> {
    let (auth_child, auth_parent) = cloexec_pipe()?;
    let (upload_child, upload_parent) = cloexec_pipe()?;
    let (download_parent, download_child) = cloexec_pipe()?;

    let child_fds = [
        auth_child.as_raw_fd(),
        upload_child.as_raw_fd(),
        download_child.as_raw_fd(),
    ];
    let mut command = spec.command();
    // SAFETY: the closure only calls fcntl and dup2, both async-signal-safe,
    // and touches no memory shared with the parent.
    unsafe {
        command.pre_exec(move || remap_descriptors(&child_fds));
    }

    let mut child = command.spawn().map_err(|e| {
        SmbError::ConnectionFailed(format!(
            "failed to start {}: {e}",
            spec.program.display()
        ))
    })?;
    drop((auth_child, upload_child, download_child));

    let pid = child.id();
    tracing::debug!(
        target: "smbshare::transport",
        pid,
        program = %spec.program.display(),
        target_share = %spec.target,
        "spawned smbclient"
    );

    let request = child.stdin.take();
    let response = child
        .stdout
        .take()
        .ok_or_else(|| SmbError::ConnectionFailed("response stream missing".to_string()))?;
    let diagnostics = Arc::new(Mutex::new(String::new()));
    if let Some(stderr) = child.stderr.take() {
        let sink = Arc::clone(&diagnostics);
        thread::Builder::new()
            .name(format!("smbclient-stderr-{pid}"))
            .spawn(move || drain_diagnostics(stderr, &sink))?;
    }

    Ok(Channels {
        process: Arc::new(ProcessHandle {
            child: Mutex::new(child),
            pid,
            reaped: AtomicBool::new(false),
        }),
        request,
        response: BufReader::new(response),
        diagnostics,
        auth: Some(File::from(auth_parent)),
        upload: Some(File::from(upload_parent)),
        download: Some(File::from(download_parent)),
    })
}

fn drain_diagnostics(stderr: impl Read, sink: &Mutex<String>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if let Ok(mut text) = sink.lock() {
                    if text.len() < DIAGNOSTIC_LIMIT {
                        text.push_str(&String::from_utf8_lossy(&buf));
                    }
                }
            }
        }
    }
}

/// Returns `(read end, write end)`, both close-on-exec
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    // SAFETY: fds points to two writable c_ints as pipe(2) requires.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded so both descriptors are open and owned here.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        // SAFETY: fd is an open descriptor owned by this function.
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((read, write))
}

/// Runs in the forked child: move the three extra pipe ends onto fds 3, 4, 5.
/// Sources are staged above 10 first so no target clobbers a later source.
fn remap_descriptors(fds: &[RawFd; 3]) -> io::Result<()> {
    let mut staged = [-1; 3];
    for (slot, fd) in staged.iter_mut().zip(fds) {
        // SAFETY: fd is open in the child; F_DUPFD_CLOEXEC only allocates a descriptor.
        let dup = unsafe { libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, 10) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        *slot = dup;
    }
    for (target, fd) in [AUTH_FD, UPLOAD_FD, DOWNLOAD_FD].into_iter().zip(staged) {
        // SAFETY: both descriptors are valid; dup2 clears close-on-exec on the target.
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
