//! Native-binding share session
//!
//! [`NativeShareSession`] offers the same [`Share`] surface as the process
//! backend on top of a [`NativeClient`], a small libsmbclient-shaped
//! binding whose calls fail with errno values. Change notification has no
//! native counterpart and is served by a process-backed session.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::auth::{AuthStrategy, NativeOptions};
use super::error::{errno_error, Result, SmbError};
use super::notify::NotifyStream;
use super::parser::join_path;
use super::share::{verify_path, SessionContext, ShareSession};
use super::stream::{from_io, into_io, RemoteRead, RemoteWrite};
use super::types::{Mode, RemoteEntry};
use super::Share;

/// Extended attribute carrying the DOS mode bits
pub const MODE_XATTR: &str = "system.dos_attr.mode";

/// Raw errno value reported by a binding
pub type Errno = i32;

pub type NativeResult<T> = std::result::Result<T, Errno>;

/// Opaque open-file handle issued by a binding
pub type FileHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate
    Write,
    /// Create if missing, position at the end
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeStat {
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub is_directory: bool,
}

/// Operations a native SMB binding provides; paths are share-relative and
/// `/`-separated
pub trait NativeClient: Send {
    fn connect(&mut self, options: &NativeOptions) -> NativeResult<()>;

    /// Entry names of a directory, `.` and `..` included or not
    fn read_dir(&mut self, path: &str) -> NativeResult<Vec<String>>;

    fn stat(&mut self, path: &str) -> NativeResult<NativeStat>;

    fn mkdir(&mut self, path: &str) -> NativeResult<()>;

    fn rmdir(&mut self, path: &str) -> NativeResult<()>;

    fn unlink(&mut self, path: &str) -> NativeResult<()>;

    fn rename(&mut self, from: &str, to: &str) -> NativeResult<()>;

    fn open(&mut self, path: &str, mode: OpenMode) -> NativeResult<FileHandle>;

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> NativeResult<usize>;

    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> NativeResult<usize>;

    fn close(&mut self, handle: FileHandle) -> NativeResult<()>;

    fn get_xattr(&mut self, path: &str, name: &str) -> NativeResult<String>;

    fn set_xattr(&mut self, path: &str, name: &str, value: &str) -> NativeResult<()>;

    /// Whether every call above is implemented; a binding that answers some
    /// of them with `ENOTSUP` is only chosen when smbclient is missing
    const COMPLETE: bool = true;
}

type SharedClient<C> = Arc<Mutex<C>>;

fn lock<C>(client: &SharedClient<C>) -> Result<MutexGuard<'_, C>> {
    client
        .lock()
        .map_err(|_| SmbError::ConnectionFailed("native client lock poisoned".to_string()))
}

fn call<C, T>(
    client: &SharedClient<C>,
    path: &str,
    op: impl FnOnce(&mut C) -> NativeResult<T>,
) -> Result<T> {
    let mut guard = lock(client)?;
    op(&mut guard).map_err(|errno| errno_error(errno, path))
}

fn normalize(path: &str) -> Result<String> {
    verify_path(path)?;
    Ok(format!("/{}", path.trim_start_matches('/')))
}

/// `0x20` / `20` -> bits
fn parse_mode(value: &str) -> Option<Mode> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16)
        .ok()
        .map(Mode::from_bits_retain)
}

/// One share driven through a native binding
pub struct NativeShareSession<C: NativeClient> {
    name: String,
    client: SharedClient<C>,
    fallback: Option<SessionContext>,
    notify_session: Option<ShareSession>,
}

impl<C: NativeClient + 'static> NativeShareSession<C> {
    /// Apply the auth strategy's options and connect the binding
    pub fn connect(
        name: impl Into<String>,
        mut client: C,
        auth: &AuthStrategy,
        fallback: Option<SessionContext>,
    ) -> Result<Self> {
        let name = name.into();
        let mut options = NativeOptions::default();
        auth.configure_native(&mut options);
        client
            .connect(&options)
            .map_err(|errno| errno_error(errno, &name))?;
        tracing::debug!(share = %name, "native session connected");
        Ok(Self {
            name,
            client: Arc::new(Mutex::new(client)),
            fallback,
            notify_session: None,
        })
    }

    fn entry(&self, path: &str) -> Result<RemoteEntry> {
        let stat = call(&self.client, path, |c| c.stat(path))?;
        let mut mode = match lock(&self.client)?.get_xattr(path, MODE_XATTR) {
            Ok(value) => parse_mode(&value).unwrap_or_default(),
            // no attribute information for this entry
            Err(errno) if errno == libc::ENODATA || errno == libc::ENOTSUP => Mode::empty(),
            Err(errno) => return Err(errno_error(errno, path)),
        };
        if stat.is_directory {
            mode |= Mode::DIRECTORY;
        }
        let name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string();
        Ok(RemoteEntry {
            path: path.to_string(),
            name,
            size: stat.size,
            mtime: stat.mtime,
            mode,
        })
    }

    fn open_writer(&self, path: &str, mode: OpenMode) -> Result<Box<dyn RemoteWrite>> {
        let path = normalize(path)?;
        let handle = call(&self.client, &path, |c| c.open(&path, mode))?;
        Ok(Box::new(NativeWriteStream {
            client: Arc::clone(&self.client),
            handle: Some(handle),
            path,
        }))
    }
}

impl<C: NativeClient + 'static> Share for NativeShareSession<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = normalize(path)?;
        let names = call(&self.client, &path, |c| c.read_dir(&path))?;
        names
            .iter()
            .filter(|name| name.as_str() != "." && name.as_str() != "..")
            .map(|name| self.entry(&join_path(&path, name)))
            .collect()
    }

    fn stat(&mut self, path: &str) -> Result<RemoteEntry> {
        let path = normalize(path)?;
        self.entry(&path)
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        call(&self.client, &path, |c| c.mkdir(&path))
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        call(&self.client, &path, |c| c.rmdir(&path))
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        call(&self.client, &path, |c| c.unlink(&path))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        call(&self.client, &from, |c| c.rename(&from, &to))
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        let mut source = File::open(local).map_err(|_| SmbError::LocalResource {
            path: local.display().to_string(),
        })?;
        self.upload(&mut source, remote).map(|_| ())
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        let mut reader = self.read(remote)?;
        let mut target = File::create(local).map_err(|_| SmbError::LocalResource {
            path: local.display().to_string(),
        })?;
        io::copy(&mut reader, &mut target).map_err(from_io)?;
        Ok(())
    }

    fn read(&mut self, path: &str) -> Result<RemoteRead> {
        let path = normalize(path)?;
        let handle = call(&self.client, &path, |c| c.open(&path, OpenMode::Read))?;
        Ok(Box::new(NativeReadStream {
            client: Arc::clone(&self.client),
            handle: Some(handle),
            path,
        }))
    }

    fn write(&mut self, path: &str) -> Result<Box<dyn RemoteWrite>> {
        self.open_writer(path, OpenMode::Write)
    }

    fn append(&mut self, path: &str) -> Result<Box<dyn RemoteWrite>> {
        self.open_writer(path, OpenMode::Append)
    }

    fn set_attributes(&mut self, path: &str, mode: Mode) -> Result<()> {
        let path = normalize(path)?;
        let value = format!("0x{:x}", mode.bits());
        call(&self.client, &path, |c| c.set_xattr(&path, MODE_XATTR, &value))
    }

    fn notify(&mut self, path: &str) -> Result<NotifyStream> {
        if self.notify_session.is_none() {
            let context = self
                .fallback
                .clone()
                .ok_or(SmbError::Unsupported("notify without smbclient"))?;
            self.notify_session = Some(ShareSession::new(context, self.name.clone()));
        }
        match self.notify_session.as_mut() {
            Some(session) => session.notify(path),
            None => Err(SmbError::Unsupported("notify without smbclient")),
        }
    }
}

/// Remote file read through native handles; the handle is closed at end of
/// stream or on drop
pub struct NativeReadStream<C: NativeClient> {
    client: SharedClient<C>,
    handle: Option<FileHandle>,
    path: String,
}

impl<C: NativeClient> NativeReadStream<C> {
    fn release(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => call(&self.client, &self.path, |c| c.close(handle)),
            None => Ok(()),
        }
    }
}

impl<C: NativeClient> Read for NativeReadStream<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(handle) = self.handle else {
            return Ok(0);
        };
        let read = call(&self.client, &self.path, |c| c.read(handle, buf)).map_err(into_io)?;
        if read == 0 && !buf.is_empty() {
            self.release().map_err(into_io)?;
        }
        Ok(read)
    }
}

impl<C: NativeClient> Drop for NativeReadStream<C> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Remote file written through native handles
pub struct NativeWriteStream<C: NativeClient> {
    client: SharedClient<C>,
    handle: Option<FileHandle>,
    path: String,
}

impl<C: NativeClient> NativeWriteStream<C> {
    fn release(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => call(&self.client, &self.path, |c| c.close(handle)),
            None => Ok(()),
        }
    }
}

impl<C: NativeClient> Write for NativeWriteStream<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let handle = self
            .handle
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream already finished"))?;
        call(&self.client, &self.path, |c| c.write(handle, buf)).map_err(into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: NativeClient> RemoteWrite for NativeWriteStream<C> {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.release()
    }
}

impl<C: NativeClient> Drop for NativeWriteStream<C> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(path = %self.path, error = %err, "closing native write handle failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory binding used by the native backend tests

    use std::collections::{BTreeMap, HashMap};

    use chrono::{DateTime, Utc};

    use super::{Errno, FileHandle, NativeClient, NativeOptions, NativeResult, NativeStat, OpenMode};

    #[derive(Debug, Clone)]
    pub struct Node {
        data: Vec<u8>,
        directory: bool,
        mode: String,
        mtime: DateTime<Utc>,
    }

    #[derive(Debug, Default)]
    pub struct MockClient {
        pub nodes: BTreeMap<String, Node>,
        pub handles: HashMap<FileHandle, (String, usize)>,
        pub next_handle: FileHandle,
        pub options: Option<NativeOptions>,
        pub refuse_connect: Option<Errno>,
        pub xattr_errno: Option<Errno>,
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => path[..i].to_string(),
        }
    }

    impl MockClient {
        pub fn new() -> Self {
            let mut client = Self::default();
            client.nodes.insert(
                "/".to_string(),
                Node {
                    data: Vec::new(),
                    directory: true,
                    mode: "0x10".to_string(),
                    mtime: DateTime::<Utc>::default(),
                },
            );
            client
        }

        pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
            self.nodes.insert(
                path.to_string(),
                Node {
                    data: data.to_vec(),
                    directory: false,
                    mode: "0x20".to_string(),
                    mtime: DateTime::<Utc>::default(),
                },
            );
            self
        }

        pub fn with_dir(mut self, path: &str) -> Self {
            self.nodes.insert(
                path.to_string(),
                Node {
                    data: Vec::new(),
                    directory: true,
                    mode: "0x10".to_string(),
                    mtime: DateTime::<Utc>::default(),
                },
            );
            self
        }

        fn node(&self, path: &str) -> NativeResult<&Node> {
            self.nodes.get(path).ok_or(libc::ENOENT)
        }

        fn open_handle(&self, handle: FileHandle) -> NativeResult<(String, usize)> {
            self.handles.get(&handle).cloned().ok_or(libc::EBADF)
        }
    }

    impl NativeClient for MockClient {
        fn connect(&mut self, options: &NativeOptions) -> NativeResult<()> {
            if let Some(errno) = self.refuse_connect {
                return Err(errno);
            }
            self.options = Some(options.clone());
            Ok(())
        }

        fn read_dir(&mut self, path: &str) -> NativeResult<Vec<String>> {
            if !self.node(path)?.directory {
                return Err(libc::ENOTDIR);
            }
            let mut names = vec![".".to_string(), "..".to_string()];
            names.extend(
                self.nodes
                    .keys()
                    .filter(|key| key.as_str() != "/" && parent(key) == path)
                    .map(|key| key.rsplit('/').next().unwrap_or("").to_string()),
            );
            Ok(names)
        }

        fn stat(&mut self, path: &str) -> NativeResult<NativeStat> {
            let node = self.node(path)?;
            Ok(NativeStat {
                size: node.data.len() as u64,
                mtime: node.mtime,
                is_directory: node.directory,
            })
        }

        fn mkdir(&mut self, path: &str) -> NativeResult<()> {
            if self.nodes.contains_key(path) {
                return Err(libc::EEXIST);
            }
            self.node(&parent(path))?;
            let node = Node {
                data: Vec::new(),
                directory: true,
                mode: "0x10".to_string(),
                mtime: Utc::now(),
            };
            self.nodes.insert(path.to_string(), node);
            Ok(())
        }

        fn rmdir(&mut self, path: &str) -> NativeResult<()> {
            if !self.node(path)?.directory {
                return Err(libc::ENOTDIR);
            }
            if self.nodes.keys().any(|key| key != path && parent(key) == path) {
                return Err(libc::ENOTEMPTY);
            }
            self.nodes.remove(path);
            Ok(())
        }

        fn unlink(&mut self, path: &str) -> NativeResult<()> {
            if self.node(path)?.directory {
                return Err(libc::EISDIR);
            }
            self.nodes.remove(path);
            Ok(())
        }

        fn rename(&mut self, from: &str, to: &str) -> NativeResult<()> {
            let node = self.nodes.remove(from).ok_or(libc::ENOENT)?;
            self.nodes.insert(to.to_string(), node);
            Ok(())
        }

        fn open(&mut self, path: &str, mode: OpenMode) -> NativeResult<FileHandle> {
            let position = match mode {
                OpenMode::Read => {
                    if self.node(path)?.directory {
                        return Err(libc::EISDIR);
                    }
                    0
                }
                OpenMode::Write | OpenMode::Append => {
                    self.node(&parent(path))?;
                    let node = self.nodes.entry(path.to_string()).or_insert_with(|| Node {
                        data: Vec::new(),
                        directory: false,
                        mode: "0x20".to_string(),
                        mtime: Utc::now(),
                    });
                    if mode == OpenMode::Write {
                        node.data.clear();
                    }
                    node.data.len()
                }
            };
            self.next_handle += 1;
            self.handles
                .insert(self.next_handle, (path.to_string(), position));
            Ok(self.next_handle)
        }

        fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> NativeResult<usize> {
            let (path, position) = self.open_handle(handle)?;
            let data = &self.node(&path)?.data;
            let available = data.len().saturating_sub(position);
            let count = available.min(buf.len());
            buf[..count].copy_from_slice(&data[position..position + count]);
            self.handles.insert(handle, (path, position + count));
            Ok(count)
        }

        fn write(&mut self, handle: FileHandle, buf: &[u8]) -> NativeResult<usize> {
            let (path, position) = self.open_handle(handle)?;
            let node = self.nodes.get_mut(&path).ok_or(libc::ENOENT)?;
            if node.data.len() < position + buf.len() {
                node.data.resize(position + buf.len(), 0);
            }
            node.data[position..position + buf.len()].copy_from_slice(buf);
            self.handles.insert(handle, (path, position + buf.len()));
            Ok(buf.len())
        }

        fn close(&mut self, handle: FileHandle) -> NativeResult<()> {
            self.handles.remove(&handle).map(|_| ()).ok_or(libc::EBADF)
        }

        fn get_xattr(&mut self, path: &str, name: &str) -> NativeResult<String> {
            if let Some(errno) = self.xattr_errno {
                return Err(errno);
            }
            if name != super::MODE_XATTR {
                return Err(libc::ENODATA);
            }
            Ok(self.node(path)?.mode.clone())
        }

        fn set_xattr(&mut self, path: &str, name: &str, value: &str) -> NativeResult<()> {
            if name != super::MODE_XATTR {
                return Err(libc::ENOTSUP);
            }
            let node = self.nodes.get_mut(path).ok_or(libc::ENOENT)?;
            node.mode = value.to_string();
            Ok(())
        }
    }
}
