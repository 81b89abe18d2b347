//! [`NativeClient`] on top of the pure-Rust `smb` crate
//!
//! The crate is async; every call is driven to completion on a private
//! current-thread runtime so the binding keeps the blocking shape the
//! sessions expect. Operations the crate does not expose report `ENOTSUP`,
//! so the binding declares itself incomplete.

use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use smb::{Client, ClientConfig, FileAccessMask, FileCreateArgs, Resource, UncPath};
use tokio::runtime::{Builder, Runtime};

use super::auth::NativeOptions;
use super::native::{Errno, FileHandle, NativeClient, NativeResult, NativeStat, OpenMode};

struct OpenFile {
    resource: Resource,
    offset: u64,
}

pub struct SmbRsClient {
    runtime: Runtime,
    client: Client,
    host: String,
    share: String,
    files: HashMap<FileHandle, OpenFile>,
    next_handle: FileHandle,
}

/// Best-effort errno for an error of the `smb` crate
fn errno_of(err: impl Debug) -> Errno {
    let text = format!("{err:?}");
    tracing::debug!(error = %text, "smb call failed");
    let table: [(&str, Errno); 6] = [
        ("NotFound", libc::ENOENT),
        ("AccessDenied", libc::EACCES),
        ("LogonFailure", libc::EACCES),
        ("Collision", libc::EEXIST),
        ("SharingViolation", libc::EBUSY),
        ("NotEmpty", libc::ENOTEMPTY),
    ];
    table
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map_or(libc::EIO, |(_, errno)| *errno)
}

impl SmbRsClient {
    pub fn new(host: impl Into<String>, share: impl Into<String>) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            client: Client::new(ClientConfig::default()),
            host: host.into(),
            share: share.into(),
            files: HashMap::new(),
            next_handle: 0,
        })
    }

    fn unc(&self, path: &str) -> NativeResult<UncPath> {
        let relative = path.trim_start_matches('/').replace('/', "\\");
        let full = if relative.is_empty() {
            format!(r"\\{}\{}", self.host, self.share)
        } else {
            format!(r"\\{}\{}\{}", self.host, self.share, relative)
        };
        UncPath::from_str(&full).map_err(|_| libc::EINVAL)
    }

    fn create(&mut self, path: &str, args: FileCreateArgs) -> NativeResult<Resource> {
        let unc = self.unc(path)?;
        self.runtime
            .block_on(self.client.create_file(&unc, &args))
            .map_err(errno_of)
    }

    fn release(&self, resource: Resource) {
        self.runtime.block_on(async {
            match resource {
                Resource::File(f) => f.close().await.ok(),
                Resource::Directory(d) => d.close().await.ok(),
                Resource::Pipe(p) => p.close().await.ok(),
            }
        });
    }

    fn register(&mut self, resource: Resource, offset: u64) -> FileHandle {
        self.next_handle += 1;
        self.files
            .insert(self.next_handle, OpenFile { resource, offset });
        self.next_handle
    }
}

impl NativeClient for SmbRsClient {
    const COMPLETE: bool = false;

    fn connect(&mut self, options: &NativeOptions) -> NativeResult<()> {
        if options.use_kerberos {
            return Err(libc::ENOTSUP);
        }
        let unc = self.unc("/")?;
        let username = options.username.clone().unwrap_or_default();
        let password = options
            .password
            .as_ref()
            .map(|secret| secret.expose().to_string())
            .unwrap_or_default();
        self.runtime
            .block_on(self.client.share_connect(&unc, &username, password))
            .map_err(errno_of)
    }

    fn read_dir(&mut self, path: &str) -> NativeResult<Vec<String>> {
        let resource = self.create(
            path,
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
        )?;
        let Resource::Directory(dir) = resource else {
            self.release(resource);
            return Err(libc::ENOTDIR);
        };
        let entries = self.runtime.block_on(dir.list()).map_err(errno_of);
        self.release(Resource::Directory(dir));
        Ok(entries?.into_iter().map(|entry| entry.file_name.to_string()).collect())
    }

    fn stat(&mut self, path: &str) -> NativeResult<NativeStat> {
        let resource = self.create(
            path,
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
        )?;
        let (is_directory, size) = match &resource {
            Resource::File(f) => (false, self.runtime.block_on(f.get_len()).unwrap_or(0)),
            Resource::Directory(_) => (true, 0),
            Resource::Pipe(_) => (false, 0),
        };
        self.release(resource);
        Ok(NativeStat {
            size,
            // write times are not exposed by the crate
            mtime: DateTime::<Utc>::default(),
            is_directory,
        })
    }

    fn mkdir(&mut self, path: &str) -> NativeResult<()> {
        let resource = self.create(path, FileCreateArgs::make_create_directory())?;
        self.release(resource);
        Ok(())
    }

    fn rmdir(&mut self, _path: &str) -> NativeResult<()> {
        Err(libc::ENOTSUP)
    }

    fn unlink(&mut self, _path: &str) -> NativeResult<()> {
        Err(libc::ENOTSUP)
    }

    fn rename(&mut self, _from: &str, _to: &str) -> NativeResult<()> {
        Err(libc::ENOTSUP)
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> NativeResult<FileHandle> {
        let args = match mode {
            OpenMode::Read => {
                FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true))
            }
            OpenMode::Write => {
                FileCreateArgs::make_create_always(FileAccessMask::new().with_generic_write(true))
            }
            OpenMode::Append => FileCreateArgs::make_open_existing(
                FileAccessMask::new().with_generic_write(true).with_generic_read(true),
            ),
        };
        let resource = self.create(path, args)?;
        let offset = match (&resource, mode) {
            (Resource::File(f), OpenMode::Append) => {
                self.runtime.block_on(f.get_len()).map_err(errno_of)?
            }
            (Resource::File(_), _) => 0,
            _ => {
                self.release(resource);
                return Err(libc::EISDIR);
            }
        };
        Ok(self.register(resource, offset))
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> NativeResult<usize> {
        let open = self.files.get_mut(&handle).ok_or(libc::EBADF)?;
        let Resource::File(file) = &open.resource else {
            return Err(libc::EBADF);
        };
        let read = self
            .runtime
            .block_on(file.read_at(buf, open.offset))
            .map_err(errno_of)?;
        open.offset += read as u64;
        Ok(read)
    }

    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> NativeResult<usize> {
        let open = self.files.get_mut(&handle).ok_or(libc::EBADF)?;
        let Resource::File(file) = &open.resource else {
            return Err(libc::EBADF);
        };
        let written = self
            .runtime
            .block_on(file.write_at(buf, open.offset))
            .map_err(errno_of)?;
        open.offset += written as u64;
        Ok(written)
    }

    fn close(&mut self, handle: FileHandle) -> NativeResult<()> {
        let open = self.files.remove(&handle).ok_or(libc::EBADF)?;
        self.release(open.resource);
        Ok(())
    }

    fn get_xattr(&mut self, _path: &str, _name: &str) -> NativeResult<String> {
        Err(libc::ENOTSUP)
    }

    fn set_xattr(&mut self, _path: &str, _name: &str, _value: &str) -> NativeResult<()> {
        Err(libc::ENOTSUP)
    }
}
