//! SMB share access
//!
//! Two backends sit behind the [`Share`] trait:
//!
//! - [`ShareSession`] drives an interactive `smbclient` process over its
//!   stdin/stdout, with side descriptors for credentials and file payloads
//! - [`NativeShareSession`] calls a [`NativeClient`] binding directly; the
//!   `smb-native` feature provides one on top of the `smb` crate
//!
//! [`ServerFacade`] picks a backend once per host and hands out shares.
//!
//! # Example
//!
//! ```no_run
//! use smbshare::protocols::smb::{
//!     AuthStrategy, HostConnection, ServerFacade, Share, System, TimeZoneProvider,
//! };
//!
//! # fn example() -> Result<(), smbshare::protocols::smb::SmbError> {
//! let host = HostConnection::new("fileserver", AuthStrategy::basic("alice", "", "secret"));
//! let system = System::detect();
//! let time_zone = TimeZoneProvider::new(&system);
//! let server = ServerFacade::new(host, system, time_zone, None, false)?;
//!
//! let mut share = server.get_share("projects")?;
//! for entry in share.list("/reports")? {
//!     println!("{} {}", entry.name, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod native;
pub mod notify;
pub mod parser;
pub mod server;
pub mod share;
pub mod stream;
pub mod system;
pub mod transport;
pub mod types;

#[cfg(feature = "smb-native")]
pub mod smb_rs;


pub use auth::{AuthStrategy, KerberosTicket, NativeOptions, Secret};
pub use error::{FailureKind, Result, SmbError};
pub use native::{NativeClient, NativeShareSession};
pub use notify::{NotifyStream, StopHandle};
pub use server::{native_factory, select_backend, Backend, NativeFactory, NativeSupport, ServerFacade};
pub use share::{SessionContext, ShareSession};
pub use stream::{RemoteRead, RemoteWrite};
pub use system::{System, TimeZoneProvider};
pub use types::{
    ChangeCode, ChangeEvent, HostConnection, Mode, ProtocolVersion, RemoteEntry, ShareInfo,
};

#[cfg(feature = "smb-native")]
pub use smb_rs::SmbRsClient;

use std::io::{self, Read, Write};
use std::path::Path;

/// Operations on one share
///
/// Paths are absolute within the share, `/` separated. Every operation
/// validates its path before touching the network.
pub trait Share: Send {
    fn name(&self) -> &str;

    /// Entries of a directory, without `.` and `..`
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    fn stat(&mut self, path: &str) -> Result<RemoteEntry>;

    fn mkdir(&mut self, path: &str) -> Result<()>;

    fn rmdir(&mut self, path: &str) -> Result<()>;

    /// Delete a file; a directory yields [`FailureKind::InvalidType`]
    fn delete(&mut self, path: &str) -> Result<()>;

    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Upload a local file
    fn put(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Download into a local file
    fn get(&mut self, remote: &str, local: &Path) -> Result<()>;

    fn read(&mut self, path: &str) -> Result<RemoteRead>;

    /// Create or truncate `path`; the data is committed by `finish`
    fn write(&mut self, path: &str) -> Result<Box<dyn RemoteWrite>>;

    fn append(&mut self, path: &str) -> Result<Box<dyn RemoteWrite>>;

    /// Replace the settable attribute bits of `path` with those in `mode`
    fn set_attributes(&mut self, path: &str, mode: Mode) -> Result<()>;

    /// Watch `path` for changes
    fn notify(&mut self, path: &str) -> Result<NotifyStream>;

    /// Copy `source` into a new remote file, returning the byte count
    fn upload(&mut self, source: &mut dyn Read, remote: &str) -> Result<u64> {
        let mut sink = self.write(remote)?;
        let copied = io::copy(source, &mut sink).map_err(stream::from_io)?;
        sink.finish()?;
        Ok(copied)
    }

    /// Copy a remote file into `sink`, returning the byte count
    fn download(&mut self, remote: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut source = self.read(remote)?;
        io::copy(&mut source, sink).map_err(stream::from_io)
    }
}
