/*!
 * smbshare - SMB share client
 *
 * File operations on SMB/CIFS shares through one API:
 * - An smbclient-driven backend speaking the interactive client's line protocol
 *   over pipes, with credentials and file payloads on side descriptors
 * - A native backend over an errno-style binding (pure-Rust SMB2/3 behind the
 *   `smb-native` feature)
 * - Listing, stat, mkdir/rmdir, delete, rename, attribute changes
 * - Streaming reads and writes, share enumeration and change notification
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod protocols;

// Re-export commonly used types
pub use config::{ClientConfig, LogLevel};
pub use error::{Error, Result};
pub use protocols::smb::{
    AuthStrategy, Backend, ChangeCode, ChangeEvent, FailureKind, HostConnection, Mode,
    RemoteEntry, ServerFacade, Share, ShareInfo, SmbError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
