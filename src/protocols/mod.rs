//! Protocol implementations for smbshare

pub mod smb;
