//! Bulk transfer streams over a dedicated transport
//!
//! A download reads the client's fd 5 until end of stream, an upload writes
//! its fd 4. Each stream owns the transport it was opened on and closes it
//! once the transfer is drained, then checks what the client printed.

use std::fs::File;
use std::io::{self, Read, Write};

use super::error::{Result, SmbError};
use super::parser::check_for_error;
use super::transport::{is_prompt, Transport};

/// Writable remote file
pub trait RemoteWrite: Write + Send {
    /// Flush, close the channel and report whether the server accepted the data
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Readable remote file
pub type RemoteRead = Box<dyn Read + Send>;

/// Wrap an [`SmbError`] so it can travel through `std::io`
pub fn into_io(err: SmbError) -> io::Error {
    match err {
        SmbError::Io(err) => err,
        other => io::Error::other(other),
    }
}

/// Recover an [`SmbError`] that travelled through `std::io`
pub fn from_io(err: io::Error) -> SmbError {
    match err.get_ref().map(|inner| inner.is::<SmbError>()) {
        Some(true) => match err.into_inner().map(|inner| inner.downcast::<SmbError>()) {
            Some(Ok(inner)) => *inner,
            _ => SmbError::ConnectionFailed("lost transfer error".to_string()),
        },
        _ => SmbError::Io(err),
    }
}

/// Drain what the client printed after the transfer and classify it
fn settle(mut transport: Transport, path: &str) -> Result<()> {
    let lines: Vec<String> = transport
        .read_remaining()?
        .into_iter()
        .filter(|line| !line.is_empty() && !is_prompt(line))
        .collect();
    transport.close(false);
    check_for_error(&lines, path)
}

/// Remote file being read through the download descriptor
pub struct DownloadStream {
    transport: Option<Transport>,
    download: File,
    path: String,
}

impl DownloadStream {
    pub(crate) fn new(transport: Transport, download: File, path: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            download,
            path: path.into(),
        }
    }
}

impl Read for DownloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.download.read(buf)?;
        if read == 0 && !buf.is_empty() {
            if let Some(transport) = self.transport.take() {
                settle(transport, &self.path).map_err(into_io)?;
            }
        }
        Ok(read)
    }
}

/// Remote file being written through the upload descriptor
pub struct UploadStream {
    transport: Option<Transport>,
    upload: Option<File>,
    path: String,
}

impl UploadStream {
    pub(crate) fn new(transport: Transport, upload: File, path: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            upload: Some(upload),
            path: path.into(),
        }
    }

    fn complete(&mut self) -> Result<()> {
        // end of stream on fd 4 ends the put
        self.upload.take();
        match self.transport.take() {
            Some(transport) => settle(transport, &self.path),
            None => Ok(()),
        }
    }

    fn channel(&mut self) -> io::Result<&mut File> {
        self.upload
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "upload already finished"))
    }

    /// The client closed fd 4 early, so it has already failed; report the
    /// status it printed instead of the broken pipe
    fn classify(&mut self, err: io::Error) -> io::Error {
        if err.kind() != io::ErrorKind::BrokenPipe || self.transport.is_none() {
            return err;
        }
        match self.complete() {
            Err(status) => into_io(status),
            Ok(()) => err,
        }
    }
}

impl Write for UploadStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.channel()?.write(buf);
        result.map_err(|err| self.classify(err))
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.channel()?.flush();
        result.map_err(|err| self.classify(err))
    }
}

impl RemoteWrite for UploadStream {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.complete()
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        // let an unfinished upload flush instead of killing it
        if let Err(err) = self.complete() {
            tracing::warn!(path = %self.path, error = %err, "upload finished with an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::smb::error::FailureKind;
    use crate::protocols::smb::transport::SpawnSpec;

    fn shell(script: &str) -> Transport {
        Transport::open(SpawnSpec::new("/bin/sh", "//test/share").arg("-c").arg(script)).unwrap()
    }

    #[test]
    fn test_download_reads_then_settles() {
        let mut transport = shell("sleep 0.1; printf 'payload' > /proc/self/fd/5; exec 5>&-; echo 'smb: \\> exit'");
        let download = transport.take_download().unwrap();
        let mut stream = DownloadStream::new(transport, download, "/a.txt");
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "payload");
    }

    #[test]
    fn test_download_surfaces_client_error_at_eof() {
        let mut transport = shell("sleep 0.1; exec 5>&-; echo 'NT_STATUS_OBJECT_NAME_NOT_FOUND opening remote file \\missing'");
        let download = transport.take_download().unwrap();
        let mut stream = DownloadStream::new(transport, download, "/missing");
        let mut out = Vec::new();
        let err = from_io(stream.read_to_end(&mut out).unwrap_err());
        assert_eq!(err.kind(), Some(FailureKind::NotFound));
    }

    #[test]
    fn test_upload_finish() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let script = format!("cat /proc/self/fd/4 > '{}'", target.display());
        let mut transport = shell(&script);
        let upload = transport.take_upload().unwrap();
        let mut stream: Box<dyn RemoteWrite> =
            Box::new(UploadStream::new(transport, upload, "/out.bin"));
        stream.write_all(b"uploaded bytes").unwrap();
        stream.finish().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"uploaded bytes");
    }

    #[test]
    fn test_upload_error_after_finish() {
        let mut transport =
            shell("cat /proc/self/fd/4 > /dev/null; echo 'NT_STATUS_ACCESS_DENIED opening remote file \\ro.txt'");
        let upload = transport.take_upload().unwrap();
        let stream: Box<dyn RemoteWrite> = Box::new(UploadStream::new(transport, upload, "/ro.txt"));
        let err = stream.finish().unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::AccessDenied));
    }

    #[test]
    fn test_upload_rejected_early_reports_status() {
        let mut transport =
            shell("exec 4<&-; echo 'NT_STATUS_OBJECT_PATH_NOT_FOUND opening remote file /nowhere/big.bin'");
        let upload = transport.take_upload().unwrap();
        let mut stream = UploadStream::new(transport, upload, "/nowhere/big.bin");
        let payload = vec![b'x'; 1 << 20];
        let err = from_io(stream.write_all(&payload).unwrap_err());
        assert_eq!(err.kind(), Some(FailureKind::NotFound));
    }

    #[test]
    fn test_io_round_trip_keeps_kind() {
        let err = from_io(into_io(SmbError::failure(FailureKind::FileInUse, "/x")));
        assert_eq!(err.kind(), Some(FailureKind::FileInUse));

        let err = from_io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(err, SmbError::Io(_)));
    }
}
