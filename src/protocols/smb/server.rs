//! Host-level entry point
//!
//! A [`ServerFacade`] owns the per-host metadata (connection details, time
//! zone), enumerates shares and hands out sessions. The backend is chosen
//! once, when the facade is built, and every share it returns uses it.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use chrono::FixedOffset;

use super::error::{connection_failure, FailureKind, Result, SmbError};
use super::native::{NativeClient, NativeShareSession};
use super::parser::parse_shares;
use super::share::{SessionContext, ShareSession};
use super::system::{System, TimeZoneProvider};
use super::transport::Transport;
use super::types::{HostConnection, ShareInfo};
use super::Share;

/// Which implementation serves the shares of a facade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native,
    Process,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native => f.write_str("native"),
            Backend::Process => f.write_str("smbclient"),
        }
    }
}

type BuildSession = dyn Fn(&SessionContext, &str) -> Result<Box<dyn Share>> + Send + Sync;

/// Builds a native session for a share of the facade's host
#[derive(Clone)]
pub struct NativeFactory {
    build: Arc<BuildSession>,
    complete: bool,
}

impl NativeFactory {
    /// Whether the binding serves every [`Share`] operation
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn support(&self) -> NativeSupport {
        if self.complete {
            NativeSupport::Full
        } else {
            NativeSupport::Partial
        }
    }

    fn session(&self, context: &SessionContext, share: &str) -> Result<Box<dyn Share>> {
        (self.build)(context, share)
    }
}

impl fmt::Debug for NativeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFactory")
            .field("complete", &self.complete)
            .finish()
    }
}

/// How much of the share surface the compiled-in native binding covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeSupport {
    Absent,
    /// Some operations report `ENOTSUP`
    Partial,
    Full,
}

/// Capability probe: a complete native binding wins when preferred, a
/// partial one only when smbclient is missing, otherwise smbclient serves
pub fn select_backend(
    native: NativeSupport,
    prefer_native: bool,
    smbclient_available: bool,
) -> Result<Backend> {
    match (native, smbclient_available) {
        (NativeSupport::Absent, false) => Err(SmbError::NoBackend(
            "no native binding and smbclient was not found".to_string(),
        )),
        (NativeSupport::Absent, true) => Ok(Backend::Process),
        (_, false) => Ok(Backend::Native),
        (NativeSupport::Full, true) if prefer_native => Ok(Backend::Native),
        (_, true) => Ok(Backend::Process),
    }
}

/// Wrap a constructor for a [`NativeClient`] into a [`NativeFactory`]
///
/// Sessions built this way fall back to smbclient for `notify` when the
/// binary is available.
pub fn native_factory<C, F>(make_client: F) -> NativeFactory
where
    C: NativeClient + 'static,
    F: Fn(&HostConnection, &str) -> Result<C> + Send + Sync + 'static,
{
    let build = move |context: &SessionContext, share: &str| {
        let client = make_client(&context.host, share)?;
        let fallback = context.system.has_smbclient().then(|| context.clone());
        let session = NativeShareSession::connect(share, client, context.auth(), fallback)?;
        Ok(Box::new(session) as Box<dyn Share>)
    };
    NativeFactory {
        build: Arc::new(build),
        complete: C::COMPLETE,
    }
}

/// Factory backed by the `smb` crate
#[cfg(feature = "smb-native")]
pub fn smb_rs_factory() -> NativeFactory {
    native_factory(|host: &HostConnection, share: &str| {
        super::smb_rs::SmbRsClient::new(host.host.clone(), share).map_err(SmbError::from)
    })
}

/// One remote host
pub struct ServerFacade {
    context: SessionContext,
    backend: Backend,
    native: Option<NativeFactory>,
}

impl ServerFacade {
    /// Probe for a backend; `native` is the binding to use when preferred
    pub fn new(
        host: HostConnection,
        system: System,
        time_zone: TimeZoneProvider,
        native: Option<NativeFactory>,
        prefer_native: bool,
    ) -> Result<Self> {
        let support = native
            .as_ref()
            .map_or(NativeSupport::Absent, NativeFactory::support);
        let backend = select_backend(support, prefer_native, system.has_smbclient())?;
        if support == NativeSupport::Partial && backend == Backend::Process {
            tracing::debug!("native binding is incomplete, using smbclient");
        }
        tracing::info!(host = %host.host, %backend, "selected smb backend");
        Ok(Self {
            context: SessionContext::new(host, system, time_zone),
            backend,
            native,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn host(&self) -> &HostConnection {
        &self.context.host
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// UTC offset the server reports its times in
    pub fn time_zone(&self) -> FixedOffset {
        self.context.time_zone.get(&self.context.host.host)
    }

    /// Disk shares advertised by the host
    pub fn list_shares(&self) -> Result<Vec<ShareInfo>> {
        if !self.context.system.has_smbclient() {
            return Err(SmbError::Unsupported("listing shares without smbclient"));
        }
        let target = format!("//{}", self.context.host.host);
        let spec = self.context.client_spec(
            &target,
            [OsString::from("-g"), OsString::from("-L"), OsString::from(&target)],
        )?;
        let mut transport = Transport::open(spec)?;
        if let Err(err) = transport.write_auth_credentials(self.context.auth()) {
            tracing::debug!(error = %err, "client closed the auth channel early");
        }
        let output: Vec<String> = transport
            .read_remaining()?
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect();
        transport.close(false);

        let Some(first) = output.first() else {
            return Err(SmbError::failure(FailureKind::ConnectionRefused, target));
        };
        if let Some(err) = connection_failure(first, &target) {
            return Err(err);
        }
        Ok(parse_shares(&output))
    }

    /// Session for one share on the selected backend
    pub fn get_share(&self, name: &str) -> Result<Box<dyn Share>> {
        match (self.backend, &self.native) {
            (Backend::Native, Some(factory)) => factory.session(&self.context, name),
            _ => Ok(Box::new(ShareSession::new(self.context.clone(), name))),
        }
    }
}

impl fmt::Debug for ServerFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerFacade")
            .field("host", &self.context.host.host)
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::smb::auth::AuthStrategy;
    use crate::protocols::smb::auth::NativeOptions;
    use crate::protocols::smb::native::mock::MockClient;
    use crate::protocols::smb::native::{FileHandle, NativeResult, NativeStat, OpenMode};
    use std::path::PathBuf;

    fn offset() -> TimeZoneProvider {
        TimeZoneProvider::fixed(FixedOffset::east_opt(0).unwrap())
    }

    fn with_client() -> System {
        System::default().with_smbclient(Some(PathBuf::from("/usr/bin/smbclient")))
    }

    #[test]
    fn test_select_backend() {
        use NativeSupport::*;
        assert_eq!(select_backend(Full, true, true).unwrap(), Backend::Native);
        assert_eq!(select_backend(Full, false, true).unwrap(), Backend::Process);
        assert_eq!(select_backend(Full, false, false).unwrap(), Backend::Native);
        assert_eq!(select_backend(Absent, true, true).unwrap(), Backend::Process);
        assert!(matches!(
            select_backend(Absent, true, false),
            Err(SmbError::NoBackend(_))
        ));
    }

    #[test]
    fn test_partial_binding_only_without_smbclient() {
        use NativeSupport::*;
        assert_eq!(select_backend(Partial, true, true).unwrap(), Backend::Process);
        assert_eq!(select_backend(Partial, false, true).unwrap(), Backend::Process);
        assert_eq!(select_backend(Partial, true, false).unwrap(), Backend::Native);
    }

    /// Mock that claims to lack part of the surface
    struct PartialClient(MockClient);

    impl NativeClient for PartialClient {
        const COMPLETE: bool = false;

        fn connect(&mut self, options: &NativeOptions) -> NativeResult<()> {
            self.0.connect(options)
        }
        fn read_dir(&mut self, path: &str) -> NativeResult<Vec<String>> {
            self.0.read_dir(path)
        }
        fn stat(&mut self, path: &str) -> NativeResult<NativeStat> {
            self.0.stat(path)
        }
        fn mkdir(&mut self, path: &str) -> NativeResult<()> {
            self.0.mkdir(path)
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
            self.0.open(path, mode)
        }
        fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> NativeResult<usize> {
            self.0.read(handle, buf)
        }
        fn write(&mut self, handle: FileHandle, buf: &[u8]) -> NativeResult<usize> {
            self.0.write(handle, buf)
        }
        fn close(&mut self, handle: FileHandle) -> NativeResult<()> {
            self.0.close(handle)
        }
        fn get_xattr(&mut self, _path: &str, _name: &str) -> NativeResult<String> {
            Err(libc::ENOTSUP)
        }
        fn set_xattr(&mut self, _path: &str, _name: &str, _value: &str) -> NativeResult<()> {
            Err(libc::ENOTSUP)
        }
    }

    #[test]
    fn test_partial_binding_is_not_preferred() {
        let factory = native_factory(|_host: &HostConnection, _share: &str| {
            Ok(PartialClient(MockClient::new()))
        });
        assert!(!factory.is_complete());

        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        let facade =
            ServerFacade::new(host.clone(), with_client(), offset(), Some(factory.clone()), true).unwrap();
        assert_eq!(facade.backend(), Backend::Process);

        let facade = ServerFacade::new(host, System::default(), offset(), Some(factory), true).unwrap();
        assert_eq!(facade.backend(), Backend::Native);
    }

    #[test]
    fn test_process_backend_share() {
        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        let facade = ServerFacade::new(host, with_client(), offset(), None, true).unwrap();
        assert_eq!(facade.backend(), Backend::Process);
        let share = facade.get_share("data").unwrap();
        assert_eq!(share.name(), "data");
    }

    #[test]
    fn test_native_backend_share() {
        let factory = native_factory(|_host: &HostConnection, _share: &str| {
            Ok(MockClient::new().with_file("/hello.txt", b"hi"))
        });
        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        assert!(factory.is_complete());
        let facade = ServerFacade::new(host, System::default(), offset(), Some(factory), true).unwrap();
        assert_eq!(facade.backend(), Backend::Native);

        let mut share = facade.get_share("data").unwrap();
        let entries = share.list("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");
        // native only, so listing shares needs smbclient
        assert!(matches!(facade.list_shares(), Err(SmbError::Unsupported(_))));
        assert!(matches!(share.notify("/"), Err(SmbError::Unsupported(_))));
    }

    #[test]
    fn test_no_backend() {
        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        let err = ServerFacade::new(host, System::default(), offset(), None, true).unwrap_err();
        assert!(matches!(err, SmbError::NoBackend(_)));
    }

    #[test]
    fn test_time_zone() {
        let host = HostConnection::new("server", AuthStrategy::Anonymous);
        let facade = ServerFacade::new(host, with_client(), offset(), None, true).unwrap();
        assert_eq!(facade.time_zone().local_minus_utc(), 0);
    }
}
