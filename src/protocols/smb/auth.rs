//! Credential strategies consumed by both backends
//!
//! Each variant contributes extra smbclient arguments, extra environment for
//! the child process, the payload written once to the authentication
//! descriptor, and the option flags handed to a native binding.

use std::fmt;

use zeroize::Zeroize;

/// Secret wrapper for credentials
///
/// Zeroes its memory on drop and never prints its contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(pub String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A Kerberos credential cache the client should use instead of the default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosTicket {
    /// Value for `KRB5CCNAME`, e.g. `FILE:/tmp/krb5cc_1000`
    pub cache_name: String,
}

/// Authentication strategy for a host
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Anonymous access (no credentials)
    Anonymous,

    /// Username/password, optionally scoped to a domain (workgroup)
    Basic {
        username: String,
        domain: Option<String>,
        password: Secret,
    },

    /// Kerberos; without a ticket the ambient credential cache is used
    Kerberos { ticket: Option<KerberosTicket> },
}

/// Option flags a native binding applies before connecting
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NativeOptions {
    pub auto_anonymous_login: bool,
    pub use_kerberos: bool,
    pub fallback_after_kerberos: bool,
    pub workgroup: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub credential_cache: Option<String>,
}

impl fmt::Debug for NativeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeOptions")
            .field("auto_anonymous_login", &self.auto_anonymous_login)
            .field("use_kerberos", &self.use_kerberos)
            .field("fallback_after_kerberos", &self.fallback_after_kerberos)
            .field("workgroup", &self.workgroup)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("credential_cache", &self.credential_cache)
            .finish()
    }
}

impl AuthStrategy {
    pub fn basic(
        username: impl Into<String>,
        domain: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let domain = domain.into();
        AuthStrategy::Basic {
            username: username.into(),
            domain: (!domain.is_empty()).then_some(domain),
            password: Secret(password.into()),
        }
    }

    /// Extra smbclient arguments for this strategy
    pub fn command_line_args(&self) -> Vec<String> {
        match self {
            AuthStrategy::Anonymous => vec!["-N".to_string()],
            AuthStrategy::Basic {
                domain: Some(domain),
                ..
            } => vec!["-W".to_string(), domain.clone()],
            AuthStrategy::Basic { domain: None, .. } => Vec::new(),
            AuthStrategy::Kerberos { .. } => vec!["--use-kerberos=required".to_string()],
        }
    }

    /// Extra environment for the child process
    pub fn environment(&self) -> Vec<(String, String)> {
        match self {
            AuthStrategy::Kerberos {
                ticket: Some(ticket),
            } => vec![("KRB5CCNAME".to_string(), ticket.cache_name.clone())],
            _ => Vec::new(),
        }
    }

    /// Payload for the authentication descriptor: `username=<u>` optionally
    /// followed by a newline and `password=<p>`
    pub fn auth_payload(&self) -> String {
        match self {
            AuthStrategy::Basic {
                username, password, ..
            } => format!("username={}\npassword={}\n", username, password.expose()),
            AuthStrategy::Anonymous | AuthStrategy::Kerberos { .. } => "username=".to_string(),
        }
    }

    /// Native-binding side effect: set the option flags for this strategy
    pub fn configure_native(&self, options: &mut NativeOptions) {
        match self {
            AuthStrategy::Anonymous => {
                options.auto_anonymous_login = true;
                options.use_kerberos = false;
            }
            AuthStrategy::Basic {
                username,
                domain,
                password,
            } => {
                options.auto_anonymous_login = false;
                options.use_kerberos = false;
                options.workgroup = domain.clone();
                options.username = Some(username.clone());
                options.password = Some(password.clone());
            }
            AuthStrategy::Kerberos { ticket } => {
                options.auto_anonymous_login = false;
                options.use_kerberos = true;
                options.fallback_after_kerberos = false;
                options.credential_cache = ticket.as_ref().map(|t| t.cache_name.clone());
            }
        }
    }

    /// Username for diagnostics, never the password
    pub fn username(&self) -> Option<&str> {
        match self {
            AuthStrategy::Basic { username, .. } => Some(username),
            _ => None,
        }
    }
}
