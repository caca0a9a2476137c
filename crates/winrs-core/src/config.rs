use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Default port for WinRM over HTTPS.
pub const DEFAULT_HTTPS_PORT: u16 = 5986;
/// Default port for WinRM over plain HTTP.
pub const DEFAULT_HTTP_PORT: u16 = 5985;
/// Windows codepage for UTF-8; output is always requested in this encoding.
pub const WINRM_CODEPAGE: u32 = 65001;

const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SHELL_LIFETIME_SECS: u64 = 600;
const DEFAULT_MAX_ENVELOPE_SIZE: u64 = 3_073_741_824;

/// Where and how to reach a WinRM service.
///
/// Built once and then shared read-only by the client that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host name.
    pub host: String,
    /// Explicit port. `None` picks the scheme default.
    #[serde(default)]
    pub port: Option<u16>,
    /// Use HTTPS.
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
    /// Socket-level timeout for one HTTP exchange, in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Server-side operation timeout embedded in every request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Seconds a created shell lives before the server discards it.
    #[serde(default = "default_shell_lifetime")]
    pub shell_lifetime_secs: u64,
    /// Largest reply envelope the server may send, in bytes.
    #[serde(default = "default_max_envelope_size")]
    pub max_envelope_size: u64,
    /// Locale for reply and fault texts.
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Output codepage requested for created shells.
    #[serde(default = "default_codepage")]
    pub codepage: u32,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            encrypted: default_encrypted(),
            connection_timeout_secs: default_connection_timeout(),
            request_timeout_secs: default_request_timeout(),
            shell_lifetime_secs: default_shell_lifetime(),
            max_envelope_size: default_max_envelope_size(),
            locale: default_locale(),
            codepage: default_codepage(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_shell_lifetime(mut self, lifetime: Duration) -> Self {
        self.shell_lifetime_secs = lifetime.as_secs();
        self
    }

    pub fn with_max_envelope_size(mut self, size: u64) -> Self {
        self.max_envelope_size = size;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_codepage(mut self, codepage: u32) -> Self {
        self.codepage = codepage;
        self
    }

    /// Effective port: the explicit one, or the scheme default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.encrypted {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        })
    }

    pub fn scheme(&self) -> &'static str {
        if self.encrypted { "https" } else { "http" }
    }

    /// Full URL for a path on the service, e.g. `/wsman`.
    pub fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}://{}:{}/{path}", self.scheme(), self.host, self.port())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shell_lifetime(&self) -> Duration {
        Duration::from_secs(self.shell_lifetime_secs)
    }
}

fn default_encrypted() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_shell_lifetime() -> u64 {
    DEFAULT_SHELL_LIFETIME_SECS
}

fn default_max_envelope_size() -> u64 {
    DEFAULT_MAX_ENVELOPE_SIZE
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_codepage() -> u32 {
    WINRM_CODEPAGE
}

/// Basic-auth credentials for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}
