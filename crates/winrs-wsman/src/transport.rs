use std::{fs, path::PathBuf};

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, header};
use winrs_core::ConnectionConfig;

use crate::TransportError;

const CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
const USER_AGENT: &str = concat!("winrs/", env!("CARGO_PKG_VERSION"));

/// One POST to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Path below the service root, e.g. `wsman`.
    pub path: String,
    pub body: String,
    /// Extra headers beyond the content type.
    pub headers: Vec<(String, String)>,
}

/// What came back, before any SOAP interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
    /// `WWW-Authenticate` value on a 401.
    pub www_authenticate: Option<String>,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            www_authenticate: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Carries one HTTP exchange at a time.
///
/// The client never issues a second request before the first has answered,
/// so implementations do not need to multiplex.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, request: HttpRequest) -> Result<HttpReply, TransportError>;
}

/// TLS material for HTTPS connections. All files are PEM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Trust anchor for the server certificate.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate for mutual TLS; needs `client_key`.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    /// Check that the certificate names the host. Only meaningful with a CA.
    pub verify_hostname: bool,
}

/// HTTP(S) transport backed by `reqwest`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ConnectionConfig, tls: &TlsConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(config.connection_timeout())
            .user_agent(USER_AGENT);

        if config.encrypted {
            builder = match &tls.ca_cert {
                Some(path) => {
                    let pem = fs::read(path)?;
                    let cert = Certificate::from_pem(&pem).map_err(|err| {
                        TransportError::InvalidConfig(format!(
                            "invalid CA certificate {}: {err}",
                            path.display()
                        ))
                    })?;
                    builder
                        .add_root_certificate(cert)
                        .danger_accept_invalid_hostnames(!tls.verify_hostname)
                }
                None => {
                    tracing::warn!(
                        host = %config.host,
                        "no CA certificate configured, server certificate will not be verified"
                    );
                    builder.danger_accept_invalid_certs(true)
                }
            };

            match (&tls.client_cert, &tls.client_key) {
                (Some(cert), Some(key)) => {
                    let mut pem = fs::read(cert)?;
                    pem.push(b'\n');
                    pem.extend(fs::read(key)?);
                    let identity = Identity::from_pem(&pem).map_err(|err| {
                        TransportError::InvalidConfig(format!("invalid client certificate: {err}"))
                    })?;
                    builder = builder.identity(identity);
                }
                (None, None) => {}
                _ => {
                    return Err(TransportError::InvalidConfig(
                        "client certificate and key must be given together".to_string(),
                    ));
                }
            }
        } else {
            tracing::warn!(host = %config.host, "using unencrypted http transport");
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::InvalidConfig(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url(""),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        let url = format!("{}{}", self.base_url, request.path.trim_start_matches('/'));

        let mut builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(header::ACCEPT, "*/*")
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(request_error)?;
        let status = response.status().as_u16();
        let www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(request_error)?;

        tracing::trace!(url = %url, status, bytes = body.len(), "http exchange complete");
        Ok(HttpReply {
            status,
            body,
            www_authenticate,
        })
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
