use thiserror::Error;
use winrs_core::Fault;

/// Failures below the SOAP layer: sockets, TLS, HTTP status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with an HTTP status this layer does not interpret.
    #[error("unexpected http status {status}")]
    Http { status: u16, body: String },
    /// The exchange exceeded the connection timeout.
    #[error("request timed out")]
    Timeout,
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other failure while sending or reading the HTTP exchange.
    #[error("http request failed: {0}")]
    Request(String),
    /// TLS material or client settings could not be loaded.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
    /// Local file access, e.g. reading certificates.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of one WS-Management operation.
#[derive(Debug, Error)]
pub enum WsmanError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// HTTP 401; carries the server's `WWW-Authenticate` offer if any.
    #[error("server rejected credentials (offered: {challenge:?})")]
    Authentication { challenge: Option<String> },
    /// HTTP 500 with a parsed SOAP fault.
    #[error(transparent)]
    Fault(#[from] Fault),
    /// A reply parsed as XML but lacked what the operation needs.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String, body: String },
    /// A reply or request could not be parsed or rendered.
    #[error("xml error: {0}")]
    Xml(String),
}

impl WsmanError {
    /// The server fault, when this error is one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            WsmanError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>, body: &str) -> Self {
        WsmanError::MalformedResponse {
            reason: reason.into(),
            body: body.to_string(),
        }
    }
}
