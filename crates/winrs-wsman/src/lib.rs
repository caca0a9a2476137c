//! WS-Management over HTTP(S): envelope rendering, reply parsing and a typed
//! client for the shell, transfer and enumeration operations WinRM exposes.

mod error;

pub mod client;
pub mod envelope;
pub mod response;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod xml;

pub use client::WsmanClient;
pub use envelope::{Action, Envelope, Selector};
pub use error::{TransportError, WsmanError};
pub use response::{Identity, PullResponse};
pub use transport::{HttpReply, HttpRequest, HttpTransport, TlsConfig, Transport};
pub use xml::Node;
