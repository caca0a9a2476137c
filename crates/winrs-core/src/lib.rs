pub mod config;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod value;

pub use config::{
    ConnectionConfig, Credentials, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, WINRM_CODEPAGE,
};
pub use errors::{Fault, WsmanFaultDetail};
pub use ids::{CommandHandle, CommandId, ShellId};
pub use protocol::{CommandState, OutputChunk, SignalCode, STDERR, STDOUT};
pub use value::Value;
