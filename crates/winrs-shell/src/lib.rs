//! Remote shell sessions over WinRM: command execution with streamed output,
//! a PowerShell layer, literal escaping and decoders for PowerShell output.

mod error;

pub mod classify;
pub mod decode;
pub mod escape;
pub mod output;
pub mod powershell;
pub mod shell;

pub use classify::{classify, classify_stderr};
pub use error::{CommandFailure, EncodingError, FailureKind, ShellError};
pub use escape::escape;
pub use output::{CollectedOutput, OutputOptions, OutputStream};
pub use powershell::{PowerShell, PowerShellOptions, XmlObjects};
pub use shell::{Shell, ShellState};
