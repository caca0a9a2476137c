use std::{collections::BTreeMap, fmt};

use thiserror::Error;
use winrs_wsman::WsmanError;

/// Failures of session, executor and PowerShell operations.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Wsman(#[from] WsmanError),
    /// An operation needed a shell but none is open.
    #[error("no shell is open")]
    NotConnected,
    /// The command ran to completion with a non-zero exit code.
    #[error(transparent)]
    CommandFailed(#[from] CommandFailure),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl ShellError {
    /// The server fault behind this error, if any.
    pub fn fault(&self) -> Option<&winrs_core::Fault> {
        match self {
            ShellError::Wsman(err) => err.fault(),
            _ => None,
        }
    }

    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            ShellError::CommandFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Values that cannot be escaped and output that cannot be decoded.
///
/// Decode variants keep the raw text they were given.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("value cannot be rendered as a shell literal: {0}")]
    UnsupportedValue(String),
    #[error("invalid json output: {source}")]
    Json {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid csv output: {reason}")]
    Csv { raw: String, reason: String },
    #[error("invalid xml output: {reason}")]
    Xml { raw: String, reason: String },
}

impl EncodingError {
    /// The undecodable text, for decode failures.
    pub fn raw(&self) -> Option<&str> {
        match self {
            EncodingError::UnsupportedValue(_) => None,
            EncodingError::Json { raw, .. }
            | EncodingError::Csv { raw, .. }
            | EncodingError::Xml { raw, .. } => Some(raw),
        }
    }
}

/// What a failed command's stderr says went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-zero exit with nothing on stderr to classify.
    ExitCode,
    AccessDenied,
    SizeLimitExceeded,
    /// The target object or its container does not exist.
    ObjectNotFound,
    ObjectAlreadyExists,
    AttributeSetFailed,
    CommandTooLong,
    /// Any other PowerShell error.
    PowerShell,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ExitCode => "exit code",
            FailureKind::AccessDenied => "access denied",
            FailureKind::SizeLimitExceeded => "size limit exceeded",
            FailureKind::ObjectNotFound => "object not found",
            FailureKind::ObjectAlreadyExists => "object already exists",
            FailureKind::AttributeSetFailed => "attribute set failed",
            FailureKind::CommandTooLong => "command too long",
            FailureKind::PowerShell => "powershell error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command that exited non-zero, with everything it printed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {}", self.summary())]
pub struct CommandFailure {
    pub kind: FailureKind,
    pub exit_code: i64,
    pub stderr: String,
    /// Full output per stream, stderr included.
    pub output: BTreeMap<String, String>,
}

impl CommandFailure {
    pub fn new(kind: FailureKind, exit_code: i64, output: BTreeMap<String, String>) -> Self {
        let stderr = output.get(winrs_core::STDERR).cloned().unwrap_or_default();
        Self {
            kind,
            exit_code,
            stderr,
            output,
        }
    }
}
