use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the standard output stream.
pub const STDOUT: &str = "stdout";
/// Name of the standard error stream.
pub const STDERR: &str = "stderr";

/// Server-reported progress of a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// More output may follow.
    Running,
    /// All output has been delivered.
    Done,
}

impl CommandState {
    /// Maps the last segment of a `CommandState/@State` URI.
    ///
    /// `Pending` means the command has not produced output yet, which for the
    /// caller is the same as `Running`.
    pub fn from_uri(uri: &str) -> Self {
        match uri.rsplit('/').next().map(str::trim) {
            Some("Done") => Self::Done,
            _ => Self::Running,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One receive reply for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Zero-based receive sequence number this chunk answered.
    pub sequence: u64,
    /// Command state after this reply.
    pub state: CommandState,
    /// Exit code, present once the command has finished.
    pub exit_code: Option<i64>,
    /// Decoded text per stream name.
    pub streams: BTreeMap<String, String>,
}

impl OutputChunk {
    pub fn stream(&self, name: &str) -> Option<&str> {
        self.streams.get(name).map(String::as_str)
    }

    pub fn stdout(&self) -> &str {
        self.stream(STDOUT).unwrap_or_default()
    }

    pub fn stderr(&self) -> &str {
        self.stream(STDERR).unwrap_or_default()
    }
}

/// Signals a client may send to a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalCode {
    /// Output was received; the server may drop it from its cache.
    Terminate,
    /// Abort execution.
    CtrlC,
}

impl SignalCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalCode::Terminate => "Terminate",
            SignalCode::CtrlC => "ctrl_c",
        }
    }
}
