use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a remote shell created by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellId(
    /// Opaque server-issued shell identifier.
    pub String,
);

/// Identifies a command started inside a remote shell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(
    /// Opaque server-issued command identifier.
    pub String,
);

/// A command together with the shell it runs in.
///
/// A command id is only meaningful within the shell that issued it, so the
/// two always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandHandle {
    /// Shell that owns the command.
    pub shell_id: ShellId,
    /// Command within that shell.
    pub command_id: CommandId,
}

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shell_id, self.command_id)
    }
}
