use std::collections::BTreeMap;

use winrs_core::{CommandHandle, OutputChunk, ShellId, SignalCode};
use winrs_wsman::{
    Identity, Transport, WsmanClient, WsmanError,
    envelope::NS_SHELL,
};

use crate::{
    CommandFailure, FailureKind, ShellError,
    output::{OutputOptions, OutputStream},
};

const SHELL_ENUMERATION: &str = "windows/shell";

/// Lifecycle of a [`Shell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// No shell created yet, or the last create failed.
    Unconnected,
    Active,
    /// The shell was deleted.
    Closed,
}

/// One remote shell and the commands run in it.
///
/// Owns the client exclusively; each operation borrows the session mutably,
/// so requests never overlap.
pub struct Shell<T> {
    client: WsmanClient<T>,
    state: ShellState,
    shell_id: Option<ShellId>,
    /// Bumped on every successful create.
    generation: u64,
    /// Commands whose output stream was dropped before it ended.
    owed_terminate: Vec<CommandHandle>,
}

impl<T> Shell<T> {
    pub fn new(client: WsmanClient<T>) -> Self {
        Self {
            client,
            state: ShellState::Unconnected,
            shell_id: None,
            generation: 0,
            owed_terminate: Vec::new(),
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn shell_id(&self) -> Option<&ShellId> {
        self.shell_id.as_ref()
    }

    /// Changes whenever a new shell replaces the previous one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn client(&self) -> &WsmanClient<T> {
        &self.client
    }

    pub(crate) fn owe_terminate(&mut self, handle: CommandHandle) {
        tracing::debug!(command = %handle, "output abandoned, terminate deferred");
        self.owed_terminate.push(handle);
    }
}

impl<T: Transport> Shell<T> {
    /// Creates a new shell and makes it current.
    pub async fn connect(&mut self) -> Result<ShellId, ShellError> {
        self.flush_terminates().await;
        let shell_id = self.client.create().await?;
        self.shell_id = Some(shell_id.clone());
        self.state = ShellState::Active;
        self.generation += 1;
        Ok(shell_id)
    }

    /// Starts a command in the current shell, optionally feeding it stdin.
    ///
    /// A shell that hit the per-user operation quota or has expired on the
    /// server is replaced once and the command retried in the new one.
    pub async fn execute(
        &mut self,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandHandle, ShellError> {
        self.flush_terminates().await;
        let shell_id = self.shell_id.clone().ok_or(ShellError::NotConnected)?;

        let handle = match self.client.command(&shell_id, args).await {
            Ok(command_id) => CommandHandle {
                shell_id,
                command_id,
            },
            Err(WsmanError::Fault(fault))
                if fault.is_quota_exceeded() || fault.is_invalid_selectors() =>
            {
                tracing::debug!(
                    shell_id = %shell_id,
                    reason = fault.reason().unwrap_or_default(),
                    "replacing shell after server fault"
                );
                if let Err(err) = self.client.delete(&shell_id).await {
                    tracing::debug!(shell_id = %shell_id, error = %err, "could not delete old shell");
                }
                self.shell_id = None;
                self.state = ShellState::Unconnected;

                let shell_id = self.connect().await?;
                let command_id = self.client.command(&shell_id, args).await?;
                CommandHandle {
                    shell_id,
                    command_id,
                }
            }
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(command = %handle, "command started");
        if let Some(data) = stdin {
            self.client.send(&handle, data).await?;
        }
        Ok(handle)
    }

    /// Sends more input to a running command.
    pub async fn send(&mut self, handle: &CommandHandle, data: &str) -> Result<(), ShellError> {
        self.flush_terminates().await;
        self.client.send(handle, data).await?;
        Ok(())
    }

    pub async fn signal(
        &mut self,
        handle: &CommandHandle,
        code: SignalCode,
    ) -> Result<(), ShellError> {
        self.flush_terminates().await;
        self.client.signal(handle, code).await?;
        Ok(())
    }

    pub(crate) async fn receive(
        &mut self,
        handle: &CommandHandle,
        sequence: u64,
    ) -> Result<OutputChunk, WsmanError> {
        self.flush_terminates().await;
        self.client.receive(handle, sequence).await
    }

    /// Streams a command's output. See [`OutputStream`].
    pub fn get_output(&mut self, handle: CommandHandle, options: OutputOptions) -> OutputStream<'_, T> {
        OutputStream::new(self, handle, options)
    }

    /// Collects all output of a command, failing on a non-zero exit code.
    pub async fn get_data(
        &mut self,
        handle: CommandHandle,
        options: OutputOptions,
    ) -> Result<BTreeMap<String, String>, ShellError> {
        let collected = self.get_output(handle, options).collect().await?;
        if collected.exit_code != 0 {
            return Err(CommandFailure::new(
                FailureKind::ExitCode,
                collected.exit_code,
                collected.streams,
            )
            .into());
        }
        Ok(collected.streams)
    }

    /// Starts a command and waits for all of its output.
    pub async fn run(
        &mut self,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<BTreeMap<String, String>, ShellError> {
        let handle = self.execute(args, stdin).await?;
        self.get_data(handle, OutputOptions::default()).await
    }

    /// Deletes a shell: the given one, or the current one.
    ///
    /// With nothing to close this does nothing, so closing twice is fine.
    pub async fn close(&mut self, shell_id: Option<&ShellId>) -> Result<(), ShellError> {
        self.flush_terminates().await;
        let Some(target) = shell_id.or(self.shell_id.as_ref()).cloned() else {
            return Ok(());
        };

        self.client.delete(&target).await?;
        if self.shell_id.as_ref() == Some(&target) {
            self.shell_id = None;
            self.state = ShellState::Closed;
        }
        Ok(())
    }

    /// The service configuration as nested JSON.
    pub async fn server_config(&mut self) -> Result<serde_json::Value, ShellError> {
        self.flush_terminates().await;
        Ok(self.client.server_config().await?)
    }

    pub async fn identify(&mut self) -> Result<Identity, ShellError> {
        Ok(self.client.identify().await?)
    }

    /// Ids of every shell the user has open on the server.
    pub async fn list_shells(&mut self) -> Result<Vec<ShellId>, ShellError> {
        self.flush_terminates().await;
        let mut context = self.client.enumerate(SHELL_ENUMERATION, None).await?;
        let mut shells = Vec::new();

        loop {
            let page = self.client.pull(SHELL_ENUMERATION, &context).await?;
            shells.extend(
                page.items
                    .iter()
                    .filter_map(|item| item.find(NS_SHELL, "ShellId"))
                    .map(|node| ShellId(node.text.trim().to_string())),
            );
            match page.context {
                Some(next) if !page.end_of_sequence => context = next,
                _ => break,
            }
        }

        Ok(shells)
    }

    async fn flush_terminates(&mut self) {
        for handle in std::mem::take(&mut self.owed_terminate) {
            if let Err(err) = self.client.signal(&handle, SignalCode::Terminate).await {
                tracing::debug!(command = %handle, error = %err, "deferred terminate failed");
            }
        }
    }
}
