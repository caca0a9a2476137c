use std::collections::BTreeMap;

use winrs_core::{CommandHandle, OutputChunk, SignalCode};
use winrs_wsman::{Transport, WsmanError};

use crate::{ShellError, shell::Shell};

/// Receive loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    /// Send `Terminate` once the loop ends so the server can free the
    /// command's output cache. Turn off to keep a command alive for more
    /// input; the caller must then signal it.
    pub signal: bool,
    /// Consecutive receive timeouts tolerated before giving up.
    pub timeout_retries: u32,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            signal: true,
            timeout_retries: 50,
        }
    }
}

/// Everything a command printed, joined per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    /// Exit code from the final chunk; a finished command with no reported
    /// code counts as 0.
    pub exit_code: i64,
    pub streams: BTreeMap<String, String>,
    /// Number of chunks received.
    pub chunks: usize,
}

type ChunkFilter<'a> = Box<dyn FnMut(&mut OutputChunk) + Send + 'a>;

/// Single-pass stream of a command's output chunks.
///
/// The loop ends after the chunk reporting `Done`, or after the first error.
/// In both cases the command is sent `Terminate` (when signalling is on)
/// before the final item is handed out. Dropping the stream earlier leaves
/// the signal owed on the session, which sends it before its next request.
pub struct OutputStream<'a, T> {
    shell: &'a mut Shell<T>,
    handle: CommandHandle,
    options: OutputOptions,
    sequence: u64,
    finished: bool,
    filter: Option<ChunkFilter<'a>>,
}

impl<'a, T: Transport> OutputStream<'a, T> {
    pub(crate) fn new(shell: &'a mut Shell<T>, handle: CommandHandle, options: OutputOptions) -> Self {
        Self {
            shell,
            handle,
            options,
            sequence: 0,
            finished: false,
            filter: None,
        }
    }

    /// Rewrites every chunk before it is yielded.
    pub fn with_filter(mut self, filter: impl FnMut(&mut OutputChunk) + Send + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn handle(&self) -> &CommandHandle {
        &self.handle
    }

    /// Whether the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Receives the next chunk, retrying receive timeouts.
    pub async fn next(&mut self) -> Option<Result<OutputChunk, ShellError>> {
        if self.finished {
            return None;
        }

        let mut retried = 0;
        loop {
            match self.shell.receive(&self.handle, self.sequence).await {
                Ok(mut chunk) => {
                    self.sequence += 1;
                    if let Some(filter) = self.filter.as_mut() {
                        filter(&mut chunk);
                    }
                    if chunk.state.is_done() {
                        self.finish().await;
                    }
                    return Some(Ok(chunk));
                }
                Err(WsmanError::Fault(fault)) if fault.is_timed_out() => {
                    retried += 1;
                    if retried >= self.options.timeout_retries {
                        tracing::warn!(command = %self.handle, retried, "receive timed out too often");
                        self.finish().await;
                        return Some(Err(WsmanError::Fault(fault).into()));
                    }
                    tracing::debug!(command = %self.handle, retried, "receive timed out, retrying");
                }
                Err(err) => {
                    self.finish().await;
                    return Some(Err(err.into()));
                }
            }
        }
    }

    /// Drains the stream and joins each stream's text across chunks.
    pub async fn collect(mut self) -> Result<CollectedOutput, ShellError> {
        let mut collected = CollectedOutput::default();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            collected.chunks += 1;
            if let Some(code) = chunk.exit_code {
                collected.exit_code = code;
            }
            for (name, text) in chunk.streams {
                collected.streams.entry(name).or_default().push_str(&text);
            }
        }
        Ok(collected)
    }

    // Not finished until the signal attempt returns; a stream dropped
    // mid-signal still owes the terminate.
    async fn finish(&mut self) {
        if self.options.signal {
            if let Err(err) = self.shell.signal(&self.handle, SignalCode::Terminate).await {
                tracing::warn!(command = %self.handle, error = %err, "failed to terminate command");
            }
        }
        self.finished = true;
    }
}

impl<T> Drop for OutputStream<'_, T> {
    fn drop(&mut self) {
        if !self.finished && self.options.signal {
            self.shell.owe_terminate(self.handle.clone());
        }
    }
}
