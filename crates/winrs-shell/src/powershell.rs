//! PowerShell on top of a plain [`Shell`].
//!
//! Scripts run through `powershell.exe -Command`, with an optional setup
//! script in front (credentials, module imports). Output is filtered for
//! known console noise and secrets before callers see it, and failures are
//! classified from stderr.

use std::{collections::BTreeMap, sync::LazyLock};

use regex_lite::Regex;
use serde::Deserialize;
use winrs_core::{CommandHandle, OutputChunk, STDERR, STDOUT, ShellId, Value};
use winrs_wsman::Transport;

use crate::{
    CommandFailure, EncodingError, ShellError,
    classify::classify,
    decode::{
        CsvOptions, ObjectReader, OtherOutput, Row, XmlFragments, decode_csv, decode_json,
        object_to_map, push_other,
    },
    escape::escape,
    output::{CollectedOutput, OutputOptions, OutputStream},
    shell::Shell,
};

/// 32-bit PowerShell, which has the Active Directory module available.
pub const DEFAULT_EXEC_PATH: &str = r"%SystemRoot%\syswow64\WindowsPowerShell\v1.0\powershell.exe";

/// Printed on every start when the session user cannot reach AD Web Services
/// before the real credentials are set up.
pub const AD_DRIVE_WARNING: &str = "WARNING: Error initializing default drive: 'Unable to contact the server. This \nmay be because this server does not exist, it is currently down, or it does not\n have the Active Directory Web Services running.'.\n";

const REDACTED: &str = "PASSWORD HIDDEN";

static SECURE_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)ConvertTo-SecureString.*?\.\.\.").expect("valid regex"));

/// How scripts are launched and their output cleaned.
#[derive(Debug, Clone)]
pub struct PowerShellOptions {
    pub exec_path: String,
    /// Script run before every command, in the same invocation.
    pub setup_script: Option<String>,
    /// Removed from the first stdout chunk of every command.
    pub noise_preamble: Option<String>,
    /// Matches in stderr are replaced with `PASSWORD HIDDEN`.
    pub redactions: Vec<Regex>,
    /// Add `-Credential $cred` to generated cmdlet calls.
    pub credential: bool,
}

impl Default for PowerShellOptions {
    fn default() -> Self {
        Self {
            exec_path: DEFAULT_EXEC_PATH.to_string(),
            setup_script: None,
            noise_preamble: Some(AD_DRIVE_WARNING.to_string()),
            redactions: vec![SECURE_STRING.clone()],
            credential: false,
        }
    }
}

impl PowerShellOptions {
    /// Setup that builds `$cred` from the given account and imports the
    /// Active Directory module.
    pub fn with_ad_credential(mut self, username: &str, secret: &str) -> Result<Self, EncodingError> {
        self.setup_script = Some(format!(
            "$pass = ConvertTo-SecureString -Force -AsPlainText {};\n\
             $cred = New-Object System.Management.Automation.PSCredential({}, $pass);\n\
             Import-Module ActiveDirectory;",
            escape(&Value::from(secret))?,
            escape(&Value::from(username))?,
        ));
        self.credential = true;
        Ok(self)
    }
}

#[derive(Deserialize)]
struct Named {
    #[serde(rename = "Name")]
    name: String,
}

/// A [`Shell`] that runs PowerShell scripts.
pub struct PowerShell<T> {
    shell: Shell<T>,
    options: PowerShellOptions,
    /// Cached server name with the shell generation it was resolved in.
    server: Option<(u64, String)>,
}

impl<T> PowerShell<T> {
    pub fn new(shell: Shell<T>, options: PowerShellOptions) -> Self {
        Self {
            shell,
            options,
            server: None,
        }
    }

    pub fn shell(&self) -> &Shell<T> {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut Shell<T> {
        &mut self.shell
    }

    pub fn into_inner(self) -> Shell<T> {
        self.shell
    }

    pub fn options(&self) -> &PowerShellOptions {
        &self.options
    }

    /// The full `-Command` text: setup plus script parts, on one line.
    pub fn script(&self, parts: &[&str]) -> String {
        self.options
            .setup_script
            .as_deref()
            .into_iter()
            .chain(parts.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
            .replace('\n', " ")
    }

    /// Builds `<cmdlet> -Name <value> ... -Flag`.
    ///
    /// Values are escaped; parameters whose escaped value is empty are left
    /// out. Flags are appended verbatim, so they may carry their own value
    /// (`Confirm:$false`).
    pub fn command_line(
        &self,
        cmdlet: &str,
        params: &[(&str, Value)],
        flags: &[&str],
    ) -> Result<String, EncodingError> {
        let mut line = cmdlet.to_string();
        if self.options.credential {
            line.push_str(" -Credential $cred");
        }
        for (name, value) in params {
            let escaped = escape(value)?;
            if escaped.is_empty() {
                tracing::debug!(parameter = name, "omitting empty parameter");
                continue;
            }
            line.push_str(&format!(" -{name} {escaped}"));
        }
        for flag in flags {
            line.push_str(&format!(" -{flag}"));
        }
        Ok(line)
    }

    /// Pins the cached server, skipping the lookup.
    pub fn set_server(&mut self, name: impl Into<String>) {
        self.server = Some((self.shell.generation(), name.into()));
    }

    /// Forgets the cached server.
    pub fn reset_server(&mut self) {
        self.server = None;
    }

    fn chunk_filter(&self) -> Box<dyn FnMut(&mut OutputChunk) + Send> {
        let noise = self.options.noise_preamble.clone();
        let redactions = self.options.redactions.clone();
        let mut first = true;
        Box::new(move |chunk: &mut OutputChunk| {
            if first {
                first = false;
                if let (Some(noise), Some(stdout)) = (noise.as_deref(), chunk.streams.get_mut(STDOUT)) {
                    *stdout = stdout.replace(noise, "");
                }
            }
            if let Some(stderr) = chunk.streams.get_mut(STDERR) {
                for pattern in &redactions {
                    *stderr = pattern.replace_all(stderr, REDACTED).into_owned();
                }
            }
        })
    }
}

impl<T: Transport> PowerShell<T> {
    pub async fn connect(&mut self) -> Result<ShellId, ShellError> {
        self.shell.connect().await
    }

    pub async fn close(&mut self) -> Result<(), ShellError> {
        self.shell.close(None).await
    }

    /// Starts a script.
    pub async fn execute(&mut self, parts: &[&str]) -> Result<CommandHandle, ShellError> {
        let script = self.script(parts);
        tracing::debug!(script = %parts.join(" ").replace('\n', " "), "executing powershell");
        let args = [
            self.options.exec_path.clone(),
            format!("-NonInteractive -NoLogo -NoProfile -Command \"{script}\""),
        ];
        self.shell.execute(&args, None).await
    }

    /// Streams output with noise removed and secrets redacted.
    pub fn get_output(&mut self, handle: CommandHandle, options: OutputOptions) -> OutputStream<'_, T> {
        let filter = self.chunk_filter();
        self.shell.get_output(handle, options).with_filter(filter)
    }

    /// Collects all output; a non-zero exit becomes a classified failure.
    pub async fn get_data(
        &mut self,
        handle: CommandHandle,
        options: OutputOptions,
    ) -> Result<BTreeMap<String, String>, ShellError> {
        let CollectedOutput {
            exit_code, streams, ..
        } = self.get_output(handle, options).collect().await?;
        if exit_code != 0 {
            let failure: CommandFailure = classify(exit_code, streams);
            tracing::debug!(kind = %failure.kind, exit_code, "powershell command failed");
            return Err(failure.into());
        }
        Ok(streams)
    }

    pub async fn run(&mut self, parts: &[&str]) -> Result<BTreeMap<String, String>, ShellError> {
        let handle = self.execute(parts).await?;
        self.get_data(handle, OutputOptions::default()).await
    }

    /// Collects a `ConvertTo-Json` result.
    pub async fn get_output_json(
        &mut self,
        handle: CommandHandle,
        other: &mut OtherOutput,
    ) -> Result<serde_json::Value, ShellError> {
        let stdout = self.data_with_other(handle, other).await?;
        Ok(decode_json(&stdout)?)
    }

    /// Collects a `ConvertTo-Csv` result.
    pub async fn get_output_csv(
        &mut self,
        handle: CommandHandle,
        other: &mut OtherOutput,
        options: &CsvOptions,
    ) -> Result<Vec<BTreeMap<String, String>>, ShellError> {
        let stdout = self.data_with_other(handle, other).await?;
        Ok(decode_csv(&stdout, other, options)?)
    }

    /// Streams the objects of a `ConvertTo-Xml -As String` result.
    pub fn xml_objects(&mut self, handle: CommandHandle) -> XmlObjects<'_, T> {
        XmlObjects {
            output: self.get_output(handle, OutputOptions::default()),
            fragments: XmlFragments::new(),
            reader: ObjectReader::new(),
            other: OtherOutput::new(),
        }
    }

    /// Runs `query`, a JSON-producing script, once per shell and caches the
    /// `Name` field of its result, e.g. the preferred domain controller.
    pub async fn cached_server(&mut self, query: &str) -> Result<String, ShellError> {
        let generation = self.shell.generation();
        if let Some((cached_at, name)) = &self.server {
            if *cached_at == generation {
                return Ok(name.clone());
            }
        }

        let handle = self.execute(&[query]).await?;
        let mut other = OtherOutput::new();
        let value = self.get_output_json(handle, &mut other).await?;
        let Named { name } =
            serde_json::from_value(value.clone()).map_err(|source| EncodingError::Json {
                raw: value.to_string(),
                source,
            })?;

        tracing::debug!(server = %name, "preferred server chosen");
        self.server = Some((self.shell.generation(), name.clone()));
        Ok(name)
    }

    async fn data_with_other(
        &mut self,
        handle: CommandHandle,
        other: &mut OtherOutput,
    ) -> Result<String, ShellError> {
        let mut streams = self.get_data(handle, OutputOptions::default()).await?;
        let stdout = streams.remove(STDOUT).unwrap_or_default();
        for (name, text) in &streams {
            push_other(other, name, text);
        }
        tracing::trace!(bytes = stdout.len(), "collected output");
        Ok(stdout)
    }
}

/// Objects decoded one at a time from streamed XML output.
pub struct XmlObjects<'a, T> {
    output: OutputStream<'a, T>,
    fragments: XmlFragments,
    reader: ObjectReader,
    other: OtherOutput,
}

impl<T: Transport> XmlObjects<'_, T> {
    pub async fn next(&mut self) -> Option<Result<Row, ShellError>> {
        loop {
            if let Some(object) = self.reader.next_object() {
                return Some(object_to_map(&object).map_err(ShellError::from));
            }

            let chunk = match self.output.next().await? {
                Ok(chunk) => chunk,
                Err(err) => return Some(Err(err)),
            };
            for (name, text) in &chunk.streams {
                if name != STDOUT {
                    push_other(&mut self.other, name, text);
                }
            }
            if let Some(fragment) = self.fragments.push(chunk.stdout(), &mut self.other) {
                self.reader.feed(&fragment);
            }
        }
    }

    /// Output that was not part of the XML document.
    pub fn other(&self) -> &OtherOutput {
        &self.other
    }
}
