//! Maps PowerShell stderr text to a [`FailureKind`].
//!
//! Matching is on the English texts the Active Directory cmdlets print and is
//! case-sensitive.

use std::{
    collections::BTreeMap,
    sync::LazyLock,
};

use regex_lite::Regex;

use crate::{CommandFailure, FailureKind};

const ACCESS_DENIED: [&str; 2] = [
    "Insufficient access rights to perform the operation",
    "Access is denied",
];
const SIZE_LIMIT: &str = "The size limit for this request was exceeded";
const DIRECTORY_OBJECT_NOT_FOUND: &str = ": Directory object not found";
const ALREADY_EXISTS: [&str; 2] = [
    "ADIdentityAlreadyExistsException",
    "An attempt was made to add an object to the directory with\n a name\n that is already in use",
];
const COMMAND_TOO_LONG: &str = "The command line is too long";

static PARENT_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Move-ADObject : .+object's paren.+is either uninstantiated or deleted")
        .expect("valid regex")
});
static SPECIFIED_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r": The specified \w+ already exists").expect("valid regex"));
static UPN_NOT_UNIQUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"New-AD.+ : The operation failed because UPN value provided for add.+\n+.+not unique forest")
        .expect("valid regex")
});
static ACCOUNT_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Set-ADObject|New-ADGroup|New-ADObject) : The specified account does not exist")
        .expect("valid regex")
});
static CATEGORY_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*?)\s*(?:\+\s*CategoryInfo\s*:|At line:)").expect("valid regex")
});

/// Picks the failure kind for a stderr text. Empty stderr is a plain exit
/// code failure.
pub fn classify_stderr(stderr: &str) -> FailureKind {
    if stderr.is_empty() {
        return FailureKind::ExitCode;
    }
    if ACCESS_DENIED.iter().any(|needle| stderr.contains(needle)) {
        return FailureKind::AccessDenied;
    }
    if stderr.contains(SIZE_LIMIT) {
        return FailureKind::SizeLimitExceeded;
    }
    if stderr.contains(DIRECTORY_OBJECT_NOT_FOUND) || PARENT_MISSING.is_match(stderr) {
        return FailureKind::ObjectNotFound;
    }
    if ALREADY_EXISTS.iter().any(|needle| stderr.contains(needle))
        || SPECIFIED_EXISTS.is_match(stderr)
        || UPN_NOT_UNIQUE.is_match(stderr)
    {
        return FailureKind::ObjectAlreadyExists;
    }
    if ACCOUNT_MISSING.is_match(stderr) {
        return FailureKind::AttributeSetFailed;
    }
    if stderr.contains(COMMAND_TOO_LONG) {
        return FailureKind::CommandTooLong;
    }
    FailureKind::PowerShell
}

/// Builds the classified failure for a finished command.
pub fn classify(exit_code: i64, output: BTreeMap<String, String>) -> CommandFailure {
    let stderr = output.get(winrs_core::STDERR).map(String::as_str).unwrap_or_default();
    let kind = classify_stderr(stderr);
    CommandFailure::new(kind, exit_code, output)
}

impl CommandFailure {
    /// One-line description: the first PowerShell error message when stderr
    /// carries one, otherwise the exit code and raw stderr.
    pub fn summary(&self) -> String {
        let first_error = CATEGORY_INFO
            .captures(&self.stderr)
            .and_then(|captures| captures.get(1))
            .map(|message| message.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|message| !message.is_empty());

        match first_error {
            Some(message) => format!("exit code {}: {message}", self.exit_code),
            None => format!(
                "Command failed: exitcode: {}, stderr: {}",
                self.exit_code,
                self.stderr.trim()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::classify_stderr;
    use crate::FailureKind;

    #[test]
    fn move_error_spans_lines() {
        let stderr = "Move-ADObject : The operation could not be performed because the object's paren\nt is either uninstantiated or deleted";
        assert_eq!(classify_stderr(stderr), FailureKind::ObjectNotFound);
    }

    #[test]
    fn upn_conflict_is_an_existing_object() {
        let stderr = "New-ADUser : The operation failed because UPN value provided for addition/modification is\n not unique forest-wide";
        assert_eq!(classify_stderr(stderr), FailureKind::ObjectAlreadyExists);
    }

    #[test]
    fn unknown_text_falls_back_to_powershell() {
        assert_eq!(classify_stderr("Something odd"), FailureKind::PowerShell);
        assert_eq!(classify_stderr(""), FailureKind::ExitCode);
    }
}
