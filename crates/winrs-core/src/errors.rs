use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason text the server uses when a user has too many open operations.
const QUOTA_EXCEEDED_REASON: &str = "maximum number of concurrent operations";
/// Reason text the server uses when a shell id is unknown or expired.
const INVALID_SELECTORS_REASON: &str = "request contained invalid selectors for the resource";

/// A SOAP fault returned by the WS-Management service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Error)]
#[error("server fault [{}]{}", .codes.join(", "), reason_suffix(.reasons))]
pub struct Fault {
    /// Primary code followed by any subcodes, in document order (e.g.
    /// `["s:Receiver", "w:TimedOut"]`).
    pub codes: Vec<String>,
    /// Human readable reason texts, in document order.
    pub reasons: Vec<String>,
    /// Raw `s:Detail` blocks, re-serialized as XML text.
    pub details: Vec<String>,
    /// Parsed `f:WSManFault` detail, when the server sent one.
    pub wsman: Option<WsmanFaultDetail>,
}

/// Vendor detail carried inside `s:Detail/f:WSManFault`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WsmanFaultDetail {
    /// Win32 or WS-Management error number.
    pub code: Option<u64>,
    /// Machine that raised the fault.
    pub machine: Option<String>,
    /// Longer message text.
    pub message: Option<String>,
}

impl Fault {
    /// True when any code's local part (after the `prefix:`) equals `name`.
    pub fn has_code(&self, name: &str) -> bool {
        self.codes
            .iter()
            .any(|code| code.rsplit(':').next().map(str::trim) == Some(name))
    }

    /// The first reason text, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reasons.first().map(String::as_str)
    }

    /// True when the first reason contains `needle`, with runs of whitespace
    /// in the reason collapsed to single spaces.
    pub fn reason_contains(&self, needle: &str) -> bool {
        self.reason().is_some_and(|reason| {
            reason
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .contains(needle)
        })
    }

    /// The operation timeout elapsed before the server had output to return.
    pub fn is_timed_out(&self) -> bool {
        self.has_code("TimedOut")
    }

    /// The per-user concurrent operation quota was hit.
    pub fn is_quota_exceeded(&self) -> bool {
        self.has_code("MaxConcurrentOperationsPerUser") || self.reason_contains(QUOTA_EXCEEDED_REASON)
    }

    /// The shell id in the request is unknown, usually because the shell
    /// outlived its lifetime.
    pub fn is_invalid_selectors(&self) -> bool {
        self.has_code("InvalidSelectors") || self.reason_contains(INVALID_SELECTORS_REASON)
    }
}

fn reason_suffix(reasons: &[String]) -> String {
    reasons
        .first()
        .map(|reason| format!(": {}", reason.trim()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::Fault;

    fn fault(codes: &[&str], reason: &str) -> Fault {
        Fault {
            codes: codes.iter().map(|code| code.to_string()).collect(),
            reasons: vec![reason.to_string()],
            ..Fault::default()
        }
    }

    #[test]
    fn timed_out_matches_subcode_local_name() {
        assert!(fault(&["s:Receiver", "w:TimedOut"], "").is_timed_out());
        assert!(!fault(&["s:Receiver", "w:InternalError"], "").is_timed_out());
    }

    #[test]
    fn quota_and_selector_faults_match_reason_text() {
        let quota = fault(
            &["s:Receiver", "w:InternalError"],
            "The WS-Management service cannot process the request. The maximum number of \
             concurrent operations for this user has been exceeded.",
        );
        assert!(quota.is_quota_exceeded());
        assert!(!quota.is_invalid_selectors());

        let selectors = fault(
            &["s:Sender", "w:InvalidSelectors"],
            "The WS-Management service cannot process the request because the request \
             contained invalid selectors for the resource.",
        );
        assert!(selectors.is_invalid_selectors());
        assert!(!selectors.is_quota_exceeded());
    }

    #[test]
    fn display_includes_codes_and_trimmed_reason() {
        let fault = fault(&["s:Sender", "w:QuotaLimit"], "  too many shells\n");
        assert_eq!(
            fault.to_string(),
            "server fault [s:Sender, w:QuotaLimit]: too many shells"
        );
    }

    #[test]
    fn display_joins_codes_and_first_reason() {
        let timed_out = fault(&["s:Receiver", "w:TimedOut"], "  The operation timed out.\n");
        assert_eq!(
            timed_out.to_string(),
            "server fault [s:Receiver, w:TimedOut]: The operation timed out."
        );

        let bare = Fault {
            codes: vec!["s:Sender".to_string()],
            ..Fault::default()
        };
        assert_eq!(bare.to_string(), "server fault [s:Sender]");
    }
}
