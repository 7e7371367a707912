//! Stable, machine-readable error classification shared by every component.
//!
//! Each component keeps its own `thiserror` enum (human message via `Display`,
//! wrapped cause via `#[source]`) and maps its variants onto an [`ErrorKind`]
//! so callers can branch on the class of failure without string matching.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or inconsistent configuration. Fatal, never retried.
    Configuration,
    /// A 402 challenge was absent or could not be decoded.
    MalformedChallenge,
    /// An authorization header could not be decoded.
    MalformedAuthorization,
    /// The requested price is above the caller's spend ceiling.
    CeilingExceeded,
    /// The wallet cannot produce signatures (disconnected or watch-only).
    SigningUnsupported,
    /// Transport failure talking to a remote peer.
    Network,
    /// A wall-clock timeout elapsed.
    Timeout,
    /// The server refused the paid retry.
    PaymentRejected,
    /// The ledger moved past the transaction's deadline height.
    SubmissionExpired,
    /// All submission attempts failed.
    SubmissionExhausted,
    /// The ledger rejected or failed a request.
    Ledger,
    /// A client sent a request the server cannot act on.
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::MalformedChallenge => "malformed_challenge",
            ErrorKind::MalformedAuthorization => "malformed_authorization",
            ErrorKind::CeilingExceeded => "ceiling_exceeded",
            ErrorKind::SigningUnsupported => "signing_unsupported",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PaymentRejected => "payment_rejected",
            ErrorKind::SubmissionExpired => "submission_expired",
            ErrorKind::SubmissionExhausted => "submission_exhausted",
            ErrorKind::Ledger => "ledger",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }

    /// Whether retrying the whole operation could plausibly succeed.
    ///
    /// Only transport-level failures qualify; payment and submission
    /// failures need caller action first.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
