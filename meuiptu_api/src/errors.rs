//! Error types for the portal client.

use std::fmt;
use std::time::Duration;

/// Leg of the two-step portal exchange that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Priming GET that opens the portal session.
    Prime,
    /// Form POST that submits the document number.
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prime => f.write_str("GET"),
            Stage::Submit => f.write_str("POST"),
        }
    }
}

/// Errors that can occur while querying the portal.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Network failure or non-success HTTP status on either leg.
    #[error("{stage} request unreachable or rejected{}", status_suffix(.status))]
    UnreachableOrRejected { stage: Stage, status: Option<u16> },
    /// A leg exceeded its per-request timeout.
    #[error("{stage} request timed out after {}s", .timeout.as_secs_f64())]
    Timeout { stage: Stage, timeout: Duration },
    /// The client could not be constructed (bad base URL, TLS backend failure).
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl FetchError {
    /// Returns the leg that failed, if the error came from a request.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::UnreachableOrRejected { stage, .. } | Self::Timeout { stage, .. } => Some(*stage),
            Self::Setup(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}
