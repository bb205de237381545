//! Error types for the library layer.

use std::fmt;

use meuiptu_api::{FetchError, InvalidTaxpayerId};

use crate::extract::ExtractError;

/// Errors produced by a refresh cycle or by library configuration.
#[derive(Debug)]
pub enum IptuError {
    /// The portal could not be queried.
    Fetch(FetchError),
    /// The portal answered with something that is not an HTML page.
    Extract(ExtractError),
    /// User-provided input (identifier, interval) failed validation.
    InvalidInput(String),
}

impl IptuError {
    /// Short machine-friendly kind, used in logs and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Timeout { .. }) => "timeout",
            Self::Fetch(_) => "unreachable_or_rejected",
            Self::Extract(_) => "unparseable",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

impl fmt::Display for IptuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "Fetch error: {}", e),
            Self::Extract(e) => write!(f, "Extract error: {}", e),
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for IptuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Extract(e) => Some(e),
            Self::InvalidInput(_) => None,
        }
    }
}

impl From<FetchError> for IptuError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<ExtractError> for IptuError {
    fn from(e: ExtractError) -> Self {
        Self::Extract(e)
    }
}

impl From<InvalidTaxpayerId> for IptuError {
    fn from(e: InvalidTaxpayerId) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
