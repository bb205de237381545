//! Taxpayer identifier (CPF) normalization and display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of digits in a normalized CPF.
pub const TAXPAYER_ID_LEN: usize = 11;

/// Reasons an identifier string cannot be normalized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTaxpayerId {
    #[error("taxpayer identifier has no digits")]
    Empty,
    #[error("taxpayer identifier has {0} digits, expected at most 11")]
    TooLong(usize),
    #[error("taxpayer identifier contains unexpected character '{0}'")]
    UnexpectedChar(char),
}

/// A CPF normalized to exactly 11 ASCII digits.
///
/// Accepts raw digits or the usual punctuated rendering (`123.456.789-09`).
/// Shorter inputs are left-padded with zeros, matching how CPFs lose leading
/// zeros when stored as numbers. No check-digit validation is done: the portal
/// is the authority on whether a document exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxpayerId(String);

impl TaxpayerId {
    /// Normalizes `input`: strips punctuation and whitespace, then left-pads
    /// with zeros to 11 digits.
    pub fn parse(input: &str) -> Result<Self, InvalidTaxpayerId> {
        let mut digits = String::with_capacity(TAXPAYER_ID_LEN);
        for c in input.chars() {
            match c {
                '0'..='9' => digits.push(c),
                '.' | '-' | '/' => {}
                c if c.is_whitespace() => {}
                other => return Err(InvalidTaxpayerId::UnexpectedChar(other)),
            }
        }
        if digits.is_empty() {
            return Err(InvalidTaxpayerId::Empty);
        }
        if digits.len() > TAXPAYER_ID_LEN {
            return Err(InvalidTaxpayerId::TooLong(digits.len()));
        }
        Ok(Self(format!("{:0>width$}", digits, width = TAXPAYER_ID_LEN)))
    }

    /// The 11 normalized digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical `XXX.XXX.XXX-XX` rendering.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
    }
}

impl fmt::Display for TaxpayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaxpayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TaxpayerId {
    type Err = InvalidTaxpayerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaxpayerId {
    type Error = InvalidTaxpayerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxpayerId> for String {
    fn from(id: TaxpayerId) -> Self {
        id.0
    }
}
