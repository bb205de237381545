//! Library layer for the IPTU Tubarão tracker: HTML extraction, the cached
//! read model, and scheduled refresh cycles.
//!
//! Wraps the `meuiptu_api` portal client with a layout-tolerant extractor,
//! a last-known-good cache, and a per-taxpayer refresh scheduler.

pub mod cache;
pub mod error;
pub mod extract;
pub mod result;
pub mod tracker;

pub use meuiptu_api;
pub use meuiptu_api::{Client, FetchError, Stage, TaxpayerId};
pub use rust_decimal::Decimal;

pub use cache::{ResultCache, Snapshot};
pub use error::IptuError;
pub use extract::{extract, extract_at, extract_with, ExtractError, Page, RuleSet};
pub use result::DebtQueryResult;
pub use tracker::{DebtTracker, RefreshConfig, RefreshEvent, Scheduler};
