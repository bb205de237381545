mod client;
mod errors;
mod query;
pub mod types;
pub mod user_agent;
pub use self::client::{Client, DEFAULT_TIMEOUT, PORTAL_URL};
pub use self::errors::{FetchError, Stage};
pub use self::query::{DebtQueryForm, SearchMode};
pub use self::types::{InvalidTaxpayerId, TaxpayerId};
