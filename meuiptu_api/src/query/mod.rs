mod debt;
pub use self::debt::{DebtQueryForm, SearchMode};
