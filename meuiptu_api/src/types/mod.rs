mod taxpayer;
pub use self::taxpayer::{InvalidTaxpayerId, TaxpayerId, TAXPAYER_ID_LEN};
