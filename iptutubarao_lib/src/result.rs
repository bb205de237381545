//! The record produced by one refresh cycle.

use chrono::NaiveDate;
use meuiptu_api::TaxpayerId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Owner name used when the portal page carries no owner label.
pub const UNKNOWN_OWNER: &str = "Desconhecido";

pub const STATUS_NO_DEBT: &str = "Nenhum débito encontrado";
pub const STATUS_DEBT: &str = "Débitos localizados";

/// Structured facts extracted from one portal response.
///
/// Built once per refresh cycle and never modified afterwards; the cache
/// replaces it wholesale. Amount fields and `next_due_date` are always
/// serialized, as `null` when the page did not carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtQueryResult {
    pub taxpayer_id: TaxpayerId,
    pub taxpayer_id_formatted: String,
    /// Driven only by the "no debts located" marker text.
    pub has_debt: bool,
    pub status_message: String,
    pub owner_name: String,
    /// Amounts are exact decimals, written to JSON as plain numbers.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub total_amount: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub single_installment_amount: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub amount_without_discount: Option<Decimal>,
    pub next_due_date: Option<NaiveDate>,
    /// Whether `total_amount` is positive. Kept next to `has_debt` so callers
    /// can reconcile the two signals when the page layout drifts.
    pub amount_indicates_debt: bool,
    /// All due dates found on the page, ascending and deduplicated.
    pub due_dates: Vec<NaiveDate>,
}

impl DebtQueryResult {
    /// Sensor-style state label: `com_debito` or `sem_debito`.
    pub fn state_label(&self) -> &'static str {
        if self.has_debt {
            "com_debito"
        } else {
            "sem_debito"
        }
    }

    /// True when the marker text and the parsed total disagree.
    pub fn signals_disagree(&self) -> bool {
        self.has_debt != self.amount_indicates_debt
    }
}

/// Status message for a given debt flag.
pub fn status_message(has_debt: bool) -> &'static str {
    if has_debt {
        STATUS_DEBT
    } else {
        STATUS_NO_DEBT
    }
}
