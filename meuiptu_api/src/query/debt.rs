//! Form body for the portal's debt search.

use crate::types::TaxpayerId;

/// Portal menu selected through the `st_menu` form field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchMode {
    /// Search by the owner's document number (CPF). This is the default.
    #[default]
    Document = 1,
}

impl SearchMode {
    fn as_field(self) -> String {
        (self as u8).to_string()
    }
}

/// Fields posted to the portal to list the debts of one taxpayer.
///
/// The portal's form also carries an `inscricao` (property registration)
/// field; document searches send it empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebtQueryForm {
    pub documento: String,
    pub inscricao: String,
    pub mode: SearchMode,
}

impl DebtQueryForm {
    /// Builds a document search for the given taxpayer.
    pub fn by_document(taxpayer: &TaxpayerId) -> Self {
        Self {
            documento: taxpayer.as_str().to_string(),
            inscricao: String::new(),
            mode: SearchMode::Document,
        }
    }

    /// Returns the form as `application/x-www-form-urlencoded` pairs, in the
    /// order the portal's own form submits them.
    pub fn to_form_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("documento", self.documento.clone()),
            ("inscricao", self.inscricao.clone()),
            ("st_menu", self.mode.as_field()),
        ]
    }
}
