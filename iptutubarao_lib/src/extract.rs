//! Layout-tolerant extraction of debt facts from portal result pages.
//!
//! Each fact is read by an independent rule over a parsed [`Page`]. Rules
//! return `Option`s; [`reduce`] maps misses to the documented defaults, so a
//! page whose layout drifted still yields a best-effort result.

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use meuiptu_api::TaxpayerId;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};

use crate::result::{status_message, DebtQueryResult, UNKNOWN_OWNER};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("response is not an HTML document: {reason}")]
    Unparseable { reason: &'static str },
}

/// Text the portal shows when the document has no open debts.
pub const NO_DEBT_MARKER: &str = "Não foram localizados débitos";

pub const LABEL_TOTAL: &str = "VALORES TOTAIS";
pub const LABEL_SINGLE_INSTALLMENT: &str = "VALOR TOTAL ÚNICA";
pub const LABEL_WITHOUT_DISCOUNT: &str = "VALOR SEM DESCONTO";

static OWNER_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.h5.mb-0.font-weight-bold.text-gray-800").expect("invalid selector: owner")
});

static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("invalid selector: cell"));

static DATE_CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th, div, span").expect("invalid selector: date cell"));

static RE_BRL_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{1,3}(?:\.\d{3})+|\d+)(?:,\d+)?$").expect("invalid regex: amount")
});

static RE_BR_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").expect("invalid regex: date"));

/// A parsed portal page with its visible text and table cells precomputed.
pub struct Page {
    document: Html,
    text: String,
    cells: Vec<String>,
}

impl Page {
    /// Parses `html`. Fails only when the body is empty or has no markup at
    /// all (an error string, a JSON blob); anything with tags is accepted.
    pub fn parse(html: &str) -> Result<Self, ExtractError> {
        let trimmed = html.trim();
        if trimmed.is_empty() {
            return Err(ExtractError::Unparseable {
                reason: "empty body",
            });
        }
        if !trimmed.contains('<') {
            return Err(ExtractError::Unparseable {
                reason: "no markup",
            });
        }
        let document = Html::parse_document(html);
        let text = visible_text(&document);
        let cells = document
            .select(&CELL_SELECTOR)
            .filter(|cell| cell.select(&CELL_SELECTOR).next().is_none())
            .map(elem_text)
            .collect();
        Ok(Self {
            document,
            text,
            cells,
        })
    }

    /// Visible text with whitespace runs collapsed to single spaces.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Innermost `td`/`th` cells in document order, whitespace-collapsed.
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Collapsed text of the first element matching `selector`, if non-empty.
    pub fn first_text(&self, selector: &Selector) -> Option<String> {
        self.document
            .select(selector)
            .next()
            .map(elem_text)
            .filter(|t| !t.is_empty())
    }
}

fn elem_text(element: ElementRef) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn visible_text(document: &Html) -> String {
    let mut raw = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            raw.push_str(text);
        }
    }
    normalize_whitespace(&raw)
}

pub type OwnerRule = fn(&Page) -> Option<String>;
pub type AmountRule = fn(&Page, &str) -> Option<Decimal>;
pub type DueDatesRule = fn(&Page) -> Vec<NaiveDate>;

/// The set of rules used to read a portal page.
///
/// `Default` is tuned to the current portal layout. The due-date rule is the
/// one most tied to page styling; swap it with [`RuleSet::with_due_dates`]
/// when the layout changes.
#[derive(Clone, Copy)]
pub struct RuleSet {
    pub no_debt_marker: &'static str,
    pub owner: OwnerRule,
    pub amount: AmountRule,
    pub total_label: &'static str,
    pub single_installment_label: &'static str,
    pub without_discount_label: &'static str,
    pub due_dates: DueDatesRule,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            no_debt_marker: NO_DEBT_MARKER,
            owner: owner_label,
            amount: amount_after_label,
            total_label: LABEL_TOTAL,
            single_installment_label: LABEL_SINGLE_INSTALLMENT,
            without_discount_label: LABEL_WITHOUT_DISCOUNT,
            due_dates: due_date_cells,
        }
    }
}

/// Raw per-rule outcomes, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub has_debt: bool,
    pub owner_name: Option<String>,
    pub total_amount: Option<Decimal>,
    pub single_installment_amount: Option<Decimal>,
    pub amount_without_discount: Option<Decimal>,
    pub due_dates: Vec<NaiveDate>,
}

impl RuleSet {
    pub fn with_due_dates(mut self, rule: DueDatesRule) -> Self {
        self.due_dates = rule;
        self
    }

    /// Runs every rule against `page`. Rules do not depend on each other.
    pub fn apply(&self, page: &Page) -> ExtractedFields {
        let has_debt = !page.text().contains(self.no_debt_marker);

        let owner_name = (self.owner)(page);
        if owner_name.is_none() {
            tracing::debug!("owner label not found");
        }

        let amount = |label: &str| {
            let value = (self.amount)(page, label);
            if value.is_none() {
                tracing::debug!("no amount parsed for label {:?}", label);
            }
            value
        };
        let total_amount = amount(self.total_label);
        let single_installment_amount = amount(self.single_installment_label);
        let amount_without_discount = amount(self.without_discount_label);

        let due_dates = (self.due_dates)(page);
        if due_dates.is_empty() {
            tracing::debug!("no due dates found");
        }

        ExtractedFields {
            has_debt,
            owner_name,
            total_amount,
            single_installment_amount,
            amount_without_discount,
            due_dates,
        }
    }
}

/// Reads the owner's display name from the account label.
///
/// The label reads `<document> - <NAME>`; only the part after the last
/// hyphen is kept.
pub fn owner_label(page: &Page) -> Option<String> {
    let raw = page.first_text(&OWNER_SELECTOR)?;
    let name = match raw.rfind('-') {
        Some(idx) => raw[idx + 1..].trim(),
        None => raw.trim(),
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Finds the first cell containing `label` (case-insensitive) and parses the
/// cell right after it as a Brazilian-formatted amount.
pub fn amount_after_label(page: &Page, label: &str) -> Option<Decimal> {
    let needle = label.to_uppercase();
    let cells = page.cells();
    let idx = cells
        .iter()
        .position(|cell| cell.to_uppercase().contains(&needle))?;
    parse_brl_amount(cells.get(idx + 1)?)
}

/// Collects every cell whose entire text is a `dd/mm/yyyy` date.
pub fn due_date_cells(page: &Page) -> Vec<NaiveDate> {
    page.document()
        .select(&DATE_CELL_SELECTOR)
        .filter_map(|el| parse_br_date(&elem_text(el)))
        .collect()
}

/// Parses `1.234,56`, `R$ 1.234,56` or `1234,56` into `1234.56`.
/// Negative or otherwise malformed values yield `None`.
pub fn parse_brl_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !RE_BRL_AMOUNT.is_match(&cleaned) {
        return None;
    }
    cleaned.replace('.', "").replace(',', ".").parse().ok()
}

pub fn parse_br_date(raw: &str) -> Option<NaiveDate> {
    let caps = RE_BR_DATE.captures(raw.trim())?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Maps rule outcomes to a result, applying the documented defaults.
pub fn reduce(taxpayer: &TaxpayerId, fields: ExtractedFields, today: NaiveDate) -> DebtQueryResult {
    let mut due_dates = fields.due_dates;
    due_dates.sort_unstable();
    due_dates.dedup();
    let next_due_date = due_dates.iter().copied().find(|d| *d >= today);

    DebtQueryResult {
        taxpayer_id: taxpayer.clone(),
        taxpayer_id_formatted: taxpayer.formatted(),
        has_debt: fields.has_debt,
        status_message: status_message(fields.has_debt).to_string(),
        owner_name: fields
            .owner_name
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string()),
        amount_indicates_debt: fields.total_amount.is_some_and(|v| v > Decimal::ZERO),
        total_amount: fields.total_amount,
        single_installment_amount: fields.single_installment_amount,
        amount_without_discount: fields.amount_without_discount,
        next_due_date,
        due_dates,
    }
}

/// Extracts a result using the local date as "today".
pub fn extract(html: &str, taxpayer: &TaxpayerId) -> Result<DebtQueryResult, ExtractError> {
    extract_at(html, taxpayer, Local::now().date_naive())
}

/// Extracts a result evaluated at `today`. Pure: identical inputs give
/// identical outputs.
pub fn extract_at(
    html: &str,
    taxpayer: &TaxpayerId,
    today: NaiveDate,
) -> Result<DebtQueryResult, ExtractError> {
    extract_with(html, taxpayer, today, &RuleSet::default())
}

pub fn extract_with(
    html: &str,
    taxpayer: &TaxpayerId,
    today: NaiveDate,
    rules: &RuleSet,
) -> Result<DebtQueryResult, ExtractError> {
    let page = Page::parse(html)?;
    Ok(reduce(taxpayer, rules.apply(&page), today))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn taxpayer() -> TaxpayerId {
        TaxpayerId::parse("12345678909").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn page(body: &str) -> String {
        format!("<html><head><title>Meu IPTU</title></head><body>{}</body></html>", body)
    }

    // -- amount parsing --

    #[test]
    fn brl_amount_with_thousands() {
        assert_eq!(parse_brl_amount("1.234,56"), Some(dec("1234.56")));
    }

    #[test]
    fn brl_amount_with_currency_and_spaces() {
        assert_eq!(parse_brl_amount(" R$ 12.345.678,90 "), Some(dec("12345678.90")));
        assert_eq!(parse_brl_amount("R$\u{a0}99,90"), Some(dec("99.90")));
    }

    #[test]
    fn brl_amount_without_thousands() {
        assert_eq!(parse_brl_amount("1234,5"), Some(dec("1234.5")));
        assert_eq!(parse_brl_amount("0,00"), Some(dec("0.0")));
        assert_eq!(parse_brl_amount("1.234"), Some(dec("1234.0")));
    }

    #[test]
    fn brl_amounts_keep_exact_cents() {
        let a = parse_brl_amount("0,10").unwrap();
        let b = parse_brl_amount("0,20").unwrap();
        assert_eq!(a + b, parse_brl_amount("0,30").unwrap());
        assert_eq!(
            parse_brl_amount("1.234,56").unwrap().to_string(),
            "1234.56"
        );
    }

    #[test]
    fn brl_amount_rejects_garbage() {
        assert_eq!(parse_brl_amount(""), None);
        assert_eq!(parse_brl_amount("-"), None);
        assert_eq!(parse_brl_amount("-10,00"), None);
        assert_eq!(parse_brl_amount("1234.56"), None);
        assert_eq!(parse_brl_amount("abc"), None);
        assert_eq!(parse_brl_amount("1,2,3"), None);
    }

    // -- date parsing --

    #[test]
    fn br_date_parses() {
        assert_eq!(parse_br_date("10/01/2024"), Some(date(2024, 1, 10)));
        assert_eq!(parse_br_date(" 31/12/2099 "), Some(date(2099, 12, 31)));
    }

    #[test]
    fn br_date_rejects_invalid() {
        assert_eq!(parse_br_date("31/02/2024"), None);
        assert_eq!(parse_br_date("2024-01-10"), None);
        assert_eq!(parse_br_date("Vencimento 10/01/2024"), None);
    }

    // -- debt presence --

    #[test]
    fn marker_means_no_debt() {
        let html = page("<div class=\"alert\">Não foram localizados débitos com as informações selecionadas.</div>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(!result.has_debt);
        assert_eq!(result.status_message, "Nenhum débito encontrado");
        assert_eq!(result.state_label(), "sem_debito");
    }

    #[test]
    fn marker_wins_over_amounts() {
        let html = page(
            "<p>Não foram
                localizados   débitos</p>
             <table><tr><td>VALORES TOTAIS</td><td>1.234,56</td></tr></table>",
        );
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(!result.has_debt);
        assert_eq!(result.total_amount, Some(dec("1234.56")));
        assert!(result.amount_indicates_debt);
        assert!(result.signals_disagree());
    }

    #[test]
    fn marker_split_across_inline_tags() {
        let html = page("<p>Não foram <b>localizados</b> débitos</p>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(!result.has_debt);
    }

    #[test]
    fn marker_inside_script_is_not_visible() {
        let html = page("<script>var msg = 'Não foram localizados débitos';</script><table></table>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(result.has_debt);
        assert_eq!(result.status_message, "Débitos localizados");
    }

    #[test]
    fn entity_encoded_marker_is_recognized() {
        let html = page("<p>N&atilde;o foram localizados d&eacute;bitos</p>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(!result.has_debt);
    }

    // -- owner --

    #[test]
    fn owner_after_last_hyphen() {
        let html = page(
            "<div class=\"h5 mb-0 font-weight-bold text-gray-800\">
                123.456.789-09 - MARIA DA SILVA
             </div>",
        );
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.owner_name, "MARIA DA SILVA");
    }

    #[test]
    fn owner_without_hyphen_kept_whole() {
        let html = page("<div class=\"text-gray-800 h5 font-weight-bold mb-0\">JOSE SOUZA</div>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.owner_name, "JOSE SOUZA");
    }

    #[test]
    fn owner_missing_is_unknown() {
        let html = page("<div class=\"h5 mb-0\">12345678909 - MARIA</div>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.owner_name, UNKNOWN_OWNER);
    }

    #[test]
    fn owner_trailing_hyphen_is_unknown() {
        let html = page("<div class=\"h5 mb-0 font-weight-bold text-gray-800\">12345678909 -</div>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.owner_name, UNKNOWN_OWNER);
    }

    // -- amounts --

    #[test]
    fn amounts_read_from_next_cell() {
        let html = page(
            "<table>
               <tr><th>valores totais</th><td>1.234,56</td></tr>
               <tr><td>VALOR TOTAL ÚNICA</td><td>R$ 1.100,00</td></tr>
               <tr><td><b>Valor sem desconto</b></td><td>1.200,10</td></tr>
             </table>",
        );
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, Some(dec("1234.56")));
        assert_eq!(result.single_installment_amount, Some(dec("1100.0")));
        assert_eq!(result.amount_without_discount, Some(dec("1200.10")));
    }

    #[test]
    fn missing_label_defaults_to_none() {
        let html = page("<table><tr><td>VALORES TOTAIS</td><td>10,00</td></tr></table>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, Some(dec("10.0")));
        assert_eq!(result.single_installment_amount, None);
        assert_eq!(result.amount_without_discount, None);
    }

    #[test]
    fn unparsable_value_defaults_to_none() {
        let html = page("<table><tr><td>VALORES TOTAIS</td><td>consulte</td></tr></table>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, None);
        assert!(!result.amount_indicates_debt);
    }

    #[test]
    fn label_in_last_cell_defaults_to_none() {
        let html = page("<table><tr><td>VALORES TOTAIS</td></tr></table>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, None);
    }

    #[test]
    fn nested_layout_tables_use_innermost_cells() {
        let html = page(
            "<table><tr><td>
               <table><tr><td>VALORES TOTAIS</td><td>2.000,00</td></tr></table>
             </td></tr></table>",
        );
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, Some(dec("2000.0")));
    }

    #[test]
    fn zero_total_does_not_indicate_debt() {
        let html = page("<table><tr><td>VALORES TOTAIS</td><td>0,00</td></tr></table>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.total_amount, Some(dec("0.0")));
        assert!(!result.amount_indicates_debt);
        assert!(result.has_debt);
    }

    // -- due dates --

    #[test]
    fn next_due_date_skips_past_dates() {
        let html = page(
            "<table>
               <tr><td>Parcela 1</td><td>10/01/2024</td></tr>
               <tr><td>Parcela 2</td><td>01/01/2099</td></tr>
               <tr><td>Parcela 3</td><td>01/01/2020</td></tr>
             </table>",
        );
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.next_due_date, Some(date(2099, 1, 1)));
        assert_eq!(
            result.due_dates,
            vec![date(2020, 1, 1), date(2024, 1, 10), date(2099, 1, 1)]
        );
    }

    #[test]
    fn due_date_today_counts() {
        let html = page("<div class=\"col\">15/03/2025</div>");
        let result = extract_at(&html, &taxpayer(), date(2025, 3, 15)).unwrap();
        assert_eq!(result.next_due_date, Some(date(2025, 3, 15)));
    }

    #[test]
    fn all_past_dates_give_none() {
        let html = page("<span>01/01/2020</span><span>02/02/2021</span>");
        let result = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(result.next_due_date, None);
        assert_eq!(result.due_dates.len(), 2);
    }

    #[test]
    fn due_date_rule_is_swappable() {
        fn fixed(_: &Page) -> Vec<NaiveDate> {
            vec![NaiveDate::from_ymd_opt(2030, 5, 5).unwrap()]
        }
        let rules = RuleSet::default().with_due_dates(fixed);
        let result =
            extract_with(&page("<p>nada</p>"), &taxpayer(), date(2025, 1, 1), &rules).unwrap();
        assert_eq!(result.next_due_date, Some(date(2030, 5, 5)));
    }

    // -- whole document --

    #[test]
    fn empty_body_is_unparseable() {
        assert!(matches!(
            extract_at("   \n", &taxpayer(), date(2025, 1, 1)),
            Err(ExtractError::Unparseable { .. })
        ));
    }

    #[test]
    fn plain_text_is_unparseable() {
        assert!(matches!(
            extract_at("Service Unavailable", &taxpayer(), date(2025, 1, 1)),
            Err(ExtractError::Unparseable { .. })
        ));
    }

    #[test]
    fn bare_page_uses_defaults() {
        let result = extract_at(&page(""), &taxpayer(), date(2025, 1, 1)).unwrap();
        assert!(result.has_debt);
        assert_eq!(result.owner_name, UNKNOWN_OWNER);
        assert_eq!(result.total_amount, None);
        assert_eq!(result.next_due_date, None);
        assert!(result.due_dates.is_empty());
        assert_eq!(result.taxpayer_id_formatted, "123.456.789-09");
    }

    #[test]
    fn extraction_is_idempotent() {
        let html = page(
            "<div class=\"h5 mb-0 font-weight-bold text-gray-800\">X - ANA</div>
             <table><tr><td>VALORES TOTAIS</td><td>5,00</td></tr>
             <tr><td>Vencimento</td><td>10/10/2030</td></tr></table>",
        );
        let a = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        let b = extract_at(&html, &taxpayer(), date(2025, 1, 1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
