use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use iptutubarao_lib::{DebtQueryResult, Decimal, Snapshot};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Markdown,
}

impl OutputFormat {
    /// Unknown names fall back to a plain table.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            "md" | "markdown" => OutputFormat::Markdown,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Tabled, Serialize)]
struct ResultRow {
    #[tabled(rename = "CPF")]
    #[serde(rename = "CPF")]
    cpf: String,
    #[tabled(rename = "Owner")]
    #[serde(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Status")]
    #[serde(rename = "Status")]
    status: String,
    #[tabled(rename = "Total")]
    #[serde(rename = "Total")]
    total: String,
    #[tabled(rename = "Single Payment")]
    #[serde(rename = "Single Payment")]
    single_payment: String,
    #[tabled(rename = "Without Discount")]
    #[serde(rename = "Without Discount")]
    without_discount: String,
    #[tabled(rename = "Next Due")]
    #[serde(rename = "Next Due")]
    next_due: String,
}

#[derive(Tabled, Serialize)]
struct SnapshotRow {
    #[tabled(rename = "CPF")]
    #[serde(rename = "CPF")]
    cpf: String,
    #[tabled(rename = "State")]
    #[serde(rename = "State")]
    state: String,
    #[tabled(rename = "Owner")]
    #[serde(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Total")]
    #[serde(rename = "Total")]
    total: String,
    #[tabled(rename = "Next Due")]
    #[serde(rename = "Next Due")]
    next_due: String,
    #[tabled(rename = "Last Success")]
    #[serde(rename = "Last Success")]
    last_success: String,
    #[tabled(rename = "Failures")]
    #[serde(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Last Error")]
    #[serde(rename = "Last Error")]
    last_error: String,
}

// -- Row builders --

fn build_result_rows(results: &[DebtQueryResult]) -> Vec<ResultRow> {
    results
        .iter()
        .map(|r| ResultRow {
            cpf: r.taxpayer_id_formatted.clone(),
            owner: r.owner_name.clone(),
            status: r.status_message.clone(),
            total: format_brl(r.total_amount),
            single_payment: format_brl(r.single_installment_amount),
            without_discount: format_brl(r.amount_without_discount),
            next_due: format_date(r.next_due_date),
        })
        .collect()
}

fn build_snapshot_rows(snapshots: &[Snapshot]) -> Vec<SnapshotRow> {
    snapshots
        .iter()
        .map(|s| {
            let result = s.result.as_ref();
            SnapshotRow {
                cpf: s.taxpayer_id.formatted(),
                state: s.state_label().to_string(),
                owner: result.map(|r| r.owner_name.clone()).unwrap_or_default(),
                total: format_brl(result.and_then(|r| r.total_amount)),
                next_due: format_date(result.and_then(|r| r.next_due_date)),
                last_success: format_timestamp(s.last_success_at),
                failures: s.consecutive_failures,
                last_error: s.last_error.clone().unwrap_or_default(),
            }
        })
        .collect()
}

// -- Dispatch --

pub fn print_results(results: &[DebtQueryResult], format: &OutputFormat) -> Result<()> {
    let rows = build_result_rows(results);
    match format {
        OutputFormat::Table => print_table(rows),
        OutputFormat::Markdown => print_markdown(rows),
        OutputFormat::Csv => print_csv(rows)?,
        OutputFormat::Json => print_json(&results),
    }
    Ok(())
}

pub fn print_snapshots(snapshots: &[Snapshot], format: &OutputFormat) -> Result<()> {
    let rows = build_snapshot_rows(snapshots);
    match format {
        OutputFormat::Table => print_table(rows),
        OutputFormat::Markdown => print_markdown(rows),
        OutputFormat::Csv => print_csv(rows)?,
        OutputFormat::Json => print_json(&snapshots),
    }
    Ok(())
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    println!("{}", Table::new(rows));
}

fn print_markdown<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::markdown());
    println!("{}", table);
}

fn print_csv<T: Serialize>(rows: Vec<T>) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

// -- JSON output --

pub fn print_json<T: serde::Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}

// -- Formatting --

/// Renders an amount the way the portal does: `R$ 1.234,56`.
fn format_brl(amount: Option<Decimal>) -> String {
    let Some(value) = amount else {
        return "-".to_string();
    };
    let rounded = value.round_dp(2);
    let digits = format!("{:.2}", rounded.abs());
    let (whole, cents) = digits.split_once('.').unwrap_or((digits.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}R$ {},{}", sign, grouped, cents)
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
