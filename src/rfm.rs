//! Transaction cleaning and RFM feature computation
//!
//! Cleaning is expressed as an ordered list of named rules. A row that several
//! rules would reject is attributed to the first one, so the per-rule counts in
//! the [`QualityReport`] always add up to the number of removed rows.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BuilderConfig;
use crate::data::Transaction;
use crate::error::{Error, Result};

/// Country recorded when a cleaned transaction carries none
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Cleaning rules in the order they are applied
pub const CLEANING_RULES: [CleaningRule; 5] = [
    CleaningRule::MissingCustomerId,
    CleaningRule::MissingCriticalField,
    CleaningRule::NonPositiveQuantity,
    CleaningRule::NonPositiveUnitPrice,
    CleaningRule::CancelledInvoice,
];

/// A named filter that removes a transaction from the cleaned set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningRule {
    MissingCustomerId,
    /// Invoice number, invoice date, quantity or unit price absent
    MissingCriticalField,
    NonPositiveQuantity,
    NonPositiveUnitPrice,
    CancelledInvoice,
}

impl CleaningRule {
    pub fn name(&self) -> &'static str {
        match self {
            CleaningRule::MissingCustomerId => "missing_customer_id",
            CleaningRule::MissingCriticalField => "missing_critical_field",
            CleaningRule::NonPositiveQuantity => "non_positive_quantity",
            CleaningRule::NonPositiveUnitPrice => "non_positive_unit_price",
            CleaningRule::CancelledInvoice => "cancelled_invoice",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CleaningRule::MissingCustomerId => "customer identifier missing",
            CleaningRule::MissingCriticalField => "invoice number, date, quantity or price missing",
            CleaningRule::NonPositiveQuantity => "quantity is zero or negative",
            CleaningRule::NonPositiveUnitPrice => "unit price is zero or negative",
            CleaningRule::CancelledInvoice => "invoice marked as a cancellation",
        }
    }

    /// Whether this rule rejects the transaction
    pub fn rejects(&self, tx: &Transaction, config: &BuilderConfig) -> bool {
        match self {
            CleaningRule::MissingCustomerId => tx.customer_id.is_none(),
            CleaningRule::MissingCriticalField => {
                tx.invoice_no.is_none()
                    || tx.invoice_date.is_none()
                    || tx.quantity.map_or(true, f64::is_nan)
                    || tx.unit_price.map_or(true, f64::is_nan)
            }
            CleaningRule::NonPositiveQuantity => tx.quantity.map_or(false, |q| q <= 0.0),
            CleaningRule::NonPositiveUnitPrice => tx.unit_price.map_or(false, |p| p <= 0.0),
            CleaningRule::CancelledInvoice => is_cancellation(tx, config),
        }
    }
}

fn is_cancellation(tx: &Transaction, config: &BuilderConfig) -> bool {
    tx.invoice_no
        .as_deref()
        .map_or(false, |invoice| invoice.starts_with(config.cancellation_prefix.as_str()))
}

/// A transaction that passed every cleaning rule
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedTransaction {
    pub invoice_no: String,
    pub stock_code: Option<String>,
    pub description: Option<String>,
    pub quantity: f64,
    pub invoice_date: NaiveDateTime,
    pub unit_price: f64,
    pub customer_id: String,
    pub country: String,
    /// `quantity * unit_price`, always positive
    pub line_total: f64,
}

impl CleanedTransaction {
    fn from_transaction(tx: &Transaction) -> Option<Self> {
        let quantity = tx.quantity?;
        let unit_price = tx.unit_price?;
        Some(Self {
            invoice_no: tx.invoice_no.clone()?,
            stock_code: tx.stock_code.clone(),
            description: tx.description.clone(),
            quantity,
            invoice_date: tx.invoice_date?,
            unit_price,
            customer_id: tx.customer_id.clone()?,
            country: tx
                .country
                .clone()
                .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
            line_total: quantity * unit_price,
        })
    }
}

/// Recency, Frequency and Monetary features of one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmRow {
    pub customer_id: String,
    /// Whole days between the last purchase and the snapshot date
    pub recency: i64,
    /// Number of distinct invoices
    pub frequency: u32,
    /// Sum of line totals
    pub monetary: f64,
    /// Most frequent country of the customer's transactions
    pub country: String,
}

/// RFM rows together with the snapshot date they were measured against
#[derive(Debug, Clone, PartialEq)]
pub struct RfmTable {
    pub rows: Vec<RfmRow>,
    pub snapshot_date: NaiveDateTime,
}

/// Rows removed by one cleaning rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCount {
    pub rule: CleaningRule,
    pub removed: usize,
}

/// Missing-value counts of the raw input, per critical field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingFieldCounts {
    pub invoice_no: usize,
    pub invoice_date: usize,
    pub customer_id: usize,
    pub quantity: usize,
    pub unit_price: usize,
    pub country: usize,
}

impl MissingFieldCounts {
    fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut counts = Self::default();
        for tx in transactions {
            counts.invoice_no += tx.invoice_no.is_none() as usize;
            counts.invoice_date += tx.invoice_date.is_none() as usize;
            counts.customer_id += tx.customer_id.is_none() as usize;
            counts.quantity += tx.quantity.is_none() as usize;
            counts.unit_price += tx.unit_price.is_none() as usize;
            counts.country += tx.country.is_none() as usize;
        }
        counts
    }
}

/// Audit summary of a feature-building run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub raw_rows: usize,
    pub missing: MissingFieldCounts,
    /// Raw rows with a cancellation invoice number, whichever rule removed them
    pub cancellation_rows: usize,
    pub removed_by_rule: Vec<RuleCount>,
    pub cleaned_rows: usize,
    pub customers: usize,
    pub snapshot_date: NaiveDateTime,
    pub snapshot_offset_days: i64,
}

impl QualityReport {
    pub fn removed_rows(&self) -> usize {
        self.removed_by_rule.iter().map(|c| c.removed).sum()
    }

    pub fn removed_by(&self, rule: CleaningRule) -> usize {
        self.removed_by_rule
            .iter()
            .find(|c| c.rule == rule)
            .map_or(0, |c| c.removed)
    }
}

/// Output of [`clean_transactions`]
#[derive(Debug, Clone)]
pub struct CleaningOutcome {
    pub cleaned: Vec<CleanedTransaction>,
    pub removed_by_rule: Vec<RuleCount>,
}

/// Apply the cleaning rules in order and derive line totals for the survivors
pub fn clean_transactions(transactions: &[Transaction], config: &BuilderConfig) -> CleaningOutcome {
    let mut removed = [0usize; CLEANING_RULES.len()];
    let mut cleaned = Vec::with_capacity(transactions.len());

    for tx in transactions {
        match CLEANING_RULES.iter().position(|rule| rule.rejects(tx, config)) {
            Some(idx) => removed[idx] += 1,
            None => {
                if let Some(clean) = CleanedTransaction::from_transaction(tx) {
                    cleaned.push(clean);
                }
            }
        }
    }

    let removed_by_rule = CLEANING_RULES
        .iter()
        .zip(removed)
        .map(|(&rule, removed)| RuleCount { rule, removed })
        .collect();

    CleaningOutcome {
        cleaned,
        removed_by_rule,
    }
}

/// Latest transaction timestamp advanced by `offset_days`
pub fn snapshot_date(cleaned: &[CleanedTransaction], offset_days: i64) -> Option<NaiveDateTime> {
    cleaned
        .iter()
        .map(|t| t.invoice_date)
        .max()
        .map(|latest| latest + Duration::days(offset_days))
}

/// Aggregate cleaned transactions into one RFM row per customer
///
/// The snapshot date is taken as given; it must not precede the latest
/// transaction, otherwise recency could turn negative.
pub fn compute_rfm(cleaned: &[CleanedTransaction], snapshot_date: NaiveDateTime) -> Result<RfmTable> {
    if let Some(latest) = cleaned.iter().map(|t| t.invoice_date).max() {
        if snapshot_date < latest {
            return Err(Error::SnapshotBeforeLatest {
                snapshot: snapshot_date,
                latest,
            });
        }
    }

    struct Accumulator<'a> {
        last_purchase: NaiveDateTime,
        invoices: HashSet<&'a str>,
        monetary: f64,
        // (country, count), in first-seen order
        countries: Vec<(&'a str, usize)>,
    }

    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Accumulator> = HashMap::new();

    for tx in cleaned {
        let acc = groups.entry(tx.customer_id.as_str()).or_insert_with(|| {
            order.push(tx.customer_id.as_str());
            Accumulator {
                last_purchase: tx.invoice_date,
                invoices: HashSet::new(),
                monetary: 0.0,
                countries: Vec::new(),
            }
        });

        acc.last_purchase = acc.last_purchase.max(tx.invoice_date);
        acc.invoices.insert(tx.invoice_no.as_str());
        acc.monetary += tx.line_total;
        match acc.countries.iter_mut().find(|(c, _)| *c == tx.country) {
            Some((_, count)) => *count += 1,
            None => acc.countries.push((tx.country.as_str(), 1)),
        }
    }

    let mut rows: Vec<RfmRow> = order
        .into_iter()
        .filter_map(|customer_id| {
            let acc = groups.get(customer_id)?;
            Some(RfmRow {
                customer_id: customer_id.to_string(),
                recency: (snapshot_date - acc.last_purchase).num_days(),
                frequency: acc.invoices.len() as u32,
                monetary: acc.monetary,
                country: mode_first_seen(&acc.countries).to_string(),
            })
        })
        .collect();

    rows.sort_by(|a, b| compare_customer_ids(&a.customer_id, &b.customer_id));

    Ok(RfmTable {
        rows,
        snapshot_date,
    })
}

/// Clean transactions, fix the snapshot date and compute RFM rows
///
/// # Returns
/// * The RFM table, the quality report, and the cleaned transactions
pub fn build_rfm(
    transactions: &[Transaction],
    config: &BuilderConfig,
) -> Result<(RfmTable, QualityReport, Vec<CleanedTransaction>)> {
    config.validate()?;
    if transactions.is_empty() {
        return Err(Error::EmptyInput);
    }

    let missing = MissingFieldCounts::from_transactions(transactions);
    let cancellation_rows = transactions
        .iter()
        .filter(|tx| is_cancellation(tx, config))
        .count();

    let CleaningOutcome {
        cleaned,
        removed_by_rule,
    } = clean_transactions(transactions, config);

    for count in &removed_by_rule {
        debug!(rule = count.rule.name(), removed = count.removed, "cleaning rule applied");
    }

    let snapshot = snapshot_date(&cleaned, config.snapshot_offset_days).ok_or(
        Error::EmptyDataset {
            raw_rows: transactions.len(),
        },
    )?;
    let table = compute_rfm(&cleaned, snapshot)?;

    let report = QualityReport {
        raw_rows: transactions.len(),
        missing,
        cancellation_rows,
        removed_by_rule,
        cleaned_rows: cleaned.len(),
        customers: table.rows.len(),
        snapshot_date: snapshot,
        snapshot_offset_days: config.snapshot_offset_days,
    };

    info!(
        raw_rows = report.raw_rows,
        cleaned_rows = report.cleaned_rows,
        customers = report.customers,
        snapshot = %snapshot,
        "built RFM table"
    );

    Ok((table, report, cleaned))
}

fn mode_first_seen<'a>(counts: &[(&'a str, usize)]) -> &'a str {
    let mut best: Option<(&str, usize)> = None;
    for &(country, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((country, count));
        }
    }
    best.map_or(UNKNOWN_COUNTRY, |(country, _)| country)
}

/// Numeric order when both ids are numeric, lexical otherwise
pub fn compare_customer_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
