//! Loading transaction and RFM tables with Polars, and writing the output tables

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::rfm::{CleanedTransaction, RfmRow, RfmTable, UNKNOWN_COUNTRY};
use crate::segment::ScoredCustomer;

/// Column names accepted for each transaction field, in lookup order
const TRANSACTION_COLUMNS: [(&str, &[&str]); 8] = [
    ("InvoiceNo", &["InvoiceNo", "Invoice", "InvoiceNo."]),
    ("StockCode", &["StockCode", "Stock Code"]),
    ("Description", &["Description"]),
    ("Quantity", &["Quantity", "Qty"]),
    ("InvoiceDate", &["InvoiceDate", "Invoice Date"]),
    ("UnitPrice", &["UnitPrice", "Price", "Unit Price"]),
    ("CustomerID", &["CustomerID", "Customer ID", "CustomerId"]),
    ("Country", &["Country"]),
];

/// Column names accepted for a previously written RFM table
const RFM_COLUMNS: [(&str, &[&str]); 4] = [
    ("customer_id", &["customer_id", "CustomerID", "Customer ID"]),
    ("recency_days", &["recency_days", "Recency", "RecencyDays"]),
    ("frequency_invoices", &["frequency_invoices", "Frequency", "Freq"]),
    ("monetary_value", &["monetary_value", "Monetary", "MonetaryValue"]),
];

const TIMESTAMP_FORMATS: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

/// A raw transaction record in normalized tabular form
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub invoice_no: Option<String>,
    pub stock_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub invoice_date: Option<NaiveDateTime>,
    pub unit_price: Option<f64>,
    pub customer_id: Option<String>,
    pub country: Option<String>,
}

/// Load a transaction CSV and normalize it into [`Transaction`] records
///
/// Column names are matched case-, space- and underscore-insensitively against
/// the aliases used by the common Online Retail II mirrors. A missing value
/// stays `None`; a timestamp that is present but unparseable is an input error.
pub fn load_transactions(path: impl AsRef<Path>) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    let df = read_csv(path)?;
    let columns = resolve_columns(&df, &TRANSACTION_COLUMNS)?;
    let column = |field: &'static str| actual_column(&columns, field);

    let invoice_no = string_column(&df, column("InvoiceNo"))?;
    let stock_code = string_column(&df, column("StockCode"))?;
    let description = string_column(&df, column("Description"))?;
    let quantity = float_column(&df, column("Quantity"))?;
    let invoice_date = string_column(&df, column("InvoiceDate"))?;
    let unit_price = float_column(&df, column("UnitPrice"))?;
    let customer_id = string_column(&df, column("CustomerID"))?;
    let country = string_column(&df, column("Country"))?;

    let mut transactions = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let invoice_date = match &invoice_date[row] {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| Error::UnparseableTimestamp {
                row: row + 1,
                value: raw.clone(),
            })?),
            None => None,
        };

        transactions.push(Transaction {
            invoice_no: invoice_no[row].clone(),
            stock_code: stock_code[row].clone(),
            description: description[row].clone(),
            quantity: quantity[row],
            invoice_date,
            unit_price: unit_price[row],
            customer_id: customer_id[row].as_deref().and_then(normalize_customer_id),
            country: country[row].clone(),
        });
    }

    info!(
        path = %path.display(),
        rows = transactions.len(),
        "loaded transactions"
    );
    Ok(transactions)
}

/// Load a previously written RFM table so it can be segmented again
pub fn load_rfm_table(path: impl AsRef<Path>) -> Result<Vec<RfmRow>> {
    let path = path.as_ref();
    let df = read_csv(path)?;
    let columns = resolve_columns(&df, &RFM_COLUMNS)?;
    let column = |field: &'static str| actual_column(&columns, field);

    let customer_id = string_column(&df, column("customer_id"))?;
    let recency = float_column(&df, column("recency_days"))?;
    let frequency = float_column(&df, column("frequency_invoices"))?;
    let monetary = float_column(&df, column("monetary_value"))?;
    let country = match find_column(&df, &["country", "Country"]) {
        Some(name) => string_column(&df, &name)?,
        None => vec![None; df.height()],
    };

    let mut rows = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let invalid = |column: &str, value: Option<f64>| Error::InvalidValue {
            column: column.to_string(),
            row: row + 1,
            value: value.map(|v| v.to_string()).unwrap_or_default(),
        };

        let customer_id = customer_id[row]
            .as_deref()
            .and_then(normalize_customer_id)
            .ok_or_else(|| Error::InvalidValue {
                column: "customer_id".to_string(),
                row: row + 1,
                value: String::new(),
            })?;
        let recency = recency[row]
            .filter(|r| *r >= 0.0 && r.fract() == 0.0)
            .ok_or_else(|| invalid("recency_days", recency[row]))?;
        let frequency = frequency[row]
            .filter(|f| *f >= 1.0 && f.fract() == 0.0)
            .ok_or_else(|| invalid("frequency_invoices", frequency[row]))?;
        let monetary = monetary[row]
            .filter(|m| *m > 0.0 && m.is_finite())
            .ok_or_else(|| invalid("monetary_value", monetary[row]))?;

        rows.push(RfmRow {
            customer_id,
            recency: recency as i64,
            frequency: frequency as u32,
            monetary,
            country: country[row].clone().unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
        });
    }

    info!(path = %path.display(), customers = rows.len(), "loaded RFM table");
    Ok(rows)
}

/// Write cleaned transactions with their derived line totals
pub fn write_clean_transactions(path: impl AsRef<Path>, cleaned: &[CleanedTransaction]) -> Result<()> {
    let mut df = df!(
        "InvoiceNo" => cleaned.iter().map(|t| t.invoice_no.as_str()).collect::<Vec<_>>(),
        "StockCode" => cleaned.iter().map(|t| t.stock_code.as_deref()).collect::<Vec<_>>(),
        "Description" => cleaned.iter().map(|t| t.description.as_deref()).collect::<Vec<_>>(),
        "Quantity" => cleaned.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        "InvoiceDate" => cleaned
            .iter()
            .map(|t| t.invoice_date.format("%Y-%m-%d %H:%M:%S").to_string())
            .collect::<Vec<_>>(),
        "UnitPrice" => cleaned.iter().map(|t| t.unit_price).collect::<Vec<_>>(),
        "CustomerID" => cleaned.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
        "Country" => cleaned.iter().map(|t| t.country.as_str()).collect::<Vec<_>>(),
        "LineTotal" => cleaned.iter().map(|t| t.line_total).collect::<Vec<_>>(),
    )?;
    write_csv(path.as_ref(), &mut df)
}

/// Write the customer-level RFM table
pub fn write_rfm_table(path: impl AsRef<Path>, table: &RfmTable) -> Result<()> {
    let rows = &table.rows;
    let mut df = df!(
        "customer_id" => rows.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
        "recency_days" => rows.iter().map(|r| r.recency).collect::<Vec<_>>(),
        "frequency_invoices" => rows.iter().map(|r| r.frequency as i64).collect::<Vec<_>>(),
        "monetary_value" => rows.iter().map(|r| r.monetary).collect::<Vec<_>>(),
        "country" => rows.iter().map(|r| r.country.as_str()).collect::<Vec<_>>(),
    )?;
    write_csv(path.as_ref(), &mut df)
}

/// Write the RFM table augmented with cluster ids and segment names
pub fn write_scored_table(path: impl AsRef<Path>, scored: &[ScoredCustomer]) -> Result<()> {
    let mut df = df!(
        "customer_id" => scored.iter().map(|s| s.rfm.customer_id.as_str()).collect::<Vec<_>>(),
        "recency_days" => scored.iter().map(|s| s.rfm.recency).collect::<Vec<_>>(),
        "frequency_invoices" => scored.iter().map(|s| s.rfm.frequency as i64).collect::<Vec<_>>(),
        "monetary_value" => scored.iter().map(|s| s.rfm.monetary).collect::<Vec<_>>(),
        "country" => scored.iter().map(|s| s.rfm.country.as_str()).collect::<Vec<_>>(),
        "cluster" => scored.iter().map(|s| s.cluster_id as i64).collect::<Vec<_>>(),
        "segment_name" => scored.iter().map(|s| s.segment_name.as_str()).collect::<Vec<_>>(),
    )?;
    write_csv(path.as_ref(), &mut df)
}

/// Parse an invoice timestamp in any of the accepted layouts
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Normalize a customer identifier; float-typed ids like `17850.0` become `17850`
pub fn normalize_customer_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains('.') {
        if let Ok(value) = raw.parse::<f64>() {
            if value.is_finite() && value.fract() == 0.0 {
                return Some(format!("{}", value as i64));
            }
        }
    }
    Some(raw.to_string())
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    if std::fs::metadata(path)?.len() == 0 {
        return Err(Error::EmptyInput);
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    if df.height() == 0 {
        return Err(Error::EmptyInput);
    }
    debug!(rows = df.height(), columns = df.width(), "read CSV");
    Ok(df)
}

fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    debug!(path = %path.display(), rows = df.height(), "wrote CSV");
    Ok(())
}

fn column_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '.'))
        .collect()
}

fn find_column(df: &DataFrame, candidates: &[&str]) -> Option<String> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    candidates.iter().find_map(|candidate| {
        let key = column_key(candidate);
        names.iter().find(|name| column_key(name) == key).cloned()
    })
}

/// Map each canonical field to the actual column name present in the frame
fn resolve_columns(
    df: &DataFrame,
    fields: &[(&str, &[&str])],
) -> Result<Vec<(String, String)>> {
    let mut resolved = Vec::with_capacity(fields.len());
    let mut missing = Vec::new();

    for (canonical, aliases) in fields {
        match find_column(df, aliases) {
            Some(actual) => resolved.push((canonical.to_string(), actual)),
            None => missing.push(canonical.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingColumns {
            missing,
            found: df
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
        });
    }
    Ok(resolved)
}

fn actual_column<'a>(columns: &'a [(String, String)], field: &'a str) -> &'a str {
    columns
        .iter()
        .find(|(canonical, _)| canonical == field)
        .map(|(_, actual)| actual.as_str())
        .unwrap_or(field)
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country").unwrap();
        writeln!(file, "536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,2010-12-01 08:26:00,2.55,17850,United Kingdom").unwrap();
        writeln!(file, "536366,22633,HAND WARMER UNION JACK,6,2010-12-01T08:28:00Z,1.85,,United Kingdom").unwrap();
        writeln!(file, "C536379,D,Discount,-1,12/1/2010 9:41,27.5,14527,United Kingdom").unwrap();
        file
    }

    #[test]
    fn test_load_transactions_with_aliased_columns() {
        let file = create_test_csv();
        let transactions = load_transactions(file.path()).unwrap();

        assert_eq!(transactions.len(), 3);
        assert_eq!(transactions[0].invoice_no.as_deref(), Some("536365"));
        assert_eq!(transactions[0].customer_id.as_deref(), Some("17850"));
        assert_eq!(transactions[0].unit_price, Some(2.55));
        assert_eq!(transactions[1].customer_id, None);
        assert_eq!(transactions[2].invoice_no.as_deref(), Some("C536379"));
        assert_eq!(transactions[2].quantity, Some(-1.0));
        assert_eq!(
            transactions[2].invoice_date,
            NaiveDate::from_ymd_opt(2010, 12, 1).unwrap().and_hms_opt(9, 41, 0)
        );
    }

    #[test]
    fn test_missing_columns_are_reported() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,Quantity,InvoiceDate").unwrap();
        writeln!(file, "1,2,2011-01-01 10:00:00").unwrap();

        let err = load_transactions(file.path()).unwrap_err();
        match err {
            Error::MissingColumns { missing, found } => {
                assert!(missing.contains(&"CustomerID".to_string()));
                assert!(missing.contains(&"UnitPrice".to_string()));
                assert_eq!(found.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(load_transactions(file.path()), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_unparseable_timestamp_fails_fast() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country").unwrap();
        writeln!(file, "1,A,Item,2,2011-01-01 10:00:00,1.5,100,France").unwrap();
        writeln!(file, "2,A,Item,2,yesterday,1.5,100,France").unwrap();

        match load_transactions(file.path()) {
            Err(Error::UnparseableTimestamp { row, value }) => {
                assert_eq!(row, 2);
                assert_eq!(value, "yesterday");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2011, 12, 9)
            .unwrap()
            .and_hms_opt(12, 50, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2011-12-09 12:50:00"), Some(expected));
        assert_eq!(parse_timestamp("2011-12-09T12:50:00"), Some(expected));
        assert_eq!(parse_timestamp("2011-12-09T12:50:00Z"), Some(expected));
        assert_eq!(parse_timestamp("12/9/2011 12:50"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_normalize_customer_id() {
        assert_eq!(normalize_customer_id("17850.0").as_deref(), Some("17850"));
        assert_eq!(normalize_customer_id(" 17850 ").as_deref(), Some("17850"));
        assert_eq!(normalize_customer_id("A-42").as_deref(), Some("A-42"));
        assert_eq!(normalize_customer_id("   "), None);
    }

    #[test]
    fn test_load_rfm_table_with_legacy_names() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Recency,Frequency,Monetary").unwrap();
        writeln!(file, "12346,326,1,77183.6").unwrap();
        writeln!(file, "12347,2,7,4310.0").unwrap();

        let rows = load_rfm_table(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].customer_id, "12346");
        assert_eq!(rows[0].recency, 326);
        assert_eq!(rows[1].frequency, 7);
        assert_eq!(rows[1].country, "Unknown");
    }

    #[test]
    fn test_load_rfm_table_rejects_non_positive_monetary() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,recency_days,frequency_invoices,monetary_value").unwrap();
        writeln!(file, "1,3,1,0.0").unwrap();

        assert!(matches!(
            load_rfm_table(file.path()),
            Err(Error::InvalidValue { .. })
        ));
    }
}
