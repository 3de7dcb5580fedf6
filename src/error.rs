//! Error taxonomy for the segmentation pipeline.

use chrono::NaiveDateTime;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building RFM features or segmenting customers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Input errors
    #[error("input is missing required columns: {} (found: {})", .missing.join(", "), .found.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("input contains no rows")]
    EmptyInput,

    #[error("unparseable timestamp {value:?} at row {row}")]
    UnparseableTimestamp { row: usize, value: String },

    #[error("invalid value {value:?} in column {column} at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    // Data-sufficiency errors
    #[error("empty dataset: none of the {raw_rows} input rows survived cleaning")]
    EmptyDataset { raw_rows: usize },

    #[error("insufficient customers: {customers} available but clustering needs at least {required}")]
    InsufficientCustomers { customers: usize, required: usize },

    #[error("snapshot date {snapshot} is earlier than the latest transaction {latest}")]
    SnapshotBeforeLatest {
        snapshot: NaiveDateTime,
        latest: NaiveDateTime,
    },

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid features: {0}")]
    InvalidFeatures(String),

    // Collaborators
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data frame error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("clustering failed: {0}")]
    Clustering(#[from] linfa_clustering::KMeansError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("plotting failed: {0}")]
    Plot(String),
}

impl Error {
    /// True for the data-sufficiency class of errors (not enough data to proceed).
    pub fn is_data_sufficiency(&self) -> bool {
        matches!(
            self,
            Error::EmptyDataset { .. } | Error::InsufficientCustomers { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_columns() {
        let err = Error::MissingColumns {
            missing: vec!["CustomerID".to_string(), "Country".to_string()],
            found: vec!["InvoiceNo".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("CustomerID, Country"));
        assert!(msg.contains("found: InvoiceNo"));
    }

    #[test]
    fn test_data_sufficiency_classification() {
        assert!(Error::EmptyDataset { raw_rows: 3 }.is_data_sufficiency());
        assert!(Error::InsufficientCustomers {
            customers: 1,
            required: 2
        }
        .is_data_sufficiency());
        assert!(!Error::EmptyInput.is_data_sufficiency());
    }
}
