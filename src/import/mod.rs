//! Bulk import of CSV/JSON files into the backend.
//!
//! A batch is parsed up front; a file that cannot be read or parsed aborts
//! with a single [`ImportError`] before any remote call is made. After that
//! every row is checked and submitted on its own, and a bad row only costs
//! that row.
//!
//! Rows are processed strictly one after another in file order. Error
//! messages are attributed by the row's position in the file, so submitting
//! rows concurrently would need a different way of tagging failures.

mod attendance;
mod source;
mod users;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::api::{ApiError, CollegeApi};

pub use attendance::AttendanceImporter;
pub use source::{parse_rows, read_rows, FileFormat};
pub use users::UserImporter;

/// Failure that aborts the whole batch.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    #[error("Invalid CSV format: {0}")]
    InvalidCsv(#[from] csv::Error),
}

/// Failure of a single row. Recorded and skipped, never propagated.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("Missing required fields ({})", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Invalid subject columns at {0}")]
    InvalidSubjectColumns(String),
    #[error("Invalid numbers for {0}")]
    InvalidNumbers(String),
    #[error("Invalid number for {0}")]
    InvalidNumber(String),
    #[error("User with USN {0} not found")]
    UserNotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// One record of an import file, columns in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub index: usize,
    fields: Vec<(String, String)>,
}

impl ImportRow {
    pub fn new(index: usize, fields: Vec<(String, String)>) -> Self {
        ImportRow { index, fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `column`, or `None` when absent or blank.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|column| self.value(column).is_none())
            .collect()
    }
}

/// Aggregate result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<String>,
}

impl ImportOutcome {
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, index: usize, reason: &RowError) {
        self.failure_count += 1;
        self.errors.push(format!("Row {index}: {reason}"));
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.success_count, self.failure_count
        )
    }
}

/// Role-specific handling of a row once its required columns are present.
#[async_trait]
pub trait RowImporter: Send + Sync {
    fn name(&self) -> &str;

    fn required_columns(&self) -> &[&'static str];

    /// Validate the rest of the row, resolve references and submit it.
    /// Exactly one creation call is made for a row that gets that far.
    async fn submit(&self, api: &dyn CollegeApi, row: &ImportRow) -> Result<(), RowError>;
}

pub async fn import_rows(
    importer: &dyn RowImporter,
    api: &dyn CollegeApi,
    rows: &[ImportRow],
) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();

    for row in rows {
        let missing = row.missing(importer.required_columns());
        let result = if missing.is_empty() {
            importer.submit(api, row).await
        } else {
            Err(RowError::MissingFields(
                missing.into_iter().map(String::from).collect(),
            ))
        };

        match result {
            Ok(()) => outcome.record_success(),
            Err(e) => {
                warn!("{} import, row {} failed: {}", importer.name(), row.index, e);
                outcome.record_failure(row.index, &e);
            }
        }
    }

    info!("{} import finished: {}", importer.name(), outcome);
    outcome
}

pub async fn import_file(
    importer: &dyn RowImporter,
    api: &dyn CollegeApi,
    path: &Path,
) -> Result<ImportOutcome, ImportError> {
    let rows = read_rows(path).await.map_err(|e| {
        error!("{} import aborted: {}", importer.name(), e);
        e
    })?;
    info!("Importing {} rows from {}", rows.len(), path.display());
    Ok(import_rows(importer, api, &rows).await)
}
