use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ColumnType, FillMethod, OperationKind, SessionId};

pub const DEFAULT_DROP_THRESHOLD: f64 = 0.5;

/// Point-in-time description of a table. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub row_count: u64,
    pub column_count: u64,
    pub missing_value_count: u64,
    pub duplicate_row_count: u64,
    pub column_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_types: Vec<ColumnType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_per_column: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("summary lists {names} column names for {columns} columns")]
    ColumnNameCount { names: usize, columns: u64 },
    #[error("summary lists {types} column types for {columns} columns")]
    ColumnTypeCount { types: usize, columns: u64 },
    #[error("summary lists {counts} per-column missing counts for {columns} columns")]
    MissingCountLength { counts: usize, columns: u64 },
    #[error("per-column missing counts add up to {sum}, total says {total}")]
    MissingTotalMismatch { sum: u64, total: u64 },
    #[error("{missing} missing values do not fit in {rows}x{columns} cells")]
    MissingExceedsCells { missing: u64, rows: u64, columns: u64 },
    #[error("{duplicates} duplicate rows reported for {rows} rows")]
    DuplicatesExceedRows { duplicates: u64, rows: u64 },
}

impl DatasetSummary {
    pub fn validate(&self) -> Result<(), SummaryError> {
        let columns = self.column_count;
        if self.column_names.len() as u64 != columns {
            return Err(SummaryError::ColumnNameCount {
                names: self.column_names.len(),
                columns,
            });
        }
        if !self.column_types.is_empty() && self.column_types.len() as u64 != columns {
            return Err(SummaryError::ColumnTypeCount {
                types: self.column_types.len(),
                columns,
            });
        }
        if !self.missing_per_column.is_empty() {
            if self.missing_per_column.len() as u64 != columns {
                return Err(SummaryError::MissingCountLength {
                    counts: self.missing_per_column.len(),
                    columns,
                });
            }
            let sum = self.missing_per_column.iter().sum::<u64>();
            if sum != self.missing_value_count {
                return Err(SummaryError::MissingTotalMismatch {
                    sum,
                    total: self.missing_value_count,
                });
            }
        }
        let cells = self.row_count.saturating_mul(columns);
        if self.missing_value_count > cells {
            return Err(SummaryError::MissingExceedsCells {
                missing: self.missing_value_count,
                rows: self.row_count,
                columns,
            });
        }
        // The first occurrence of a row is never counted as a duplicate.
        let duplicate_ceiling = self.row_count.saturating_sub(1);
        if self.duplicate_row_count > duplicate_ceiling {
            return Err(SummaryError::DuplicatesExceedRows {
                duplicates: self.duplicate_row_count,
                rows: self.row_count,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("operation {0} does not take a method")]
    UnexpectedMethod(OperationKind),
    #[error("operation {0} does not take a threshold")]
    UnexpectedThreshold(OperationKind),
    #[error("unsupported fill method '{0}' (expected mean, median, mode or zero)")]
    UnknownMethod(String),
    #[error("threshold {0} must be between 0 and 1")]
    ThresholdOutOfRange(f64),
}

/// A request to mutate the active session's dataset. Parameters that are not
/// set are left off the wire entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl OperationRequest {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            method: None,
            threshold: None,
        }
    }

    pub fn fill_missing(method: FillMethod) -> Self {
        Self::new(OperationKind::FillMissing).with_method(method.as_str())
    }

    pub fn drop_high_missing_columns(threshold: f64) -> Self {
        Self::new(OperationKind::DropHighMissingColumns).with_threshold(threshold)
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Checks parameter applicability and ranges without touching any data.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.method.is_some() && !self.operation.accepts_method() {
            return Err(RequestError::UnexpectedMethod(self.operation));
        }
        if self.threshold.is_some() && !self.operation.accepts_threshold() {
            return Err(RequestError::UnexpectedThreshold(self.operation));
        }
        self.fill_method()?;
        self.drop_threshold()?;
        Ok(())
    }

    /// The requested fill method, defaulting to mean when none was given.
    pub fn fill_method(&self) -> Result<FillMethod, RequestError> {
        match self.method.as_deref() {
            None => Ok(FillMethod::default()),
            Some(raw) => raw
                .parse()
                .map_err(|_| RequestError::UnknownMethod(raw.to_string())),
        }
    }

    /// The requested missing-ratio cutoff, defaulting to 0.5 when none was given.
    pub fn drop_threshold(&self) -> Result<f64, RequestError> {
        match self.threshold {
            None => Ok(DEFAULT_DROP_THRESHOLD),
            Some(t) if t.is_finite() && (0.0..=1.0).contains(&t) => Ok(t),
            Some(t) => Err(RequestError::ThresholdOutOfRange(t)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_kind: OperationKind,
    pub operation: String,
    pub description: String,
    pub before_summary: DatasetSummary,
    pub after_summary: DatasetSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: SessionId,
    pub summary: DatasetSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub summary: DatasetSummary,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: DatasetSummary,
}

/// Switches for the one-shot cleaning pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanOptions {
    #[serde(default)]
    pub remove_duplicates: bool,
    #[serde(default)]
    pub fill_missing: bool,
    #[serde(default)]
    pub detect_outliers: bool,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
