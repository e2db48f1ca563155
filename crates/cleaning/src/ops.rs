use std::{cmp::Ordering, collections::HashMap, sync::LazyLock};

use regex::Regex;
use shared::{
    domain::{ColumnType, FillMethod, OperationKind},
    protocol::{CleanOptions, OperationRequest},
};
use tracing::debug;

use crate::{
    table::{parse_float, parse_int, Cell, Table},
    CleaningError,
};

static SPECIAL_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.,!?-]").expect("static pattern compiles"));

const UNKNOWN_CATEGORY: &str = "Unknown";

/// What an operation did, in words meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOperation {
    pub label: String,
    pub description: String,
}

/// Runs one named operation against `table` in place.
///
/// The request is validated before any cell is touched, so an error leaves the
/// table as it was. Callers that need all-or-nothing semantics across a
/// failing operation should still run this on a copy.
pub fn apply_operation(
    table: &mut Table,
    request: &OperationRequest,
) -> Result<AppliedOperation, CleaningError> {
    request.validate()?;
    let applied = match request.operation {
        OperationKind::RemoveDuplicates => remove_duplicates(table),
        OperationKind::FillMissing => fill_missing(table, request.fill_method()?),
        OperationKind::DropHighMissingColumns => {
            drop_high_missing_columns(table, request.drop_threshold()?)
        }
        OperationKind::StripSpecialCharacters => strip_special_characters(table),
        OperationKind::ConvertTypes => convert_types(table),
    };
    debug!(
        operation = %request.operation,
        rows = table.row_count(),
        columns = table.columns().len(),
        "cleaning: applied operation"
    );
    Ok(applied)
}

/// The one-shot pipeline: duplicates, then mean imputation, then IQR clipping.
pub fn clean_pipeline(table: &mut Table, options: CleanOptions) -> Vec<AppliedOperation> {
    let mut applied = Vec::new();
    if options.remove_duplicates {
        applied.push(remove_duplicates(table));
    }
    if options.fill_missing {
        applied.push(fill_missing(table, FillMethod::Mean));
    }
    if options.detect_outliers {
        applied.push(clip_outliers(table));
    }
    applied
}

pub fn remove_duplicates(table: &mut Table) -> AppliedOperation {
    let mask = table.duplicate_mask();
    let removed = mask.iter().filter(|dup| **dup).count();
    let keep: Vec<bool> = mask.into_iter().map(|dup| !dup).collect();
    table.retain_rows(&keep);
    AppliedOperation {
        label: "Remove Duplicates".to_string(),
        description: format!("Removed {removed} duplicate rows"),
    }
}

pub fn fill_missing(table: &mut Table, method: FillMethod) -> AppliedOperation {
    for column in table.columns_mut() {
        if column.missing_count() == 0 {
            continue;
        }
        match column.kind {
            ColumnType::Integer | ColumnType::Float => {
                let values = column.numeric_values();
                let fill = match method {
                    FillMethod::Mean => mean(&values),
                    FillMethod::Median => median(&values),
                    FillMethod::Mode => Some(numeric_mode(&values).unwrap_or(0.0)),
                    FillMethod::Zero => Some(0.0),
                };
                let Some(fill) = fill else {
                    continue;
                };
                column.widen_to_float();
                for cell in &mut column.cells {
                    if cell.is_missing() {
                        *cell = Cell::Float(fill);
                    }
                }
            }
            ColumnType::Text => {
                let fill = text_mode(&column.cells).unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
                for cell in &mut column.cells {
                    if cell.is_missing() {
                        *cell = Cell::Text(fill.clone());
                    }
                }
            }
        }
    }
    AppliedOperation {
        label: format!("Fill Missing Values ({method})"),
        description: format!(
            "Filled missing values using {method} method for numeric columns and mode for categorical columns"
        ),
    }
}

/// Drops columns whose missing ratio is strictly above `threshold`. Dropping
/// nothing is still a successful operation.
pub fn drop_high_missing_columns(table: &mut Table, threshold: f64) -> AppliedOperation {
    let label = format!("Drop High Missing Columns (>{:?}%)", threshold * 100.0);
    let rows = table.row_count();
    let doomed: Vec<usize> = if rows == 0 {
        Vec::new()
    } else {
        table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.missing_count() as f64 / rows as f64 > threshold)
            .map(|(idx, _)| idx)
            .collect()
    };

    if doomed.is_empty() {
        return AppliedOperation {
            label,
            description: "No columns met the threshold for removal".to_string(),
        };
    }

    let dropped = table.drop_columns(&doomed);
    AppliedOperation {
        label,
        description: format!("Dropped {} columns: {}", dropped.len(), dropped.join(", ")),
    }
}

pub fn strip_special_characters(table: &mut Table) -> AppliedOperation {
    for column in table.columns_mut() {
        if column.kind != ColumnType::Text {
            continue;
        }
        for cell in &mut column.cells {
            if let Cell::Text(value) = cell {
                if SPECIAL_CHARACTERS.is_match(value) {
                    *value = SPECIAL_CHARACTERS.replace_all(value, "").into_owned();
                }
            }
        }
    }
    AppliedOperation {
        label: "Remove Special Characters".to_string(),
        description: "Removed special characters from string columns while preserving alphanumeric characters, spaces, and common punctuation".to_string(),
    }
}

pub fn convert_types(table: &mut Table) -> AppliedOperation {
    for column in table.columns_mut() {
        if column.kind == ColumnType::Text {
            let numeric = column.cells.iter().all(|cell| match cell {
                Cell::Text(v) => parse_float(v).is_some(),
                _ => true,
            });
            if numeric {
                let exact_ints = column.missing_count() == 0
                    && column.cells.iter().all(|cell| match cell {
                        Cell::Text(v) => parse_int(v).is_some(),
                        _ => false,
                    });
                column.cells = column
                    .cells
                    .iter()
                    .map(|cell| match cell {
                        Cell::Text(v) if exact_ints => parse_int(v).map_or(Cell::Missing, Cell::Int),
                        Cell::Text(v) => parse_float(v).map_or(Cell::Missing, Cell::Float),
                        other => other.clone(),
                    })
                    .collect();
                column.kind = if exact_ints && !column.cells.is_empty() {
                    ColumnType::Integer
                } else {
                    ColumnType::Float
                };
            }
        }

        if column.kind == ColumnType::Float && column.missing_count() == 0 {
            let integral: Option<Vec<i64>> = column
                .cells
                .iter()
                .map(|cell| match cell {
                    Cell::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Some(*v as i64),
                    _ => None,
                })
                .collect();
            if let Some(values) = integral.filter(|values| !values.is_empty()) {
                column.cells = values.into_iter().map(Cell::Int).collect();
                column.kind = ColumnType::Integer;
            }
        }
    }
    AppliedOperation {
        label: "Convert Data Types".to_string(),
        description: "Automatically converted data types for better performance and memory usage"
            .to_string(),
    }
}

/// Clips numeric columns to `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`.
pub fn clip_outliers(table: &mut Table) -> AppliedOperation {
    let mut clipped_total = 0usize;
    for column in table.columns_mut() {
        if !column.kind.is_numeric() {
            continue;
        }
        let mut values = column.numeric_values();
        if values.is_empty() {
            continue;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let q1 = quantile_sorted(&values, 0.25);
        let q3 = quantile_sorted(&values, 0.75);
        let iqr = q3 - q1;
        let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

        let needs_float = column.kind == ColumnType::Integer
            && column.cells.iter().any(|cell| {
                cell.as_f64()
                    .is_some_and(|v| (v < lower && lower.fract() != 0.0) || (v > upper && upper.fract() != 0.0))
            });
        if needs_float {
            column.widen_to_float();
        }

        for cell in &mut column.cells {
            match cell {
                Cell::Int(v) => {
                    let x = *v as f64;
                    if x < lower {
                        *v = lower as i64;
                        clipped_total += 1;
                    } else if x > upper {
                        *v = upper as i64;
                        clipped_total += 1;
                    }
                }
                Cell::Float(v) => {
                    if *v < lower {
                        *v = lower;
                        clipped_total += 1;
                    } else if *v > upper {
                        *v = upper;
                        clipped_total += 1;
                    }
                }
                Cell::Missing | Cell::Text(_) => {}
            }
        }
    }
    AppliedOperation {
        label: "Clip Outliers".to_string(),
        description: format!("Clipped {clipped_total} values outside 1.5x the interquartile range"),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(quantile_sorted(&sorted, 0.5))
}

/// Linear interpolation between closest ranks.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Most frequent value; ties go to the smallest.
fn numeric_mode(values: &[f64]) -> Option<f64> {
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for v in values {
        let key = if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
        counts.entry(key).or_insert((*v, 0)).1 += 1;
    }
    counts
        .into_values()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.partial_cmp(a).unwrap_or(Ordering::Equal)))
        .map(|(v, _)| v)
}

fn text_mode(cells: &[Cell]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for cell in cells {
        if let Cell::Text(v) = cell {
            *counts.entry(v.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
        .map(|(v, _)| v.to_string())
}
