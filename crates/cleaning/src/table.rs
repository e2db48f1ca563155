//! Column-major in-memory table with pandas-like type inference.

use std::collections::HashSet;

use shared::{domain::ColumnType, protocol::DatasetSummary};

/// Tokens read as missing values, matching pandas' default `na_values`.
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Missing | Cell::Text(_) => None,
        }
    }

    fn key(&self) -> CellKey<'_> {
        match self {
            Cell::Missing => CellKey::Missing,
            Cell::Int(v) => CellKey::Int(*v),
            // -0.0 and 0.0 compare equal, so they must hash equal.
            Cell::Float(v) if *v == 0.0 => CellKey::Float(0.0f64.to_bits()),
            Cell::Float(v) => CellKey::Float(v.to_bits()),
            Cell::Text(v) => CellKey::Text(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CellKey<'a> {
    Missing,
    Int(i64),
    Float(u64),
    Text(&'a str),
}

/// NA tokens, plus any spelling the float parser reads as NaN (`NAN`, `+nan`).
pub fn is_missing_token(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw) || raw.trim().parse::<f64>().is_ok_and(f64::is_nan)
}

pub(crate) fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

pub(crate) fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
    pub cells: Vec<Cell>,
}

impl Column {
    /// Builds a column from raw text, picking the narrowest type every
    /// non-missing value fits.
    pub fn from_raw(name: impl Into<String>, raw: &[String]) -> Self {
        let present = raw.iter().filter(|v| !is_missing_token(v));
        let has_missing = raw.iter().any(|v| is_missing_token(v));
        let mut all_int = true;
        let mut all_float = true;
        for value in present {
            if all_int && parse_int(value).is_none() {
                all_int = false;
            }
            if parse_float(value).is_none() {
                all_float = false;
                break;
            }
        }

        let kind = if all_float && all_int && !has_missing && !raw.is_empty() {
            ColumnType::Integer
        } else if all_float {
            ColumnType::Float
        } else {
            ColumnType::Text
        };

        let cells = raw
            .iter()
            .map(|value| {
                if is_missing_token(value) {
                    return Cell::Missing;
                }
                match kind {
                    ColumnType::Integer => parse_int(value).map_or(Cell::Missing, Cell::Int),
                    ColumnType::Float => parse_float(value).map_or(Cell::Missing, Cell::Float),
                    ColumnType::Text => Cell::Text(value.clone()),
                }
            })
            .collect();

        Self {
            name: name.into(),
            kind,
            cells,
        }
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_missing()).count()
    }

    pub fn numeric_values(&self) -> Vec<f64> {
        self.cells.iter().filter_map(Cell::as_f64).collect()
    }

    /// Rewrites every cell as a float, keeping missing cells missing.
    pub fn widen_to_float(&mut self) {
        for cell in &mut self.cells {
            if let Cell::Int(v) = cell {
                *cell = Cell::Float(*v as f64);
            }
        }
        self.kind = ColumnType::Float;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>, row_count: usize) -> Self {
        debug_assert!(columns.iter().all(|c| c.cells.len() == row_count));
        Self { columns, row_count }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn missing_count(&self) -> usize {
        self.columns.iter().map(Column::missing_count).sum()
    }

    /// Marks every row that repeats an earlier row.
    pub fn duplicate_mask(&self) -> Vec<bool> {
        if self.columns.is_empty() {
            return vec![false; self.row_count];
        }
        let mut seen = HashSet::with_capacity(self.row_count);
        (0..self.row_count)
            .map(|row| {
                let key: Vec<CellKey<'_>> =
                    self.columns.iter().map(|c| c.cells[row].key()).collect();
                !seen.insert(key)
            })
            .collect()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicate_mask().into_iter().filter(|dup| *dup).count()
    }

    /// Keeps only the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column
                .cells
                .retain(|_| flags.next().copied().unwrap_or(true));
        }
        self.row_count = keep.iter().filter(|k| **k).count();
    }

    /// Removes the columns at `indices`, returning their names in table order.
    pub fn drop_columns(&mut self, indices: &[usize]) -> Vec<String> {
        let mut dropped = Vec::new();
        let mut idx = 0;
        self.columns.retain(|column| {
            let keep = !indices.contains(&idx);
            idx += 1;
            if !keep {
                dropped.push(column.name.clone());
            }
            keep
        });
        dropped
    }

    pub fn summary(&self) -> DatasetSummary {
        let missing_per_column: Vec<u64> = self
            .columns
            .iter()
            .map(|c| c.missing_count() as u64)
            .collect();
        DatasetSummary {
            row_count: self.row_count as u64,
            column_count: self.columns.len() as u64,
            missing_value_count: missing_per_column.iter().sum(),
            duplicate_row_count: self.duplicate_count() as u64,
            column_names: self.columns.iter().map(|c| c.name.clone()).collect(),
            column_types: self.columns.iter().map(|c| c.kind).collect(),
            missing_per_column,
        }
    }
}
