use std::collections::{HashMap, HashSet};

use crate::{
    table::{Cell, Column, Table},
    CleaningError,
};

/// Parses CSV bytes with a header row into a typed table.
pub fn read_csv(bytes: &[u8]) -> Result<Table, CleaningError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| CleaningError::Parse(e.to_string()))?
        .clone();
    if headers.is_empty() || (headers.len() == 1 && headers[0].trim().is_empty()) {
        return Err(CleaningError::EmptyInput);
    }

    let names = dedupe_headers(headers.iter());
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    for (row_no, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CleaningError::Parse(format!("row {}: {e}", row_no + 1)))?;
        for (idx, value) in record.iter().enumerate() {
            raw[idx].push(value.to_string());
        }
    }

    let row_count = raw.first().map_or(0, Vec::len);
    let columns = names
        .into_iter()
        .zip(raw.iter())
        .map(|(name, values)| Column::from_raw(name, values))
        .collect();
    Ok(Table::new(columns, row_count))
}

/// Serializes the table back to CSV. Missing cells are written empty.
pub fn write_csv(table: &Table) -> Result<Vec<u8>, CleaningError> {
    if table.columns().is_empty() {
        return Ok(Vec::new());
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.columns().iter().map(|c| c.name.as_str()))
        .map_err(|e| CleaningError::Encode(e.to_string()))?;
    for row in 0..table.row_count() {
        let record = table
            .columns()
            .iter()
            .map(|column| format_cell(&column.cells[row]));
        writer
            .write_record(record)
            .map_err(|e| CleaningError::Encode(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| CleaningError::Encode(e.to_string()))
}

pub fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Missing => String::new(),
        Cell::Int(v) => v.to_string(),
        Cell::Float(v) => format_float(*v),
        Cell::Text(v) => v.clone(),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Blank headers become `Unnamed: N` and repeats get the first free `.N`
/// suffix, so every resulting name is unique.
fn dedupe_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let headers: Vec<String> = headers
        .enumerate()
        .map(|(idx, raw)| {
            if raw.trim().is_empty() {
                format!("Unnamed: {idx}")
            } else {
                raw.to_string()
            }
        })
        .collect();
    let mut used: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(headers.len());
    for base in headers {
        let name = if used.contains(&base) {
            let suffix = next_suffix.entry(base.clone()).or_insert(1);
            let mut candidate = format!("{base}.{suffix}");
            while used.contains(&candidate) {
                *suffix += 1;
                candidate = format!("{base}.{suffix}");
            }
            *suffix += 1;
            candidate
        } else {
            base
        };
        used.insert(name.clone());
        names.push(name);
    }
    names
}
