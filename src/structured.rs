//! Array, 2-D array and map cell parsing.
//!
//! Cell syntax:
//!
//! - arrays: `1,2,3`
//! - 2-D arrays: `1,2,3;4,5,6` (`;` separates rows, rows may be ragged)
//! - maps / key-value pairs: `hp:10,mp:5` (pairs separated by `,` or `;`,
//!   key and value by `:` or `=`)
//!
//! Each element is checked against its declared type. Bad elements are
//! reported per cell and never stop processing of other cells. The
//! normalized text replaces the original cell.

use std::collections::BTreeSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    data::{parse_scalar, split_elements, split_entries, split_pair, split_rows},
    schema::FieldDefinition,
    sheet::SheetData,
    types::{BaseType, FieldType},
};

/// Error found in one cell of the working table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub field: String,
    pub row: usize,
    pub column: usize,
    pub value: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellOutcome {
    pub normalized: String,
    pub widths: Vec<usize>,
    pub errors: Vec<String>,
}

impl CellOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn check_element(element: &str, base: BaseType, errors: &mut Vec<String>) {
    if let Err(err) = parse_scalar(element, base) {
        errors.push(format!("Invalid element '{element}': {err}"));
    }
}

pub fn parse_scalar_cell(text: &str, base: BaseType) -> CellOutcome {
    let trimmed = text.trim();
    let mut errors = Vec::new();
    if !trimmed.is_empty() {
        check_element(trimmed, base, &mut errors);
    }
    CellOutcome {
        normalized: trimmed.to_string(),
        widths: Vec::new(),
        errors,
    }
}

pub fn parse_array_cell(text: &str, base: BaseType) -> CellOutcome {
    let mut errors = Vec::new();
    let elements = split_elements(text).collect::<Vec<_>>();
    for element in &elements {
        check_element(element, base, &mut errors);
    }
    CellOutcome {
        normalized: elements.join(","),
        widths: vec![elements.len()],
        errors,
    }
}

pub fn parse_2d_array_cell(text: &str, base: BaseType) -> CellOutcome {
    let mut errors = Vec::new();
    let mut widths = Vec::new();
    let rows = split_rows(text)
        .map(|row| {
            let elements = split_elements(row).collect::<Vec<_>>();
            for element in &elements {
                check_element(element, base, &mut errors);
            }
            widths.push(elements.len());
            elements.join(",")
        })
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>();
    widths.retain(|w| *w > 0);
    CellOutcome {
        normalized: rows.join(";"),
        widths,
        errors,
    }
}

pub fn parse_map_cell(
    text: &str,
    key: BaseType,
    value: BaseType,
    allow_duplicate_keys: bool,
) -> CellOutcome {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    let entries = split_entries(text)
        .map(|entry| match split_pair(entry) {
            Some((k, v)) => {
                check_element(k, key, &mut errors);
                check_element(v, value, &mut errors);
                if !allow_duplicate_keys && !seen.insert(k.to_string()) {
                    errors.push(format!("Duplicate map key '{k}'"));
                }
                format!("{k}:{v}")
            }
            None => {
                errors.push(format!("Entry '{entry}' is missing a key separator"));
                entry.to_string()
            }
        })
        .collect::<Vec<_>>();
    CellOutcome {
        widths: vec![entries.len()],
        normalized: entries.into_iter().join(","),
        errors,
    }
}

pub fn parse_structured_cell(text: &str, field_type: &FieldType) -> CellOutcome {
    match *field_type {
        FieldType::Scalar(base) => parse_scalar_cell(text, base),
        FieldType::Array(base) => parse_array_cell(text, base),
        FieldType::Array2D(base) => parse_2d_array_cell(text, base),
        FieldType::Map { key, value } => parse_map_cell(text, key, value, false),
        FieldType::KeyValuePairs { key, value } => parse_map_cell(text, key, value, true),
    }
}

/// Normalizes every data cell of `field` in place, applying the column
/// default to empty cells and recording shape statistics.
pub fn normalize_field(field: &mut FieldDefinition, sheet: &mut SheetData) -> Vec<CellError> {
    let mut cell_errors = Vec::new();
    let rows = sheet
        .column_values(field.column)
        .map(|(row, value)| (row, value.to_string()))
        .collect::<Vec<_>>();
    for (row, raw) in rows {
        let source = match (&field.default_value, raw.trim().is_empty()) {
            (Some(default), true) => default.clone(),
            _ => raw,
        };
        let outcome = parse_structured_cell(&source, &field.field_type);
        let valid = outcome.is_valid();
        if let Some(stats) = field.stats_mut() {
            stats.record(valid, &outcome.widths);
        }
        cell_errors.extend(outcome.errors.into_iter().map(|message| CellError {
            field: field.name.clone(),
            row,
            column: field.column,
            value: source.clone(),
            message,
        }));
        sheet.set_cell(row, field.column, outcome.normalized);
    }
    cell_errors
}
