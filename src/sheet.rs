//! In-memory grid of one source table.
//!
//! Row layout: `0` header cells (`name@tags`), `1` type declarations,
//! `2` descriptions, `3` default values, `4..` data rows.

use serde::{Deserialize, Serialize};

pub const NAME_ROW: usize = 0;
pub const TYPE_ROW: usize = 1;
pub const DESCRIPTION_ROW: usize = 2;
pub const DEFAULT_ROW: usize = 3;
pub const HEADER_ROWS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetData {
    pub name: String,
    rows: Vec<Vec<String>>,
}

impl SheetData {
    /// Builds a sheet, padding short rows to the header width.
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or_default();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn from_str_rows(name: impl Into<String>, rows: &[&[&str]]) -> Self {
        Self::new(
            name,
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        )
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or_default()
    }

    pub fn has_header_rows(&self) -> bool {
        self.rows.len() >= HEADER_ROWS
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }

    pub fn header_row(&self, row: usize) -> &[String] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Data rows paired with their absolute row index.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .skip(HEADER_ROWS)
            .map(|(idx, row)| (idx, row.as_slice()))
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(HEADER_ROWS)
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = (usize, &str)> {
        self.data_rows()
            .map(move |(idx, row)| (idx, row.get(column).map(String::as_str).unwrap_or("")))
    }

    /// Removes leading/trailing whitespace from every cell.
    pub fn trim_cells(&mut self) -> usize {
        let mut changed = 0;
        for cell in self.rows.iter_mut().flatten() {
            let trimmed = cell.trim();
            if trimmed.len() != cell.len() {
                *cell = trimmed.to_string();
                changed += 1;
            }
        }
        changed
    }

    /// Drops data rows whose cells are all empty.
    pub fn drop_blank_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut index = 0usize;
        self.rows.retain(|row| {
            let keep = index < HEADER_ROWS || row.iter().any(|c| !c.trim().is_empty());
            index += 1;
            keep
        });
        before - self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pads_short_rows() {
        let sheet = SheetData::from_str_rows("T", &[&["Id", "Name"], &["int"]]);
        assert_eq!(sheet.column_count(), 2);
        assert_eq!(sheet.cell(1, 1), "");
        assert!(!sheet.has_header_rows());
    }

    #[test]
    fn drop_blank_rows_keeps_header_block() {
        let mut sheet = SheetData::from_str_rows(
            "T",
            &[&["Id"], &[""], &[""], &[""], &["1"], &[" "], &["2"]],
        );
        assert_eq!(sheet.drop_blank_rows(), 1);
        assert_eq!(sheet.row_count(), 6);
        assert_eq!(sheet.data_row_count(), 2);
    }
}
