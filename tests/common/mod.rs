#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tabledef::sheet::SheetData;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace, creating parent
    /// directories, and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Builds a sheet from header rows and data rows. Missing header rows
/// (description, default) are filled with empty cells.
pub struct SheetBuilder {
    name: String,
    headers: Vec<String>,
    types: Vec<String>,
    descriptions: Vec<String>,
    defaults: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SheetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            headers: Vec::new(),
            types: Vec::new(),
            descriptions: Vec::new(),
            defaults: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, header: &str, declared_type: &str) -> Self {
        self.headers.push(header.to_string());
        self.types.push(declared_type.to_string());
        self.descriptions.push(String::new());
        self.defaults.push(String::new());
        self
    }

    pub fn column_with_default(mut self, header: &str, declared_type: &str, default: &str) -> Self {
        self = self.column(header, declared_type);
        if let Some(last) = self.defaults.last_mut() {
            *last = default.to_string();
        }
        self
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn build(self) -> SheetData {
        let mut rows = vec![self.headers, self.types, self.descriptions, self.defaults];
        rows.extend(self.rows);
        SheetData::new(self.name, rows)
    }
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Renders rows as CSV text, quoting cells that need it.
pub fn csv_text(rows: &[&[&str]]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&row.iter().map(|cell| quote(cell)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}
