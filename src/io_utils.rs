//! Table file loading and artifact writing.
//!
//! All file I/O flows through this module:
//!
//! - **Delimiter resolution**: `.tsv` reads tab-separated, everything else
//!   comma-separated.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Discovery**: directories given as inputs expand to their table files.
//! - **Artifacts**: output directories are created on demand.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::sheet::SheetData;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';
pub const TABLE_EXTENSIONS: &[&str] = &["csv", "tsv"];

const UTF8_BOM: char = '\u{feff}';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    }
}

pub fn is_table_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TABLE_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}

/// Rows have no header semantics at the CSV level and may differ in length.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Table name of a source file: its stem.
pub fn table_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot derive a table name from {path:?}"))
}

pub fn read_sheet<R: Read>(
    name: &str,
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<SheetData> {
    let mut csv_reader = open_csv_reader(reader, delimiter);
    let mut rows = Vec::new();
    for (idx, record) in csv_reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {} of '{name}'", idx + 1))?;
        let mut row = decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {} of '{name}'", idx + 1))?;
        if idx == 0
            && let Some(first) = row.first_mut()
            && first.starts_with(UTF8_BOM)
        {
            *first = first.trim_start_matches(UTF8_BOM).to_string();
        }
        rows.push(row);
    }
    Ok(SheetData::new(name, rows))
}

pub fn load_sheet(path: &Path, encoding: &'static Encoding) -> Result<SheetData> {
    let name = table_name(path)?;
    let file = File::open(path).with_context(|| format!("Opening table file {path:?}"))?;
    let sheet = read_sheet(
        &name,
        BufReader::new(file),
        resolve_input_delimiter(path),
        encoding,
    )?;
    debug!(
        "Loaded '{}' from {:?}: {} row(s) x {} column(s)",
        name,
        path,
        sheet.row_count(),
        sheet.column_count()
    );
    Ok(sheet)
}

/// Expands directories into their table files (sorted by path). Files are
/// kept as given.
pub fn discover_tables(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut tables = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in
                fs::read_dir(input).with_context(|| format!("Reading directory {input:?}"))?
            {
                let path = entry
                    .with_context(|| format!("Listing directory {input:?}"))?
                    .path();
                if is_table_file(&path) {
                    found.push(path);
                }
            }
            found.sort();
            tables.extend(found);
        } else if input.exists() {
            tables.push(input.clone());
        } else {
            return Err(anyhow!("Input {input:?} does not exist"));
        }
    }
    Ok(tables)
}

pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Creating directory {parent:?}"))?;
    }
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
    );
    writer
        .write_all(bytes)
        .with_context(|| format!("Writing output file {path:?}"))?;
    writer
        .flush()
        .with_context(|| format!("Flushing output file {path:?}"))
}

pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Creating directory {parent:?}"))?;
    }
    Ok(BufWriter::new(
        File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
    ))
}
