//! Localization key extraction.
//!
//! Text destined for translation is moved out of the table: every qualifying
//! cell is replaced by `LOC_<key>` and the original text is recorded in a
//! [`LocalizationTable`]. Columns qualify when tagged `@Lan`, or, with
//! `auto_detect` enabled, when a string column's name contains one of the
//! configured keywords or enough sampled values look like prose.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::{Context, Result};
use heck::ToShoutySnakeCase;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    schema::{FieldKind, SchemaDefinition},
    sheet::SheetData,
    types::{BaseType, FieldType},
};

pub const KEY_PREFIX: &str = "LOC_";
pub const DEFAULT_KEY_PATTERN: &str = "^LOC_[A-Z0-9_]+$";
const HASH_SUMMARY_LEN: usize = 8;

fn default_keywords() -> Vec<String> {
    ["name", "desc", "title", "text", "tooltip", "message", "dialog"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

fn default_key_pattern() -> String {
    DEFAULT_KEY_PATTERN.to_string()
}

fn default_sample_size() -> usize {
    50
}

fn default_detection_ratio() -> f64 {
    0.3
}

fn default_length_threshold() -> usize {
    40
}

fn default_summary_words() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub enabled: bool,
    pub auto_detect: bool,
    pub keywords: Vec<String>,
    pub key_pattern: String,
    pub sample_size: usize,
    pub detection_ratio: f64,
    pub length_threshold: usize,
    pub summary_words: usize,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_detect: false,
            keywords: default_keywords(),
            key_pattern: default_key_pattern(),
            sample_size: default_sample_size(),
            detection_ratio: default_detection_ratio(),
            length_threshold: default_length_threshold(),
            summary_words: default_summary_words(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationEntry {
    pub key: String,
    pub text: String,
    pub table: String,
    pub field: String,
}

/// Key/text pairs in the order they were generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationTable {
    entries: Vec<LocalizationEntry>,
    keys: BTreeSet<String>,
}

impl LocalizationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LocalizationEntry] {
        &self.entries
    }

    /// Marks keys as taken without recording any text for them. Keys that
    /// another table of the same batch already uses are reserved this way so
    /// new entries get a suffix instead of colliding.
    pub fn reserve<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.keys.extend(keys);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.text.as_str())
    }

    /// Inserts `text` under `base`, or under `base_1`, `base_2`, ... when the
    /// key is already taken. Returns the key actually used.
    pub fn insert_unique(&mut self, base: &str, text: &str, table: &str, field: &str) -> String {
        let mut key = base.to_string();
        let mut suffix = 1usize;
        while self.keys.contains(&key) {
            key = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.keys.insert(key.clone());
        self.entries.push(LocalizationEntry {
            key: key.clone(),
            text: text.to_string(),
            table: table.to_string(),
            field: field.to_string(),
        });
        key
    }

    /// Appends the entries of `other`. An entry whose key is already taken
    /// is kept under a suffixed key and a warning is logged.
    pub fn extend(&mut self, other: &LocalizationTable) {
        for entry in &other.entries {
            let key = self.insert_unique(&entry.key, &entry.text, &entry.table, &entry.field);
            if key != entry.key {
                warn!(
                    "Localization key '{}' from '{}' already taken; stored as '{key}'",
                    entry.key, entry.table
                );
            }
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record(["key", "text", "table", "field"])
            .context("Writing localization header")?;
        for entry in &self.entries {
            csv_writer
                .write_record([&entry.key, &entry.text, &entry.table, &entry.field])
                .with_context(|| format!("Writing localization key {}", entry.key))?;
        }
        csv_writer.flush().context("Flushing localization table")?;
        Ok(())
    }
}

fn is_latin(c: char) -> bool {
    c.is_ascii() || matches!(c, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}')
}

pub fn contains_non_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic() && !is_latin(c))
}

/// Upper-cased summary of the first `words` words. Falls back to a short
/// SHA-256 prefix when no ASCII alphanumerics remain.
pub fn summarize_text(text: &str, words: usize) -> String {
    let kept = text
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .take(words.max(1))
        .collect::<Vec<_>>();
    if kept.is_empty() {
        let digest = format!("{:X}", Sha256::digest(text.as_bytes()));
        digest[..HASH_SUMMARY_LEN].to_string()
    } else {
        kept.join(" ").to_shouty_snake_case()
    }
}

pub fn key_base(field: &str, text: &str, words: usize) -> String {
    format!("{}_{}", field.to_shouty_snake_case(), summarize_text(text, words))
}

#[derive(Debug)]
pub struct LocalizationExtractor<'c> {
    config: &'c LocalizationConfig,
    key_pattern: Regex,
}

impl<'c> LocalizationExtractor<'c> {
    pub fn new(config: &'c LocalizationConfig) -> Result<Self> {
        let key_pattern = Regex::new(&config.key_pattern)
            .with_context(|| format!("Compiling localization key pattern '{}'", config.key_pattern))?;
        Ok(Self {
            config,
            key_pattern,
        })
    }

    pub fn is_key(&self, value: &str) -> bool {
        self.key_pattern.is_match(value)
    }

    fn looks_like_prose(&self, value: &str) -> bool {
        contains_non_latin(value) || value.chars().count() > self.config.length_threshold
    }

    fn name_matches(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        self.config
            .keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_ascii_lowercase()))
    }

    fn sample_matches(&self, sheet: &SheetData, column: usize) -> bool {
        let sampled = sheet
            .column_values(column)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty() && !self.is_key(value))
            .take(self.config.sample_size)
            .collect::<Vec<_>>();
        if sampled.is_empty() {
            return false;
        }
        let hits = sampled.iter().filter(|v| self.looks_like_prose(v)).count();
        hits as f64 / sampled.len() as f64 >= self.config.detection_ratio
    }

    /// Names of the fields whose cells will be extracted, in schema order.
    pub fn detect_fields(&self, schema: &SchemaDefinition, sheet: &SheetData) -> Vec<String> {
        schema
            .fields
            .iter()
            .filter(|field| match field.kind {
                FieldKind::Localized => true,
                FieldKind::Plain if self.config.auto_detect => {
                    field.field_type == FieldType::Scalar(BaseType::String)
                        && (self.name_matches(&field.name) || self.sample_matches(sheet, field.column))
                }
                _ => false,
            })
            .map(|field| field.name.clone())
            .collect()
    }

    /// Replaces qualifying cells in place and records their text. Fields
    /// found by auto detection are marked localized in the schema.
    pub fn extract(
        &self,
        schema: &mut SchemaDefinition,
        sheet: &mut SheetData,
        table: &mut LocalizationTable,
    ) -> usize {
        let mut replaced = 0;
        for name in self.detect_fields(schema, sheet) {
            let Some(field) = schema.field_mut(&name) else {
                continue;
            };
            if matches!(field.kind, FieldKind::Plain) {
                debug!("Auto-detected localized column '{}' in '{}'", field.name, sheet.name);
                field.kind = FieldKind::Localized;
            }
            let column = field.column;
            let cells = sheet
                .column_values(column)
                .map(|(row, value)| (row, value.trim().to_string()))
                .collect::<Vec<_>>();
            for (row, text) in cells {
                if text.is_empty() || self.is_key(&text) {
                    continue;
                }
                let base = key_base(&name, &text, self.config.summary_words);
                let key = table.insert_unique(&base, &text, &schema.name, &name);
                sheet.set_cell(row, column, format!("{KEY_PREFIX}{key}"));
                schema.metadata.localization_keys.push(key);
                replaced += 1;
            }
            if !schema.metadata.localized_fields.contains(&name) {
                schema.metadata.localized_fields.push(name);
            }
        }
        replaced
    }
}
