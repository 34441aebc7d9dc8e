//! Schema model and header resolution.
//!
//! This module owns the [`SchemaDefinition`] (the resolved structure of one
//! source table), [`FieldDefinition`] (one column) and [`FieldKind`], the
//! per-field metadata variant that distinguishes plain, localized, reference,
//! array, 2-D array and map fields.
//!
//! ## Responsibilities
//!
//! - Reading the four header rows (name+tags, type, description, default)
//! - Skipping empty and `@PM` columns
//! - Degrading malformed types to `string` while collecting diagnostics
//! - JSON export of resolved schemas for downstream collaborators

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Diagnostic, DiagnosticCode, StageError},
    sheet::{DEFAULT_ROW, DESCRIPTION_ROW, HEADER_ROWS, NAME_ROW, SheetData, TYPE_ROW},
    tags::{GenerationScope, HeaderTags, parse_header},
    types::{BaseType, FieldType, TypeResolution, resolve_type},
};

/// Synthetic entry type name used for map cells.
pub const MAP_ENTRY_TYPE: &str = "K_V_Pair";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeStats {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub min_columns: Option<usize>,
    pub max_columns: Option<usize>,
}

impl ShapeStats {
    /// Records one data row. `widths` holds the element count of every
    /// (matrix) row found in the cell.
    pub fn record(&mut self, valid: bool, widths: &[usize]) {
        self.total_rows += 1;
        if valid {
            self.valid_rows += 1;
        }
        for &columns in widths {
            self.min_columns = Some(self.min_columns.map_or(columns, |m| m.min(columns)));
            self.max_columns = Some(self.max_columns.map_or(columns, |m| m.max(columns)));
        }
    }

    pub fn is_ragged(&self) -> bool {
        self.min_columns != self.max_columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTarget {
    pub type_name: String,
    pub resolved: bool,
    /// Shape statistics when the reference is an array, 2-D array or map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ShapeStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Plain,
    Localized,
    Reference(ReferenceTarget),
    Array(ShapeStats),
    Array2D(ShapeStats),
    Map { entry: String, stats: ShapeStats },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub column: usize,
    pub field_type: FieldType,
    pub declared_type: String,
    pub scope: GenerationScope,
    pub kind: FieldKind,
    pub default_value: Option<String>,
    pub description: String,
    pub original_header: String,
}

impl FieldDefinition {
    pub fn is_array(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::Array(_) | FieldType::KeyValuePairs { .. }
        )
    }

    pub fn is_2d_array(&self) -> bool {
        matches!(self.field_type, FieldType::Array2D(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.field_type, FieldType::Map { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference(_))
    }

    pub fn is_localized(&self) -> bool {
        matches!(self.kind, FieldKind::Localized)
    }

    pub fn reference(&self) -> Option<&ReferenceTarget> {
        match &self.kind {
            FieldKind::Reference(target) => Some(target),
            _ => None,
        }
    }

    pub fn stats(&self) -> Option<&ShapeStats> {
        match &self.kind {
            FieldKind::Array(stats) | FieldKind::Array2D(stats) => Some(stats),
            FieldKind::Map { stats, .. } => Some(stats),
            FieldKind::Reference(target) => target.stats.as_ref(),
            _ => None,
        }
    }

    pub fn stats_mut(&mut self) -> Option<&mut ShapeStats> {
        match &mut self.kind {
            FieldKind::Array(stats) | FieldKind::Array2D(stats) => Some(stats),
            FieldKind::Map { stats, .. } => Some(stats),
            FieldKind::Reference(target) => target.stats.as_mut(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub localized_fields: Vec<String>,
    pub localization_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    pub namespace: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub metadata: SchemaMetadata,
}

impl SchemaDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldDefinition> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Names that occur more than once, in first-seen order.
    pub fn duplicate_field_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) && !duplicates.contains(&field.name) {
                duplicates.push(field.name.clone());
            }
        }
        duplicates
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing schema JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing schema JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema = serde_json::from_reader(reader).context("Parsing schema JSON")?;
        Ok(schema)
    }
}

/// Parse state of one header column before it becomes a field.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub index: usize,
    pub raw_header: String,
    pub tags: HeaderTags,
    pub declared_type: String,
    pub resolution: TypeResolution,
    pub description: String,
    pub default_value: String,
}

impl ColumnInfo {
    pub fn clean_name(&self) -> &str {
        &self.tags.name
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.tags
            .diagnostics
            .iter()
            .chain(self.resolution.diagnostics.iter())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableHeaderInfo {
    pub columns: Vec<ColumnInfo>,
    pub skipped_empty: usize,
    pub skipped_excluded: usize,
}

pub fn analyze_headers(sheet: &SheetData) -> Result<TableHeaderInfo, StageError> {
    if !sheet.has_header_rows() {
        return Err(StageError::MissingHeaderRows {
            required: HEADER_ROWS,
            found: sheet.row_count(),
        });
    }
    let mut info = TableHeaderInfo::default();
    for index in 0..sheet.column_count() {
        let raw_header = sheet.cell(NAME_ROW, index).trim();
        let tags = parse_header(raw_header);
        if tags.is_empty() {
            info.skipped_empty += 1;
            continue;
        }
        if tags.scope.is_excluded() {
            debug!("Skipping @PM column '{}' in '{}'", tags.name, sheet.name);
            info.skipped_excluded += 1;
            continue;
        }
        let declared_type = sheet.cell(TYPE_ROW, index).trim().to_string();
        info.columns.push(ColumnInfo {
            index,
            raw_header: raw_header.to_string(),
            resolution: resolve_type(&declared_type),
            tags,
            declared_type,
            description: sheet.cell(DESCRIPTION_ROW, index).trim().to_string(),
            default_value: sheet.cell(DEFAULT_ROW, index).trim().to_string(),
        });
    }
    Ok(info)
}

fn field_kind(column: &ColumnInfo, diagnostics: &mut Vec<Diagnostic>) -> FieldKind {
    let field_type = column.resolution.field_type;
    if let Some(target) = column.tags.reference_target() {
        return FieldKind::Reference(ReferenceTarget {
            type_name: target.to_string(),
            resolved: false,
            stats: (!field_type.is_scalar()).then(ShapeStats::default),
        });
    }
    match field_type {
        FieldType::Array(_) | FieldType::KeyValuePairs { .. } => {
            FieldKind::Array(ShapeStats::default())
        }
        FieldType::Array2D(_) => FieldKind::Array2D(ShapeStats::default()),
        FieldType::Map { .. } => FieldKind::Map {
            entry: MAP_ENTRY_TYPE.to_string(),
            stats: ShapeStats::default(),
        },
        FieldType::Scalar(BaseType::String) if column.tags.localized => FieldKind::Localized,
        FieldType::Scalar(_) if column.tags.localized => {
            diagnostics.push(
                Diagnostic::warning(
                    DiagnosticCode::IncompatibleTag,
                    format!(
                        "@Lan on non-string column '{}' ({field_type}) ignored",
                        column.clean_name()
                    ),
                )
                .at_column(column.index),
            );
            FieldKind::Plain
        }
        FieldType::Scalar(_) => FieldKind::Plain,
    }
}

fn field_from_column(column: &ColumnInfo, diagnostics: &mut Vec<Diagnostic>) -> FieldDefinition {
    let kind = field_kind(column, diagnostics);
    let mut field_type = column.resolution.field_type;
    if matches!(kind, FieldKind::Reference(_)) {
        field_type = field_type.with_element(BaseType::Int32);
    }
    if column.tags.localized && !matches!(kind, FieldKind::Localized | FieldKind::Plain) {
        diagnostics.push(
            Diagnostic::warning(
                DiagnosticCode::IncompatibleTag,
                format!(
                    "@Lan on structured column '{}' ({field_type}) ignored",
                    column.clean_name()
                ),
            )
            .at_column(column.index),
        );
    }
    FieldDefinition {
        name: column.clean_name().to_string(),
        column: column.index,
        field_type,
        declared_type: column.declared_type.clone(),
        scope: column.tags.scope,
        kind,
        default_value: (!column.default_value.is_empty()).then(|| column.default_value.clone()),
        description: column.description.clone(),
        original_header: column.raw_header.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct SchemaResolution {
    pub schema: SchemaDefinition,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolves the header block of `sheet` into a schema. Only a missing header
/// block is a hard failure; every other problem becomes a diagnostic.
pub fn resolve_schema(sheet: &SheetData, namespace: &str) -> Result<SchemaResolution, StageError> {
    let info = analyze_headers(sheet)?;
    let mut diagnostics = Vec::new();
    let mut fields = Vec::with_capacity(info.columns.len());
    for column in &info.columns {
        diagnostics.extend(column.diagnostics().cloned().map(|d| d.at_column(column.index)));
        fields.push(field_from_column(column, &mut diagnostics));
    }
    debug!(
        "Resolved {} field(s) for '{}' ({} empty, {} excluded column(s) skipped)",
        fields.len(),
        sheet.name,
        info.skipped_empty,
        info.skipped_excluded
    );
    let localized_fields = fields
        .iter()
        .filter(|f| f.is_localized())
        .map(|f| f.name.clone())
        .collect();
    Ok(SchemaResolution {
        schema: SchemaDefinition {
            name: sheet.name.clone(),
            namespace: namespace.to_string(),
            fields,
            metadata: SchemaMetadata {
                localized_fields,
                localization_keys: Vec::new(),
            },
        },
        diagnostics,
    })
}

/// Counts fields per scope, used by summaries.
pub fn scope_summary(schema: &SchemaDefinition) -> BTreeMap<&'static str, usize> {
    let mut summary = BTreeMap::new();
    for field in &schema.fields {
        *summary.entry(field.scope.as_str()).or_insert(0) += 1;
    }
    summary
}
