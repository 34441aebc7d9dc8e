//! Built-in processors and the standard pipeline layout.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::debug;

use crate::{
    codegen::{self, GeneratedFile},
    error::{Severity, StageError},
    localization::{LocalizationConfig, LocalizationExtractor},
    payload::{self, RecordSet},
    pipeline::{
        CodeGenerator, DataContext, DataProcessor, Pipeline, PipelineOptions, PostProcessContext,
        PostProcessor, PreProcessor, Processor, RunLog, ValidationInput, Validator,
    },
    reference::{KnownTypes, check_reference_types, collect_relations},
    schema::{FieldKind, SchemaDefinition},
    sheet::SheetData,
    structured::normalize_field,
    validation::{RuleSet, ValidationError, ValidationResult},
};

pub const UNKNOWN_REFERENCE_TYPE: &str = "UnknownReferenceType";
pub const DUPLICATE_FIELD: &str = "DuplicateField";
pub const EMPTY_SCHEMA: &str = "EmptySchema";
pub const INVALID_CELL_VALUE: &str = "InvalidCellValue";
pub const UNKNOWN_RULE_FIELD: &str = "UnknownRuleField";

/// Trims every cell and drops blank data rows.
#[derive(Debug, Default)]
pub struct TrimCells;

impl Processor for TrimCells {
    fn name(&self) -> &str {
        "trim-cells"
    }
}

impl PreProcessor for TrimCells {
    fn process(&self, sheet: &mut SheetData, log: &mut RunLog) -> Result<(), StageError> {
        let trimmed = sheet.trim_cells();
        let dropped = sheet.drop_blank_rows();
        if trimmed > 0 || dropped > 0 {
            log.info(format!(
                "Trimmed {trimmed} cell(s) and dropped {dropped} blank row(s) in '{}'",
                sheet.name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RustCodeGenerator;

impl Processor for RustCodeGenerator {
    fn name(&self) -> &str {
        "rust-codegen"
    }
}

impl CodeGenerator for RustCodeGenerator {
    fn generate(
        &self,
        schema: &SchemaDefinition,
        log: &mut RunLog,
    ) -> Result<Vec<GeneratedFile>, StageError> {
        let files = codegen::generate(schema);
        if files.is_empty() {
            log.warn(format!("Table '{}' has no generated fields", schema.name));
        }
        Ok(files)
    }
}

/// Normalizes array, 2-D array, map and scalar cells and records shape
/// statistics on the schema.
#[derive(Debug, Default)]
pub struct StructuredValueProcessor;

impl Processor for StructuredValueProcessor {
    fn name(&self) -> &str {
        "structured-values"
    }
}

impl DataProcessor for StructuredValueProcessor {
    fn process(&self, ctx: &mut DataContext<'_>) -> Result<(), StageError> {
        for field in ctx.schema.fields.iter_mut() {
            let errors = normalize_field(field, ctx.sheet);
            if let Some(stats) = field.stats() {
                ctx.log.info(format!(
                    "{} ({}): {}/{} valid row(s), columns {}..{}",
                    field.name,
                    field.field_type,
                    stats.valid_rows,
                    stats.total_rows,
                    stats.min_columns.unwrap_or_default(),
                    stats.max_columns.unwrap_or_default()
                ));
            }
            ctx.cell_errors.extend(errors);
        }
        Ok(())
    }
}

/// Marks reference fields resolved against the known types and records one
/// relation per reference field.
#[derive(Debug, Default)]
pub struct ReferenceProcessor {
    known: KnownTypes,
}

impl ReferenceProcessor {
    pub fn new(known: KnownTypes) -> Self {
        Self { known }
    }
}

impl Processor for ReferenceProcessor {
    fn name(&self) -> &str {
        "references"
    }

    fn priority(&self) -> i32 {
        10
    }
}

impl DataProcessor for ReferenceProcessor {
    fn process(&self, ctx: &mut DataContext<'_>) -> Result<(), StageError> {
        for field in ctx.schema.fields.iter_mut() {
            if let FieldKind::Reference(target) = &mut field.kind {
                target.resolved = self.known.contains(&target.type_name);
            }
        }
        let relations = collect_relations(ctx.schema);
        if !relations.is_empty() {
            ctx.log.info(format!(
                "'{}' references {}",
                ctx.schema.name,
                relations.iter().map(|r| r.target_type.as_str()).unique().join(", ")
            ));
        }
        ctx.relations.extend(relations);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LocalizationProcessor {
    config: LocalizationConfig,
    reserved_keys: BTreeSet<String>,
}

impl LocalizationProcessor {
    pub fn new(config: LocalizationConfig) -> Self {
        Self {
            config,
            reserved_keys: BTreeSet::new(),
        }
    }

    /// Keys already issued elsewhere in the batch; new keys avoid them.
    pub fn with_reserved_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.reserved_keys = keys;
        self
    }
}

impl Processor for LocalizationProcessor {
    fn name(&self) -> &str {
        "localization"
    }

    fn priority(&self) -> i32 {
        20
    }
}

impl DataProcessor for LocalizationProcessor {
    fn process(&self, ctx: &mut DataContext<'_>) -> Result<(), StageError> {
        if !self.config.enabled {
            return Ok(());
        }
        let extractor = LocalizationExtractor::new(&self.config)
            .map_err(|err| StageError::failed(self.name(), format!("{err:#}")))?;
        ctx.localization.reserve(self.reserved_keys.iter().cloned());
        let replaced = extractor.extract(ctx.schema, ctx.sheet, ctx.localization);
        if replaced > 0 {
            ctx.log.info(format!(
                "Extracted {replaced} localized value(s) from '{}'",
                ctx.schema.name
            ));
        }
        Ok(())
    }
}

fn finding(
    field: Option<&str>,
    row: Option<usize>,
    error_type: &str,
    severity: Severity,
    message: String,
) -> ValidationError {
    ValidationError {
        field: field.map(str::to_string),
        row,
        message,
        error_type: error_type.to_string(),
        severity,
    }
}

/// Structural checks on the resolved schema.
#[derive(Debug, Default)]
pub struct SchemaValidator;

impl Processor for SchemaValidator {
    fn name(&self) -> &str {
        "schema"
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, input: &ValidationInput<'_>) -> Result<ValidationResult, StageError> {
        let mut result = ValidationResult::new();
        if input.schema.fields.is_empty() {
            result.push(finding(
                None,
                None,
                EMPTY_SCHEMA,
                Severity::Warning,
                format!("Table '{}' declares no fields", input.schema.name),
            ));
        }
        for name in input.schema.duplicate_field_names() {
            result.push(finding(
                Some(&name),
                None,
                DUPLICATE_FIELD,
                Severity::Error,
                format!("Field name '{name}' is declared more than once"),
            ));
        }
        Ok(result)
    }
}

#[derive(Debug, Default)]
pub struct ReferenceValidator {
    known: KnownTypes,
}

impl ReferenceValidator {
    pub fn new(known: KnownTypes) -> Self {
        Self { known }
    }
}

impl Processor for ReferenceValidator {
    fn name(&self) -> &str {
        "reference-types"
    }

    fn priority(&self) -> i32 {
        10
    }
}

impl Validator for ReferenceValidator {
    fn validate(&self, input: &ValidationInput<'_>) -> Result<ValidationResult, StageError> {
        let mut result = ValidationResult::new();
        for unknown in check_reference_types(input.schema, &self.known) {
            result.push(finding(
                Some(&unknown.field),
                None,
                UNKNOWN_REFERENCE_TYPE,
                Severity::Error,
                unknown.message(),
            ));
        }
        Ok(result)
    }
}

/// Reports cell parse failures. They never fail a run.
#[derive(Debug, Default)]
pub struct CellValueValidator;

impl Processor for CellValueValidator {
    fn name(&self) -> &str {
        "cell-values"
    }

    fn priority(&self) -> i32 {
        20
    }
}

impl Validator for CellValueValidator {
    fn validate(&self, input: &ValidationInput<'_>) -> Result<ValidationResult, StageError> {
        let mut result = ValidationResult::new();
        for error in input.cell_errors {
            result.push(finding(
                Some(&error.field),
                Some(error.row),
                INVALID_CELL_VALUE,
                Severity::Warning,
                format!("{} (cell '{}')", error.message, error.value),
            ));
        }
        Ok(result)
    }
}

#[derive(Debug, Default)]
pub struct RuleValidator {
    rules: RuleSet,
}

impl RuleValidator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }
}

impl Processor for RuleValidator {
    fn name(&self) -> &str {
        "rules"
    }

    fn priority(&self) -> i32 {
        30
    }
}

impl Validator for RuleValidator {
    fn validate(&self, input: &ValidationInput<'_>) -> Result<ValidationResult, StageError> {
        let mut result = ValidationResult::new();
        for name in self.rules.unknown_fields(input.schema) {
            result.push(finding(
                Some(&name),
                None,
                UNKNOWN_RULE_FIELD,
                Severity::Warning,
                format!("Rule targets field '{name}' which '{}' does not declare", input.schema.name),
            ));
        }
        result.merge(self.rules.validate_sheet(input.schema, input.sheet));
        Ok(result)
    }
}

/// Encodes the normalized table as the run's binary payload.
#[derive(Debug, Default)]
pub struct PayloadEncoder;

impl Processor for PayloadEncoder {
    fn name(&self) -> &str {
        "payload"
    }
}

impl PostProcessor for PayloadEncoder {
    fn process(&self, ctx: &mut PostProcessContext<'_>) -> Result<(), StageError> {
        let (records, skipped) = RecordSet::from_sheet(ctx.schema, ctx.sheet);
        if !skipped.is_empty() {
            debug!(
                "{} cell(s) of '{}' stored as null in the payload",
                skipped.len(),
                ctx.schema.name
            );
        }
        *ctx.payload = payload::encode(&records)?;
        ctx.log.info(format!(
            "Encoded {} record(s) of '{}' into {} byte(s)",
            records.len(),
            ctx.schema.name,
            ctx.payload.len()
        ));
        Ok(())
    }
}

/// Settings for the built-in processor set.
#[derive(Debug, Default)]
pub struct StandardProcessors {
    pub known_types: KnownTypes,
    pub localization: LocalizationConfig,
    pub rules: RuleSet,
    /// Localization keys taken by tables compiled earlier in the batch.
    pub reserved_keys: BTreeSet<String>,
}

/// Registers every built-in processor in its stage.
pub fn standard_pipeline(options: PipelineOptions, settings: StandardProcessors) -> Pipeline {
    let mut pipeline = Pipeline::new(options);
    pipeline
        .add_pre_processor(TrimCells)
        .add_code_generator(RustCodeGenerator)
        .add_data_processor(StructuredValueProcessor)
        .add_data_processor(ReferenceProcessor::new(settings.known_types.clone()))
        .add_data_processor(
            LocalizationProcessor::new(settings.localization)
                .with_reserved_keys(settings.reserved_keys),
        )
        .add_validator(SchemaValidator)
        .add_validator(ReferenceValidator::new(settings.known_types))
        .add_validator(CellValueValidator)
        .add_validator(RuleValidator::new(settings.rules))
        .add_post_processor(PayloadEncoder);
    pipeline
}
