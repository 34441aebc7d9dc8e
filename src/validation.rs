//! Rule-based record validation.
//!
//! A [`RuleSet`] walks, for every record: global rules, field rules (in the
//! schema's declared field order), conditional rules, then custom rules.
//! Findings are collected in a [`ValidationResult`]; only `Error` and
//! `Critical` findings make it invalid.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::Severity,
    expr::RecordPredicate,
    schema::{FieldDefinition, SchemaDefinition},
    sheet::{HEADER_ROWS, SheetData},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: Option<String>,
    pub row: Option<usize>,
    pub message: String,
    pub error_type: String,
    pub severity: Severity,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.severity)?;
        if let Some(row) = self.row {
            write!(f, "row {} ", row + 1)?;
        }
        if let Some(field) = &self.field {
            write!(f, "field '{field}' ")?;
        }
        write!(f, "({}): {}", self.error_type, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub type_counts: BTreeMap<String, usize>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            severity_counts: BTreeMap::new(),
            type_counts: BTreeMap::new(),
        }
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        if error.severity.is_failure() {
            self.is_valid = false;
        }
        *self.severity_counts.entry(error.severity).or_insert(0) += 1;
        *self.type_counts.entry(error.error_type.clone()).or_insert(0) += 1;
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        for error in other.errors {
            self.push(error);
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.severity_counts.get(&severity).copied().unwrap_or_default()
    }

    pub fn failure_count(&self) -> usize {
        self.count(Severity::Error) + self.count(Severity::Critical)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| e.severity.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Fail(String),
}

impl RuleOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, RuleOutcome::Pass)
    }
}

/// A check over a single field value.
pub trait Rule {
    fn name(&self) -> &str;
    fn error_type(&self) -> &str;
    fn severity(&self) -> Severity;
    fn check(&self, value: &str) -> RuleOutcome;
}

/// A check over a whole record.
pub trait RecordRule {
    fn name(&self) -> &str;
    fn error_type(&self) -> &str;
    fn severity(&self) -> Severity;
    fn check(&self, record: &Record<'_>) -> RuleOutcome;
}

/// One data row viewed through the schema's declared fields.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    row: usize,
    values: Vec<(&'a FieldDefinition, &'a str)>,
}

impl<'a> Record<'a> {
    pub fn from_row(schema: &'a SchemaDefinition, row: usize, cells: &'a [String]) -> Self {
        let values = schema
            .fields
            .iter()
            .map(|field| {
                let value = cells.get(field.column).map(String::as_str).unwrap_or("");
                (field, value)
            })
            .collect();
        Self { row, values }
    }

    /// Absolute row index in the sheet (header rows included).
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn data_row_number(&self) -> usize {
        self.row.saturating_sub(HEADER_ROWS) + 1
    }

    pub fn get(&self, field: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(f, _)| f.name == field)
            .map(|(_, value)| *value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'a FieldDefinition, &'a str)> + '_ {
        self.values.iter().copied()
    }
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Range { min: f64, max: f64, inclusive: bool },
}

/// The built-in field rules.
#[derive(Debug, Clone)]
pub struct BuiltinRule {
    name: String,
    kind: RuleKind,
    severity: Severity,
}

impl BuiltinRule {
    fn new(name: &str, kind: RuleKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            severity: Severity::Error,
        }
    }

    pub fn required() -> Self {
        Self::new("required", RuleKind::Required)
    }

    pub fn min_length(length: usize) -> Self {
        Self::new("min_length", RuleKind::MinLength(length))
    }

    pub fn max_length(length: usize) -> Self {
        Self::new("max_length", RuleKind::MaxLength(length))
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new("pattern", RuleKind::Pattern(Regex::new(pattern)?)))
    }

    pub fn range(min: f64, max: f64) -> Self {
        Self::new(
            "range",
            RuleKind::Range {
                min,
                max,
                inclusive: true,
            },
        )
    }

    pub fn exclusive(mut self) -> Self {
        if let RuleKind::Range { inclusive, .. } = &mut self.kind {
            *inclusive = false;
        }
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }
}

fn check_range(value: &str, min: f64, max: f64, inclusive: bool) -> RuleOutcome {
    for token in value.split([',', ';']).map(str::trim).filter(|t| !t.is_empty()) {
        let Ok(number) = token.parse::<f64>() else {
            return RuleOutcome::Fail(format!("'{token}' is not numeric"));
        };
        let within = if inclusive {
            number >= min && number <= max
        } else {
            number > min && number < max
        };
        if !within {
            let (open, close) = if inclusive { ('[', ']') } else { ('(', ')') };
            return RuleOutcome::Fail(format!(
                "{number} is outside {open}{min}, {max}{close}"
            ));
        }
    }
    RuleOutcome::Pass
}

impl Rule for BuiltinRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn error_type(&self) -> &str {
        &self.name
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, value: &str) -> RuleOutcome {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return match self.kind {
                RuleKind::Required => RuleOutcome::Fail("Value is required".to_string()),
                _ => RuleOutcome::Pass,
            };
        }
        match &self.kind {
            RuleKind::Required => RuleOutcome::Pass,
            RuleKind::MinLength(min) => {
                let length = trimmed.chars().count();
                if length < *min {
                    RuleOutcome::Fail(format!("Length {length} is shorter than {min}"))
                } else {
                    RuleOutcome::Pass
                }
            }
            RuleKind::MaxLength(max) => {
                let length = trimmed.chars().count();
                if length > *max {
                    RuleOutcome::Fail(format!("Length {length} exceeds {max}"))
                } else {
                    RuleOutcome::Pass
                }
            }
            RuleKind::Pattern(regex) => {
                if regex.is_match(trimmed) {
                    RuleOutcome::Pass
                } else {
                    RuleOutcome::Fail(format!("'{trimmed}' does not match /{}/", regex.as_str()))
                }
            }
            RuleKind::Range {
                min,
                max,
                inclusive,
            } => check_range(trimmed, *min, *max, *inclusive),
        }
    }
}

type RecordCheck = Box<dyn Fn(&Record<'_>) -> RuleOutcome>;
type RecordGate = Box<dyn Fn(&Record<'_>) -> bool>;

/// Closure-backed record rule.
pub struct CustomRule {
    name: String,
    severity: Severity,
    check: RecordCheck,
}

impl CustomRule {
    pub fn new<F>(name: impl Into<String>, severity: Severity, check: F) -> Self
    where
        F: Fn(&Record<'_>) -> RuleOutcome + 'static,
    {
        Self {
            name: name.into(),
            severity,
            check: Box::new(check),
        }
    }
}

impl RecordRule for CustomRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn error_type(&self) -> &str {
        &self.name
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, record: &Record<'_>) -> RuleOutcome {
        (self.check)(record)
    }
}

/// A field rule that only runs when `predicate` accepts the record.
pub struct ConditionalRule {
    pub field: String,
    predicate: RecordGate,
    rule: Box<dyn Rule>,
}

impl ConditionalRule {
    pub fn new<F>(field: impl Into<String>, predicate: F, rule: Box<dyn Rule>) -> Self
    where
        F: Fn(&Record<'_>) -> bool + 'static,
    {
        Self {
            field: field.into(),
            predicate: Box::new(predicate),
            rule,
        }
    }

    /// Gates `rule` with an `evalexpr` expression over the record.
    pub fn when_expression(field: impl Into<String>, expression: &str, rule: Box<dyn Rule>) -> Self {
        let predicate = RecordPredicate::new(expression);
        Self::new(
            field,
            move |record| match predicate.matches(record) {
                Ok(matched) => matched,
                Err(err) => {
                    warn!(
                        "Condition '{}' could not be evaluated on row {}: {err:#}",
                        predicate.expression(),
                        record.data_row_number()
                    );
                    false
                }
            },
            rule,
        )
    }
}

#[derive(Default)]
pub struct RuleSet {
    global: Vec<Box<dyn RecordRule>>,
    fields: BTreeMap<String, Vec<Box<dyn Rule>>>,
    conditional: Vec<ConditionalRule>,
    custom: Vec<Box<dyn RecordRule>>,
    pub stop_on_first_error: bool,
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("global", &self.global.len())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("conditional", &self.conditional.len())
            .field("custom", &self.custom.len())
            .field("stop_on_first_error", &self.stop_on_first_error)
            .finish()
    }
}

fn field_error(field: &str, row: usize, rule: &dyn Rule, message: String) -> ValidationError {
    ValidationError {
        field: Some(field.to_string()),
        row: Some(row),
        message,
        error_type: rule.error_type().to_string(),
        severity: rule.severity(),
    }
}

fn record_error(row: usize, rule: &dyn RecordRule, message: String) -> ValidationError {
    ValidationError {
        field: None,
        row: Some(row),
        message,
        error_type: rule.error_type().to_string(),
        severity: rule.severity(),
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
            && self.fields.is_empty()
            && self.conditional.is_empty()
            && self.custom.is_empty()
    }

    pub fn add_global(&mut self, rule: impl RecordRule + 'static) -> &mut Self {
        self.global.push(Box::new(rule));
        self
    }

    pub fn add_field_rule(&mut self, field: &str, rule: impl Rule + 'static) -> &mut Self {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(Box::new(rule));
        self
    }

    pub fn add_conditional(&mut self, rule: ConditionalRule) -> &mut Self {
        self.conditional.push(rule);
        self
    }

    pub fn add_custom(&mut self, rule: impl RecordRule + 'static) -> &mut Self {
        self.custom.push(Box::new(rule));
        self
    }

    /// Field names that rules target but the schema does not declare.
    pub fn unknown_fields(&self, schema: &SchemaDefinition) -> Vec<String> {
        self.fields
            .keys()
            .chain(self.conditional.iter().map(|c| &c.field))
            .filter(|name| schema.field(name).is_none())
            .cloned()
            .collect()
    }

    /// Validates one record. Returns `true` when `stop_on_first_error`
    /// stopped the walk.
    pub fn validate_record(&self, record: &Record<'_>, result: &mut ValidationResult) -> bool {
        let row = record.row();
        for rule in &self.global {
            if let RuleOutcome::Fail(message) = rule.check(record) {
                result.push(record_error(row, rule.as_ref(), message));
                if self.stop_on_first_error {
                    return true;
                }
            }
        }
        for (field, value) in record.fields() {
            let Some(rules) = self.fields.get(&field.name) else {
                continue;
            };
            for rule in rules {
                if let RuleOutcome::Fail(message) = rule.check(value) {
                    result.push(field_error(&field.name, row, rule.as_ref(), message));
                    if self.stop_on_first_error {
                        return true;
                    }
                }
            }
        }
        for conditional in &self.conditional {
            if !(conditional.predicate)(record) {
                continue;
            }
            let value = record.get(&conditional.field).unwrap_or("");
            if let RuleOutcome::Fail(message) = conditional.rule.check(value) {
                result.push(field_error(
                    &conditional.field,
                    row,
                    conditional.rule.as_ref(),
                    message,
                ));
                if self.stop_on_first_error {
                    return true;
                }
            }
        }
        for rule in &self.custom {
            if let RuleOutcome::Fail(message) = rule.check(record) {
                result.push(record_error(row, rule.as_ref(), message));
                if self.stop_on_first_error {
                    return true;
                }
            }
        }
        false
    }

    pub fn validate_sheet(&self, schema: &SchemaDefinition, sheet: &SheetData) -> ValidationResult {
        let mut result = ValidationResult::new();
        for (row, cells) in sheet.data_rows() {
            let record = Record::from_row(schema, row, cells);
            if self.validate_record(&record, &mut result) {
                break;
            }
        }
        result
    }

    pub fn from_config(config: &TableRules) -> Result<Self> {
        let mut set = RuleSet::new();
        set.stop_on_first_error = config.stop_on_first_error;
        for spec in &config.rules {
            let rule = spec
                .build()
                .with_context(|| format!("Building {:?} rule for field '{}'", spec.kind, spec.field))?;
            match &spec.when {
                Some(expression) => {
                    set.add_conditional(ConditionalRule::when_expression(
                        spec.field.as_str(),
                        expression,
                        Box::new(rule),
                    ));
                }
                None => {
                    set.add_field_rule(&spec.field, rule);
                }
            }
        }
        Ok(set)
    }
}

fn default_inclusive() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleKindSpec {
    Required,
    MinLength {
        length: usize,
    },
    MaxLength {
        length: usize,
    },
    Pattern {
        pattern: String,
    },
    Range {
        min: f64,
        max: f64,
        #[serde(default = "default_inclusive")]
        inclusive: bool,
    },
}

/// Declarative field rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub field: String,
    #[serde(flatten)]
    pub kind: RuleKindSpec,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub when: Option<String>,
}

impl RuleSpec {
    pub fn build(&self) -> Result<BuiltinRule> {
        let rule = match &self.kind {
            RuleKindSpec::Required => BuiltinRule::required(),
            RuleKindSpec::MinLength { length } => BuiltinRule::min_length(*length),
            RuleKindSpec::MaxLength { length } => BuiltinRule::max_length(*length),
            RuleKindSpec::Pattern { pattern } => BuiltinRule::pattern(pattern)
                .with_context(|| format!("Compiling pattern '{pattern}'"))?,
            RuleKindSpec::Range {
                min,
                max,
                inclusive,
            } => {
                let rule = BuiltinRule::range(*min, *max);
                if *inclusive { rule } else { rule.exclusive() }
            }
        };
        Ok(match self.severity {
            Some(severity) => rule.with_severity(severity),
            None => rule,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRules {
    #[serde(default)]
    pub stop_on_first_error: bool,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}
