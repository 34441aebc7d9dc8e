//! Error and diagnostic types shared by the compiler stages.
//!
//! Hard failures are typed with `thiserror` ([`StageError`], [`PipelineError`]).
//! Expected malformed input never produces an error value: the grammar and
//! header resolver return a best-effort result plus [`Diagnostic`]s.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ranked classification of a finding. Only `Error` and `Critical` fail a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl Severity {
    pub fn is_failure(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    UnknownTag,
    ConflictingScopeTags,
    MissingReferenceTarget,
    UnknownBaseType,
    MalformedType,
    IncompatibleTag,
}

/// A soft finding produced while interpreting header or type text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub column: Option<usize>,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            column: None,
        }
    }

    pub fn at_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "[{}] column {}: {}", self.severity, column, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Failure reported by a single processor.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Table must contain at least {required} header rows, found {found}")]
    MissingHeaderRows { required: usize, found: usize },

    #[error("Processor '{processor}' failed: {message}")]
    Failed { processor: String, message: String },

    #[error("Processor '{processor}' panicked: {message}")]
    Panicked { processor: String, message: String },

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

impl StageError {
    pub fn failed(processor: impl Into<String>, message: impl Into<String>) -> Self {
        StageError::Failed {
            processor: processor.into(),
            message: message.into(),
        }
    }
}

/// Reasons a pipeline run stopped before completing every stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },

    #[error("Validation failed with {errors} error(s)")]
    Validation { errors: usize },

    #[error("Run cancelled before stage {stage}")]
    Cancelled { stage: &'static str },

    #[error("Stage {stage} exceeded its time budget ({elapsed:?} > {budget:?})")]
    StageTimeout {
        stage: &'static str,
        elapsed: Duration,
        budget: Duration,
    },
}
