//! Stage-ordered processing of one table.
//!
//! A run moves through five stages: pre-process, code generation, data
//! process, validate, post-process. Each stage has its own processor trait
//! and hands its processors only the part of the [`ProcessingContext`] they
//! may touch. Within a stage, processors run in ascending priority order.
//!
//! Every processor call is isolated: an `Err` or a panic becomes a stage
//! failure recorded on the result, and the remaining stages are skipped. A
//! run never returns an error to its caller; inspect
//! [`PipelineResult::success`] and [`PipelineResult::errors`] instead.

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    codegen::GeneratedFile,
    error::{Diagnostic, PipelineError, StageError},
    localization::LocalizationTable,
    payload,
    reference::ReferenceRelation,
    schema::{SchemaDefinition, resolve_schema},
    sheet::SheetData,
    structured::CellError,
    validation::ValidationResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    PreProcess,
    CodeGeneration,
    DataProcess,
    Validate,
    PostProcess,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::PreProcess,
        Stage::CodeGeneration,
        Stage::DataProcess,
        Stage::Validate,
        Stage::PostProcess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::PreProcess => "pre-process",
            Stage::CodeGeneration => "code-generation",
            Stage::DataProcess => "data-process",
            Stage::Validate => "validate",
            Stage::PostProcess => "post-process",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag checked before every stage and processor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Messages accumulated during a run. Entries are mirrored to the `log`
/// facade as they are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunLog {
    pub logs: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RunLog {
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{message}");
        self.logs.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.errors.push(message);
    }
}

pub trait Processor {
    fn name(&self) -> &str;

    /// Lower runs first. Ties keep registration order.
    fn priority(&self) -> i32 {
        0
    }
}

/// Runs on the raw grid before the header is resolved.
pub trait PreProcessor: Processor {
    fn process(&self, sheet: &mut SheetData, log: &mut RunLog) -> Result<(), StageError>;
}

pub trait CodeGenerator: Processor {
    fn generate(
        &self,
        schema: &SchemaDefinition,
        log: &mut RunLog,
    ) -> Result<Vec<GeneratedFile>, StageError>;
}

pub trait DataProcessor: Processor {
    fn process(&self, ctx: &mut DataContext<'_>) -> Result<(), StageError>;
}

pub trait Validator: Processor {
    fn validate(&self, input: &ValidationInput<'_>) -> Result<ValidationResult, StageError>;
}

pub trait PostProcessor: Processor {
    fn process(&self, ctx: &mut PostProcessContext<'_>) -> Result<(), StageError>;
}

/// What data processors may read and change.
pub struct DataContext<'a> {
    pub schema: &'a mut SchemaDefinition,
    pub sheet: &'a mut SheetData,
    pub cell_errors: &'a mut Vec<CellError>,
    pub relations: &'a mut Vec<ReferenceRelation>,
    pub localization: &'a mut LocalizationTable,
    pub log: &'a mut RunLog,
}

/// Read-only view handed to validators.
pub struct ValidationInput<'a> {
    pub schema: &'a SchemaDefinition,
    pub sheet: &'a SheetData,
    pub cell_errors: &'a [CellError],
    pub relations: &'a [ReferenceRelation],
}

pub struct PostProcessContext<'a> {
    pub schema: &'a SchemaDefinition,
    pub sheet: &'a SheetData,
    pub validation: &'a ValidationResult,
    pub payload: &'a mut Vec<u8>,
    pub log: &'a mut RunLog,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub namespace: String,
    /// Stop the validation stage after the first validator reporting a
    /// failure.
    pub stop_on_validation_error: bool,
    pub stage_budget: Option<Duration>,
    pub cancellation: CancellationToken,
}

fn missing_schema(stage: Stage) -> PipelineError {
    PipelineError::Stage {
        stage: stage.as_str(),
        source: StageError::failed("orchestrator", "schema has not been resolved"),
    }
}

/// Per-run state. Created from the input sheet and consumed into the
/// [`PipelineResult`].
#[derive(Debug)]
pub struct ProcessingContext {
    table: String,
    sheet: SheetData,
    schema: Option<SchemaDefinition>,
    diagnostics: Vec<Diagnostic>,
    log: RunLog,
    generated_files: BTreeMap<String, String>,
    cell_errors: Vec<CellError>,
    relations: Vec<ReferenceRelation>,
    localization: LocalizationTable,
    validation: ValidationResult,
    payload: Vec<u8>,
}

impl ProcessingContext {
    pub fn new(sheet: SheetData) -> Self {
        Self {
            table: sheet.name.clone(),
            sheet,
            schema: None,
            diagnostics: Vec::new(),
            log: RunLog::default(),
            generated_files: BTreeMap::new(),
            cell_errors: Vec::new(),
            relations: Vec::new(),
            localization: LocalizationTable::new(),
            validation: ValidationResult::new(),
            payload: Vec::new(),
        }
    }

    fn schema_or_fail(&self, stage: Stage) -> Result<&SchemaDefinition, PipelineError> {
        self.schema.as_ref().ok_or_else(|| missing_schema(stage))
    }

    fn data_view(&mut self) -> Option<DataContext<'_>> {
        let schema = self.schema.as_mut()?;
        Some(DataContext {
            schema,
            sheet: &mut self.sheet,
            cell_errors: &mut self.cell_errors,
            relations: &mut self.relations,
            localization: &mut self.localization,
            log: &mut self.log,
        })
    }

    fn validation_view(&self) -> Option<ValidationInput<'_>> {
        Some(ValidationInput {
            schema: self.schema.as_ref()?,
            sheet: &self.sheet,
            cell_errors: &self.cell_errors,
            relations: &self.relations,
        })
    }

    fn post_view(&mut self) -> Option<PostProcessContext<'_>> {
        Some(PostProcessContext {
            schema: self.schema.as_ref()?,
            sheet: &self.sheet,
            validation: &self.validation,
            payload: &mut self.payload,
            log: &mut self.log,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub success: bool,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub payload_digest: Option<String>,
    pub generated_files: BTreeMap<String, String>,
    pub logs: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub failed_stage: Option<&'static str>,
    pub diagnostics: Vec<Diagnostic>,
    pub validation: ValidationResult,
    pub localization: LocalizationTable,
    pub references: Vec<ReferenceRelation>,
    pub cell_errors: Vec<CellError>,
    pub schema: Option<SchemaDefinition>,
    #[serde(skip)]
    pub normalized: SheetData,
    pub stage_timings: Vec<StageTiming>,
    pub elapsed: Duration,
}

impl PipelineResult {
    pub fn stage_elapsed(&self, stage: Stage) -> Option<Duration> {
        self.stage_timings
            .iter()
            .find(|t| t.stage == stage.as_str())
            .map(|t| t.elapsed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Processor registry plus run options.
#[derive(Default)]
pub struct Pipeline {
    options: PipelineOptions,
    pre: Vec<Box<dyn PreProcessor>>,
    codegen: Vec<Box<dyn CodeGenerator>>,
    data: Vec<Box<dyn DataProcessor>>,
    validators: Vec<Box<dyn Validator>>,
    post: Vec<Box<dyn PostProcessor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |items: Vec<&str>| items.join(", ");
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .field("pre", &names(self.pre.iter().map(|p| p.name()).collect()))
            .field("codegen", &names(self.codegen.iter().map(|p| p.name()).collect()))
            .field("data", &names(self.data.iter().map(|p| p.name()).collect()))
            .field("validators", &names(self.validators.iter().map(|p| p.name()).collect()))
            .field("post", &names(self.post.iter().map(|p| p.name()).collect()))
            .finish()
    }
}

macro_rules! register {
    ($list:expr, $processor:expr) => {{
        $list.push(Box::new($processor));
        $list.sort_by_key(|p| p.priority());
    }};
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.options.cancellation.clone()
    }

    pub fn add_pre_processor(&mut self, processor: impl PreProcessor + 'static) -> &mut Self {
        register!(self.pre, processor);
        self
    }

    pub fn add_code_generator(&mut self, processor: impl CodeGenerator + 'static) -> &mut Self {
        register!(self.codegen, processor);
        self
    }

    pub fn add_data_processor(&mut self, processor: impl DataProcessor + 'static) -> &mut Self {
        register!(self.data, processor);
        self
    }

    pub fn add_validator(&mut self, processor: impl Validator + 'static) -> &mut Self {
        register!(self.validators, processor);
        self
    }

    pub fn add_post_processor(&mut self, processor: impl PostProcessor + 'static) -> &mut Self {
        register!(self.post, processor);
        self
    }

    /// Registered processor names per stage, in execution order.
    pub fn processor_names(&self, stage: Stage) -> Vec<&str> {
        match stage {
            Stage::PreProcess => self.pre.iter().map(|p| p.name()).collect(),
            Stage::CodeGeneration => self.codegen.iter().map(|p| p.name()).collect(),
            Stage::DataProcess => self.data.iter().map(|p| p.name()).collect(),
            Stage::Validate => self.validators.iter().map(|p| p.name()).collect(),
            Stage::PostProcess => self.post.iter().map(|p| p.name()).collect(),
        }
    }

    pub fn run(&self, sheet: SheetData) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut ctx = ProcessingContext::new(sheet);
        let mut timings = Vec::with_capacity(Stage::ALL.len());
        info!("Run {run_id}: compiling table '{}'", ctx.table);

        let outcome = self.run_stages(&mut ctx, &mut timings);
        let failed_stage = match &outcome {
            Ok(()) => None,
            Err(err) => {
                ctx.log.error(err.to_string());
                Some(match err {
                    PipelineError::Stage { stage, .. }
                    | PipelineError::Cancelled { stage }
                    | PipelineError::StageTimeout { stage, .. } => *stage,
                    PipelineError::Validation { .. } => Stage::Validate.as_str(),
                })
            }
        };
        let success = outcome.is_ok() && ctx.log.errors.is_empty();
        let elapsed = clock.elapsed();
        let payload_digest = (!ctx.payload.is_empty()).then(|| payload::digest(&ctx.payload));
        if success {
            info!(
                "Run {run_id}: table '{}' compiled in {:?} ({} warning(s))",
                ctx.table,
                elapsed,
                ctx.log.warnings.len()
            );
        } else {
            warn!(
                "Run {run_id}: table '{}' failed with {} error(s)",
                ctx.table,
                ctx.log.errors.len()
            );
        }

        PipelineResult {
            run_id,
            success,
            table: ctx.table,
            started_at,
            payload: ctx.payload,
            payload_digest,
            generated_files: ctx.generated_files,
            logs: ctx.log.logs,
            warnings: ctx.log.warnings,
            errors: ctx.log.errors,
            failed_stage,
            diagnostics: ctx.diagnostics,
            validation: ctx.validation,
            localization: ctx.localization,
            references: ctx.relations,
            cell_errors: ctx.cell_errors,
            schema: ctx.schema,
            normalized: ctx.sheet,
            stage_timings: timings,
            elapsed,
        }
    }

    fn check_cancelled(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.options.cancellation.is_cancelled() {
            Err(PipelineError::Cancelled {
                stage: stage.as_str(),
            })
        } else {
            Ok(())
        }
    }

    fn invoke<T>(
        &self,
        stage: Stage,
        processor: &str,
        call: impl FnOnce() -> Result<T, StageError>,
    ) -> Result<T, PipelineError> {
        self.check_cancelled(stage)?;
        debug!("[{stage}] running '{processor}'");
        let source = match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(payload) => StageError::Panicked {
                processor: processor.to_string(),
                message: panic_message(payload.as_ref()),
            },
        };
        Err(PipelineError::Stage {
            stage: stage.as_str(),
            source,
        })
    }

    fn timed(
        &self,
        stage: Stage,
        timings: &mut Vec<StageTiming>,
        body: impl FnOnce() -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        self.check_cancelled(stage)?;
        let start = Instant::now();
        let outcome = body();
        let elapsed = start.elapsed();
        timings.push(StageTiming {
            stage: stage.as_str(),
            elapsed,
        });
        outcome?;
        if let Some(budget) = self.options.stage_budget
            && elapsed > budget
        {
            return Err(PipelineError::StageTimeout {
                stage: stage.as_str(),
                elapsed,
                budget,
            });
        }
        Ok(())
    }

    fn run_stages(
        &self,
        ctx: &mut ProcessingContext,
        timings: &mut Vec<StageTiming>,
    ) -> Result<(), PipelineError> {
        self.timed(Stage::PreProcess, timings, || self.pre_process(ctx))?;
        self.timed(Stage::CodeGeneration, timings, || self.generate_code(ctx))?;
        self.timed(Stage::DataProcess, timings, || self.process_data(ctx))?;
        self.timed(Stage::Validate, timings, || self.validate(ctx))?;
        self.timed(Stage::PostProcess, timings, || self.post_process(ctx))
    }

    fn pre_process(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        let stage = Stage::PreProcess;
        for processor in &self.pre {
            let (sheet, log) = (&mut ctx.sheet, &mut ctx.log);
            self.invoke(stage, processor.name(), || processor.process(sheet, log))?;
        }
        let resolution = self.invoke(stage, "schema-resolver", || {
            resolve_schema(&ctx.sheet, &self.options.namespace)
        })?;
        for diagnostic in &resolution.diagnostics {
            ctx.log.warn(format!("{}: {diagnostic}", ctx.table));
        }
        ctx.log.info(format!(
            "Resolved {} field(s) for '{}'",
            resolution.schema.fields.len(),
            ctx.table
        ));
        ctx.diagnostics = resolution.diagnostics;
        ctx.schema = Some(resolution.schema);
        Ok(())
    }

    fn generate_code(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        let stage = Stage::CodeGeneration;
        for processor in &self.codegen {
            let schema = ctx.schema_or_fail(stage)?;
            let mut log = RunLog::default();
            let files = self.invoke(stage, processor.name(), || {
                processor.generate(schema, &mut log)
            })?;
            ctx.log.logs.append(&mut log.logs);
            ctx.log.warnings.append(&mut log.warnings);
            ctx.log.errors.append(&mut log.errors);
            for file in files {
                ctx.log.info(format!("Generated {}", file.path));
                ctx.generated_files.insert(file.path, file.contents);
            }
        }
        Ok(())
    }

    fn process_data(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        let stage = Stage::DataProcess;
        for processor in &self.data {
            let Some(mut view) = ctx.data_view() else {
                return Err(missing_schema(stage));
            };
            self.invoke(stage, processor.name(), || processor.process(&mut view))?;
        }
        Ok(())
    }

    fn validate(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        let stage = Stage::Validate;
        let mut combined = ValidationResult::new();
        for processor in &self.validators {
            let Some(input) = ctx.validation_view() else {
                return Err(missing_schema(stage));
            };
            let result = self.invoke(stage, processor.name(), || processor.validate(&input))?;
            let failed = !result.is_valid;
            combined.merge(result);
            if failed && self.options.stop_on_validation_error {
                debug!("[{stage}] stopping after '{}' reported failures", processor.name());
                break;
            }
        }
        for finding in &combined.errors {
            if finding.severity.is_failure() {
                ctx.log.error(format!("{}: {finding}", ctx.table));
            } else {
                ctx.log.warn(format!("{}: {finding}", ctx.table));
            }
        }
        let failures = combined.failure_count();
        ctx.validation = combined;
        if failures > 0 {
            return Err(PipelineError::Validation { errors: failures });
        }
        Ok(())
    }

    fn post_process(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        let stage = Stage::PostProcess;
        for processor in &self.post {
            let Some(mut view) = ctx.post_view() else {
                return Err(missing_schema(stage));
            };
            self.invoke(stage, processor.name(), || processor.process(&mut view))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        priority: i32,
    }

    impl Processor for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    impl PreProcessor for Recorder {
        fn process(&self, _sheet: &mut SheetData, log: &mut RunLog) -> Result<(), StageError> {
            log.info(self.name);
            Ok(())
        }
    }

    fn sheet() -> SheetData {
        SheetData::from_str_rows("T", &[&["Id"], &["int"], &[""], &[""], &["1"]])
    }

    #[test]
    fn processors_run_in_priority_order_with_stable_ties() {
        let mut pipeline = Pipeline::default();
        pipeline
            .add_pre_processor(Recorder { name: "late", priority: 10 })
            .add_pre_processor(Recorder { name: "first", priority: -1 })
            .add_pre_processor(Recorder { name: "tie", priority: 10 });
        assert_eq!(pipeline.processor_names(Stage::PreProcess), vec!["first", "late", "tie"]);
        let result = pipeline.run(sheet());
        assert!(result.success);
        assert_eq!(&result.logs[..3], &["first", "late", "tie"]);
    }

    #[test]
    fn cancelled_run_fails_before_first_stage() {
        let pipeline = Pipeline::default();
        pipeline.cancellation().cancel();
        let result = pipeline.run(sheet());
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some("pre-process"));
        assert!(result.schema.is_none());
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
