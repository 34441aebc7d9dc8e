mod common;

use std::{thread, time::Duration};

use common::SheetBuilder;
use tabledef::{
    error::{Severity, StageError},
    payload,
    pipeline::{Pipeline, PipelineOptions, PreProcessor, Processor, RunLog, Stage},
    processors::{
        INVALID_CELL_VALUE, StandardProcessors, UNKNOWN_REFERENCE_TYPE, standard_pipeline,
    },
    reference::KnownTypes,
    sheet::SheetData,
    validation::{BuiltinRule, RuleSet},
};

fn standard(options: PipelineOptions) -> Pipeline {
    standard_pipeline(
        options,
        StandardProcessors {
            known_types: KnownTypes::with_defaults(),
            ..StandardProcessors::default()
        },
    )
}

fn character() -> SheetData {
    SheetBuilder::new("Character")
        .column("Id", "int")
        .column("Name@Client", "string")
        .column("Grid", "int[][]")
        .column("ItemId@Ref", "int")
        .row(&["1", " Aria ", "1,2,3;4,5,6", "10"])
        .row(&["2", "Borin", "1,2,x;4,5,6", "11"])
        .row(&["", "", "", ""])
        .build()
}

#[test]
fn unknown_reference_type_fails_the_run() {
    let sheet = SheetBuilder::new("Character")
        .column("Id", "int")
        .column("SkillId@Client@Ref", "int")
        .row(&["1", "100"])
        .build();
    let result = standard(PipelineOptions::default()).run(sheet);

    assert!(!result.success);
    assert_eq!(result.failed_stage, Some(Stage::Validate.as_str()));
    assert_eq!(result.validation.failure_count(), 1);
    let finding = &result.validation.errors[0];
    assert_eq!(finding.error_type, UNKNOWN_REFERENCE_TYPE);
    assert_eq!(finding.field.as_deref(), Some("SkillId"));
    assert!(finding.message.contains("'Skill'"));
    assert!(result.errors.iter().any(|e| e.contains("SkillId")));
    assert!(result.payload.is_empty());
}

#[test]
fn bad_cell_is_a_warning_and_the_run_still_succeeds() {
    let result = standard(PipelineOptions::default()).run(character());

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(result.cell_errors.len(), 1);
    assert_eq!(result.cell_errors[0].row, 5);
    let warnings = result
        .validation
        .errors
        .iter()
        .filter(|e| e.error_type == INVALID_CELL_VALUE)
        .collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert!(result.warnings.iter().any(|w| w.contains("Grid")));
}

#[test]
fn successful_run_produces_payload_code_and_timings() {
    let result = standard(PipelineOptions {
        namespace: "Game".into(),
        ..PipelineOptions::default()
    })
    .run(character());
    assert!(result.success);

    let records = payload::decode(&result.payload).unwrap();
    assert_eq!(records.table, "Character");
    assert_eq!(records.namespace, "Game");
    assert_eq!(records.len(), 2);
    assert!(records.rows[1][2].is_null());
    assert_eq!(
        result.payload_digest.as_deref(),
        Some(payload::digest(&result.payload).as_str())
    );

    assert_eq!(result.normalized.cell(4, 1), "Aria");
    assert_eq!(result.normalized.data_row_count(), 2);

    let client = &result.generated_files["client/character.rs"];
    assert!(client.contains("pub name: String,"));
    let server = &result.generated_files["server/character.rs"];
    assert!(!server.contains("pub name"));

    assert_eq!(result.references.len(), 1);
    assert_eq!(result.references[0].target_type, "Item");
    assert_eq!(result.stage_timings.len(), Stage::ALL.len());
    assert!(result.stage_elapsed(Stage::PostProcess).is_some());
}

#[test]
fn missing_header_rows_fail_in_pre_process() {
    let sheet = SheetData::from_str_rows("Broken", &[&["Id"], &["int"]]);
    let result = standard(PipelineOptions::default()).run(sheet);
    assert!(!result.success);
    assert_eq!(result.failed_stage, Some("pre-process"));
    assert!(result.errors[0].contains("at least 4 header rows"));
    assert!(result.schema.is_none());
    assert!(result.generated_files.is_empty());
}

struct Faulty {
    panics: bool,
}

impl Processor for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }
}

impl PreProcessor for Faulty {
    fn process(&self, _sheet: &mut SheetData, _log: &mut RunLog) -> Result<(), StageError> {
        if self.panics {
            panic!("grid exploded");
        }
        Err(StageError::failed(self.name(), "refused"))
    }
}

#[test]
fn processor_panics_are_contained() {
    let mut pipeline = standard(PipelineOptions::default());
    pipeline.add_pre_processor(Faulty { panics: true });
    let result = pipeline.run(character());
    assert!(!result.success);
    assert_eq!(result.failed_stage, Some("pre-process"));
    assert!(result.errors[0].contains("'faulty' panicked: grid exploded"));
}

#[test]
fn processor_errors_skip_later_stages() {
    let mut pipeline = standard(PipelineOptions::default());
    pipeline.add_pre_processor(Faulty { panics: false });
    let result = pipeline.run(character());
    assert!(!result.success);
    assert!(result.errors[0].contains("refused"));
    assert_eq!(result.stage_timings.len(), 1);
    assert!(result.payload.is_empty());
}

struct Slow;

impl Processor for Slow {
    fn name(&self) -> &str {
        "slow"
    }
}

impl PreProcessor for Slow {
    fn process(&self, _sheet: &mut SheetData, _log: &mut RunLog) -> Result<(), StageError> {
        thread::sleep(Duration::from_millis(25));
        Ok(())
    }
}

#[test]
fn stage_over_budget_fails_the_run() {
    let mut pipeline = standard(PipelineOptions {
        stage_budget: Some(Duration::from_millis(1)),
        ..PipelineOptions::default()
    });
    pipeline.add_pre_processor(Slow);
    let result = pipeline.run(character());
    assert!(!result.success);
    assert_eq!(result.failed_stage, Some("pre-process"));
    assert!(result.errors[0].contains("time budget"));
}

#[test]
fn stop_on_validation_error_skips_later_validators() {
    let sheet = SheetBuilder::new("Character")
        .column("Id", "int")
        .column("SkillId@Ref", "int")
        .row(&["1", "100"])
        .build();
    let mut rules = RuleSet::new();
    rules.add_field_rule("SkillId", BuiltinRule::range(1.0, 10.0));
    let settings = || StandardProcessors {
        known_types: KnownTypes::with_defaults(),
        ..StandardProcessors::default()
    };

    let result = standard_pipeline(
        PipelineOptions {
            stop_on_validation_error: true,
            ..PipelineOptions::default()
        },
        StandardProcessors {
            rules,
            ..settings()
        },
    )
    .run(sheet.clone());
    assert_eq!(result.validation.failure_count(), 1);

    let mut rules = RuleSet::new();
    rules.add_field_rule("SkillId", BuiltinRule::range(1.0, 10.0));
    let result = standard_pipeline(
        PipelineOptions::default(),
        StandardProcessors {
            rules,
            ..settings()
        },
    )
    .run(sheet);
    assert_eq!(result.validation.failure_count(), 2);
    assert_eq!(result.validation.type_counts["range"], 1);
}
