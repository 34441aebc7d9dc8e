mod common;

use common::SheetBuilder;
use tabledef::{
    error::Severity,
    schema::{SchemaDefinition, resolve_schema},
    sheet::SheetData,
    validation::{
        BuiltinRule, ConditionalRule, CustomRule, Record, RuleOutcome, RuleSet, TableRules,
    },
};

fn heroes() -> (SchemaDefinition, SheetData) {
    let sheet = SheetBuilder::new("Hero")
        .column("Name", "string")
        .column("Level", "int")
        .column("Title", "string")
        .column("Code", "string")
        .row(&["Aria", "12", "", "AB-1"])
        .row(&["", "3", "", "zz"])
        .row(&["Borin", "120", "Lord", "CD-2"])
        .build();
    let schema = resolve_schema(&sheet, "").unwrap().schema;
    (schema, sheet)
}

#[test]
fn field_rules_follow_schema_order_not_registration_order() {
    let (schema, sheet) = heroes();
    let mut rules = RuleSet::new();
    rules
        .add_field_rule("Code", BuiltinRule::pattern("^[A-Z]{2}-[0-9]$").unwrap())
        .add_field_rule("Level", BuiltinRule::range(1.0, 99.0))
        .add_field_rule("Name", BuiltinRule::required());
    let result = rules.validate_sheet(&schema, &sheet);

    let order = result
        .errors
        .iter()
        .map(|e| (e.row.unwrap(), e.field.clone().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        order,
        vec![
            (5, "Name".to_string()),
            (5, "Code".to_string()),
            (6, "Level".to_string()),
        ]
    );
    assert!(!result.is_valid);
    assert_eq!(result.count(Severity::Error), 3);
    assert_eq!(result.type_counts["range"], 1);
}

#[test]
fn stop_on_first_error_halts_at_the_first_finding() {
    let (schema, sheet) = heroes();
    let mut rules = RuleSet::new();
    rules.stop_on_first_error = true;
    rules
        .add_field_rule("Name", BuiltinRule::required().with_severity(Severity::Warning))
        .add_field_rule("Level", BuiltinRule::range(1.0, 99.0));
    let result = rules.validate_sheet(&schema, &sheet);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].severity, Severity::Warning);
    assert!(result.is_valid);
}

#[test]
fn global_conditional_and_custom_rules_run_in_that_order() {
    let (schema, sheet) = heroes();
    let mut rules = RuleSet::new();
    rules
        .add_custom(CustomRule::new("custom", Severity::Info, |_| {
            RuleOutcome::Fail("custom".into())
        }))
        .add_conditional(ConditionalRule::new(
            "Title",
            |record: &Record<'_>| record.row() == 4,
            Box::new(BuiltinRule::required()),
        ))
        .add_global(CustomRule::new("global", Severity::Info, |_| {
            RuleOutcome::Fail("global".into())
        }));
    let result = rules.validate_sheet(&schema, &sheet);
    let first_row = result
        .errors
        .iter()
        .filter(|e| e.row == Some(4))
        .map(|e| e.error_type.as_str())
        .collect::<Vec<_>>();
    assert_eq!(first_row, vec!["global", "required", "custom"]);
    assert_eq!(result.count(Severity::Info), 6);
    assert_eq!(result.failure_count(), 1);
}

#[test]
fn expression_conditions_see_typed_values() {
    let (schema, sheet) = heroes();
    let mut rules = RuleSet::new();
    rules.add_conditional(ConditionalRule::when_expression(
        "Title",
        "Level >= 10 && row_number != 3",
        Box::new(BuiltinRule::required()),
    ));
    let result = rules.validate_sheet(&schema, &sheet);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row, Some(4));
    assert_eq!(result.errors[0].field.as_deref(), Some("Title"));
}

#[test]
fn rules_load_from_yaml_config() {
    let (schema, sheet) = heroes();
    let config: TableRules = serde_yaml::from_str(
        r#"
stop_on_first_error: false
rules:
  - field: Name
    rule: min_length
    length: 4
  - field: Level
    rule: range
    min: 1
    max: 120
    inclusive: false
    severity: critical
  - field: Title
    rule: max_length
    length: 3
    when: "Level > 100"
  - field: Missing
    rule: required
"#,
    )
    .unwrap();
    let rules = RuleSet::from_config(&config).unwrap();
    assert_eq!(rules.unknown_fields(&schema), vec!["Missing".to_string()]);
    let result = rules.validate_sheet(&schema, &sheet);
    let found = result
        .errors
        .iter()
        .map(|e| (e.row.unwrap(), e.error_type.as_str(), e.severity))
        .collect::<Vec<_>>();
    assert_eq!(
        found,
        vec![
            (6, "range", Severity::Critical),
            (6, "max_length", Severity::Error),
        ]
    );
}

#[test]
fn invalid_pattern_in_config_is_an_error() {
    let config: TableRules =
        serde_yaml::from_str("rules:\n  - field: Code\n    rule: pattern\n    pattern: \"([\"\n").unwrap();
    let err = RuleSet::from_config(&config).unwrap_err();
    assert!(format!("{err:#}").contains("Code"));
}
