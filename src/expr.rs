//! Boolean predicates over a record, used to gate conditional rules.
//!
//! Every field is bound under its schema name with its typed value (lists and
//! maps become tuples). Cells that fail to parse are bound as raw strings, and
//! `row_number` holds the 1-based data row.

use anyhow::{Context, Result};
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue, eval_with_context};

use crate::{
    data::{parse_cell, value_to_evalexpr},
    validation::Record,
};

pub fn build_context(record: &Record<'_>) -> Result<HashMapContext> {
    let mut context: HashMapContext = HashMapContext::new();
    for (field, raw) in record.fields() {
        let value = match parse_cell(raw, &field.field_type) {
            Ok(typed) => value_to_evalexpr(&typed),
            Err(_) => EvalValue::String(raw.to_string()),
        };
        context
            .set_value(field.name.clone(), value)
            .with_context(|| format!("Binding field '{}'", field.name))?;
    }
    context
        .set_value("row_number".into(), EvalValue::Int(record.data_row_number() as i64))
        .context("Binding row_number")?;
    Ok(context)
}

pub fn evaluate_expression_to_bool(expr: &str, context: &HashMapContext) -> Result<bool> {
    let result = eval_with_context(expr, context)
        .with_context(|| format!("Evaluating expression '{expr}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}

/// Predicate text evaluated against each record.
#[derive(Debug, Clone)]
pub struct RecordPredicate {
    expression: String,
}

impl RecordPredicate {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, record: &Record<'_>) -> Result<bool> {
        let context = build_context(record)?;
        evaluate_expression_to_bool(&self.expression, &context)
    }
}
