//! Rust source generation for client and server targets.

use std::fmt::Write as _;

use heck::{ToSnakeCase, ToUpperCamelCase};

use crate::{
    schema::{FieldDefinition, SchemaDefinition},
    tags::CodeTarget,
    types::FieldType,
};

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while", "yield",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

pub fn struct_name(schema: &SchemaDefinition) -> String {
    schema.name.to_upper_camel_case()
}

pub fn field_ident(name: &str) -> String {
    let snake = name.to_snake_case();
    if RUST_KEYWORDS.contains(&snake.as_str()) {
        format!("r#{snake}")
    } else {
        snake
    }
}

pub fn artifact_path(schema: &SchemaDefinition, target: CodeTarget) -> String {
    format!("{}/{}.rs", target.as_str(), schema.name.to_snake_case())
}

fn fields_for(schema: &SchemaDefinition, target: CodeTarget) -> Vec<&FieldDefinition> {
    schema
        .fields
        .iter()
        .filter(|field| field.scope.includes(target))
        .collect()
}

/// Renders the record struct of `schema` for `target`, or `None` when no
/// field is generated for that target.
pub fn render_struct(schema: &SchemaDefinition, target: CodeTarget) -> Option<GeneratedFile> {
    let fields = fields_for(schema, target);
    if fields.is_empty() {
        return None;
    }
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by tabledef from table '{}'. Do not edit.", schema.name);
    if fields
        .iter()
        .any(|f| matches!(f.field_type, FieldType::Map { .. }))
    {
        let _ = writeln!(out, "\nuse std::collections::BTreeMap;");
    }
    let _ = writeln!(out);
    if !schema.namespace.is_empty() {
        let _ = writeln!(out, "/// `{}::{}`", schema.namespace, schema.name);
    }
    let _ = writeln!(out, "#[derive(Debug, Clone, PartialEq)]");
    let _ = writeln!(out, "pub struct {} {{", struct_name(schema));
    for field in fields {
        if !field.description.is_empty() {
            for line in field.description.lines() {
                let _ = writeln!(out, "    /// {}", line.trim());
            }
        }
        if let Some(target) = field.reference() {
            let _ = writeln!(out, "    /// Id of a `{}` record.", target.type_name);
        }
        let _ = writeln!(
            out,
            "    pub {}: {},",
            field_ident(&field.name),
            field.field_type.rust_type()
        );
    }
    let _ = writeln!(out, "}}");
    Some(GeneratedFile {
        path: artifact_path(schema, target),
        contents: out,
    })
}

pub fn generate(schema: &SchemaDefinition) -> Vec<GeneratedFile> {
    CodeTarget::ALL
        .iter()
        .filter_map(|target| render_struct(schema, *target))
        .collect()
}
