//! Plain-text rendering of resolved schemas.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::schema::{FieldDefinition, FieldKind, SchemaDefinition};

const COLUMN_GAP: &str = "  ";

fn single_line(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}

fn width(value: &str) -> usize {
    value.chars().count()
}

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| width(h).max(3)).collect::<Vec<_>>();
    for row in rows {
        for (cell, w) in row.iter().zip(widths.iter_mut()) {
            *w = (*w).max(width(cell));
        }
    }
    let line = |cells: &mut dyn Iterator<Item = String>| {
        let joined = cells
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}", w = *w))
            .join(COLUMN_GAP);
        joined.trim_end().to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", line(&mut headers.iter().map(|h| h.to_string())));
    let _ = writeln!(out, "{}", line(&mut widths.iter().map(|w| "-".repeat(*w))));
    for row in rows {
        let _ = writeln!(out, "{}", line(&mut row.iter().map(|c| single_line(c))));
    }
    out
}

fn kind_label(field: &FieldDefinition) -> String {
    match &field.kind {
        FieldKind::Plain => String::new(),
        FieldKind::Localized => "localized".to_string(),
        FieldKind::Reference(target) => format!("ref {}", target.type_name),
        FieldKind::Array(_) => "array".to_string(),
        FieldKind::Array2D(_) => "2d-array".to_string(),
        FieldKind::Map { entry, .. } => format!("map [{entry}]"),
    }
}

pub fn render_schema(schema: &SchemaDefinition) -> String {
    let headers = ["#", "name", "type", "scope", "kind", "default", "description"];
    let rows = schema
        .fields
        .iter()
        .map(|field| {
            vec![
                field.column.to_string(),
                field.name.clone(),
                field.field_type.to_string(),
                field.scope.to_string(),
                kind_label(field),
                field.default_value.clone().unwrap_or_default(),
                field.description.clone(),
            ]
        })
        .collect::<Vec<_>>();
    let mut out = format!("Table: {}\n", schema.name);
    if !schema.namespace.is_empty() {
        let _ = writeln!(out, "Namespace: {}", schema.namespace);
    }
    out.push_str(&render_table(&headers, &rows));
    out
}

pub fn print_schema(schema: &SchemaDefinition) {
    print!("{}", render_schema(schema));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_table_pads_columns_and_trims_line_ends() {
        let rendered = render_table(
            &["name", "type"],
            &[vec!["Id".into(), "int32".into()], vec!["Matrix".into(), "[[int32]]".into()]],
        );
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "name    type");
        assert_eq!(lines[1], "------  ---------");
        assert_eq!(lines[2], "Id      int32");
        assert_eq!(lines[3], "Matrix  [[int32]]");
    }
}
