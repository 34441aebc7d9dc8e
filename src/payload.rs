//! Binary record set encoding.
//!
//! The normalized sheet is converted into a typed [`RecordSet`] and encoded
//! with `bincode` (serde integration, standard configuration).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    data::{CellValue, parse_cell},
    schema::SchemaDefinition,
    sheet::SheetData,
    structured::CellError,
    types::FieldType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub table: String,
    pub namespace: String,
    pub fields: Vec<RecordField>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RecordSet {
    /// Builds the record set. Cells that do not parse are stored as
    /// [`CellValue::Null`] and reported back.
    pub fn from_sheet(schema: &SchemaDefinition, sheet: &SheetData) -> (Self, Vec<CellError>) {
        let mut errors = Vec::new();
        let rows = sheet
            .data_rows()
            .map(|(row, cells)| {
                schema
                    .fields
                    .iter()
                    .map(|field| {
                        let text = cells.get(field.column).map(String::as_str).unwrap_or("");
                        parse_cell(text, &field.field_type).unwrap_or_else(|err| {
                            errors.push(CellError {
                                field: field.name.clone(),
                                row,
                                column: field.column,
                                value: text.to_string(),
                                message: format!("{err:#}"),
                            });
                            CellValue::Null
                        })
                    })
                    .collect()
            })
            .collect();
        let fields = schema
            .fields
            .iter()
            .map(|field| RecordField {
                name: field.name.clone(),
                field_type: field.field_type,
            })
            .collect();
        (
            Self {
                table: schema.name.clone(),
                namespace: schema.namespace.clone(),
                fields,
                rows,
            },
            errors,
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &CellValue>> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(index)))
    }
}

pub fn encode(records: &RecordSet) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(records, bincode::config::standard())
}

pub fn decode(bytes: &[u8]) -> Result<RecordSet, bincode::error::DecodeError> {
    let (records, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(records)
}

pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
