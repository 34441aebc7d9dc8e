//! Column type grammar.
//!
//! Accepted forms (case-insensitive keywords):
//!
//! | Form                                            | Shape            |
//! |-------------------------------------------------|------------------|
//! | `int`                                           | scalar           |
//! | `int[]`, `repeated int`, `[int]`                | 1-D array        |
//! | `int[][]`, `repeated repeated int`, `[[int]]`   | 2-D array        |
//! | `map<string,int>`, `map<string;int>`            | map              |
//! | `kvp<string,int>`                               | key/value pairs  |
//!
//! Resolution never fails: malformed text degrades to `string` and the
//! problem is reported as a [`Diagnostic`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, DiagnosticCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Bool,
    String,
}

impl BaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "sbyte" | "int8" => BaseType::Int8,
            "short" | "int16" => BaseType::Int16,
            "int" | "int32" => BaseType::Int32,
            "long" | "int64" => BaseType::Int64,
            "byte" | "uint8" => BaseType::UInt8,
            "ushort" | "uint16" => BaseType::UInt16,
            "uint" | "uint32" => BaseType::UInt32,
            "ulong" | "uint64" => BaseType::UInt64,
            "float" => BaseType::Float,
            "double" => BaseType::Double,
            "bool" | "boolean" => BaseType::Bool,
            "string" => BaseType::String,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaseType::Int8 => "int8",
            BaseType::Int16 => "int16",
            BaseType::Int32 => "int32",
            BaseType::Int64 => "int64",
            BaseType::UInt8 => "uint8",
            BaseType::UInt16 => "uint16",
            BaseType::UInt32 => "uint32",
            BaseType::UInt64 => "uint64",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Bool => "bool",
            BaseType::String => "string",
        }
    }

    pub fn rust_type(self) -> &'static str {
        match self {
            BaseType::Int8 => "i8",
            BaseType::Int16 => "i16",
            BaseType::Int32 => "i32",
            BaseType::Int64 => "i64",
            BaseType::UInt8 => "u8",
            BaseType::UInt16 => "u16",
            BaseType::UInt32 => "u32",
            BaseType::UInt64 => "u64",
            BaseType::Float => "f32",
            BaseType::Double => "f64",
            BaseType::Bool => "bool",
            BaseType::String => "String",
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            BaseType::Int8 | BaseType::Int16 | BaseType::Int32 | BaseType::Int64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            BaseType::UInt8 | BaseType::UInt16 | BaseType::UInt32 | BaseType::UInt64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_signed_integer()
            || self.is_unsigned_integer()
            || matches!(self, BaseType::Float | BaseType::Double)
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Scalar(BaseType),
    Array(BaseType),
    Array2D(BaseType),
    Map { key: BaseType, value: BaseType },
    KeyValuePairs { key: BaseType, value: BaseType },
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::Scalar(BaseType::String)
    }
}

impl FieldType {
    /// Element type of arrays, the value type of maps, or the scalar itself.
    pub fn element(&self) -> BaseType {
        match *self {
            FieldType::Scalar(base) | FieldType::Array(base) | FieldType::Array2D(base) => base,
            FieldType::Map { value, .. } | FieldType::KeyValuePairs { value, .. } => value,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, FieldType::Scalar(_))
    }

    /// Same shape with the element (or map value) type replaced.
    pub fn with_element(self, base: BaseType) -> Self {
        match self {
            FieldType::Scalar(_) => FieldType::Scalar(base),
            FieldType::Array(_) => FieldType::Array(base),
            FieldType::Array2D(_) => FieldType::Array2D(base),
            FieldType::Map { key, .. } => FieldType::Map { key, value: base },
            FieldType::KeyValuePairs { key, .. } => FieldType::KeyValuePairs { key, value: base },
        }
    }

    pub fn rust_type(&self) -> String {
        match *self {
            FieldType::Scalar(base) => base.rust_type().to_string(),
            FieldType::Array(base) => format!("Vec<{}>", base.rust_type()),
            FieldType::Array2D(base) => format!("Vec<Vec<{}>>", base.rust_type()),
            FieldType::Map { key, value } => {
                format!("BTreeMap<{}, {}>", key.rust_type(), value.rust_type())
            }
            FieldType::KeyValuePairs { key, value } => {
                format!("Vec<({}, {})>", key.rust_type(), value.rust_type())
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(base) => write!(f, "{base}"),
            FieldType::Array(base) => write!(f, "[{base}]"),
            FieldType::Array2D(base) => write!(f, "[[{base}]]"),
            FieldType::Map { key, value } => write!(f, "map<{key},{value}>"),
            FieldType::KeyValuePairs { key, value } => write!(f, "kvp<{key},{value}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeResolution {
    pub field_type: FieldType,
    pub diagnostics: Vec<Diagnostic>,
}

impl TypeResolution {
    fn resolved(field_type: FieldType) -> Self {
        Self {
            field_type,
            diagnostics: Vec::new(),
        }
    }

    fn degraded(code: DiagnosticCode, message: String) -> Self {
        Self {
            field_type: FieldType::default(),
            diagnostics: vec![Diagnostic::warning(code, message)],
        }
    }
}

const MAX_ARRAY_DEPTH: usize = 2;

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn resolve_pair(inner: &str, original: &str) -> Result<(BaseType, BaseType), String> {
    let mut parts = inner.splitn(2, [',', ';']);
    let key = parts.next().map(str::trim).unwrap_or_default();
    let value = parts.next().map(str::trim).unwrap_or_default();
    if key.is_empty() || value.is_empty() {
        return Err(format!(
            "Type '{original}' must name both a key and a value type"
        ));
    }
    let key = BaseType::from_name(key)
        .ok_or_else(|| format!("Unknown key type '{key}' in '{original}'"))?;
    let value = BaseType::from_name(value)
        .ok_or_else(|| format!("Unknown value type '{value}' in '{original}'"))?;
    Ok((key, value))
}

/// Resolves declared column type text. Always yields a type.
pub fn resolve_type(text: &str) -> TypeResolution {
    let original = text.trim();
    if original.is_empty() {
        return TypeResolution::degraded(
            DiagnosticCode::MalformedType,
            "Empty type declaration; defaulting to string".to_string(),
        );
    }

    for (prefix, is_map) in [("map<", true), ("kvp<", false)] {
        if let Some(rest) = strip_prefix_ignore_case(original, prefix) {
            let Some(inner) = rest.strip_suffix('>') else {
                return TypeResolution::degraded(
                    DiagnosticCode::MalformedType,
                    format!("Unterminated type '{original}'; defaulting to string"),
                );
            };
            return match resolve_pair(inner, original) {
                Ok((key, value)) if is_map => {
                    TypeResolution::resolved(FieldType::Map { key, value })
                }
                Ok((key, value)) => {
                    TypeResolution::resolved(FieldType::KeyValuePairs { key, value })
                }
                Err(message) => TypeResolution::degraded(
                    DiagnosticCode::MalformedType,
                    format!("{message}; defaulting to string"),
                ),
            };
        }
    }

    let mut depth = 0usize;
    let mut rest = original;
    loop {
        if let Some(stripped) = strip_prefix_ignore_case(rest, "repeated ") {
            rest = stripped.trim_start();
        } else if let Some(stripped) = rest.strip_suffix("[]") {
            rest = stripped.trim_end();
        } else if let Some(stripped) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            rest = stripped.trim();
        } else {
            break;
        }
        depth += 1;
    }

    if depth > MAX_ARRAY_DEPTH {
        return TypeResolution::degraded(
            DiagnosticCode::MalformedType,
            format!("Type '{original}' nests arrays deeper than two levels; defaulting to string"),
        );
    }
    if rest.is_empty() || rest.contains(['[', ']', '<', '>', ' ']) {
        return TypeResolution::degraded(
            DiagnosticCode::MalformedType,
            format!("Malformed type '{original}'; defaulting to string"),
        );
    }

    let mut diagnostics = Vec::new();
    let base = BaseType::from_name(rest).unwrap_or_else(|| {
        diagnostics.push(Diagnostic::warning(
            DiagnosticCode::UnknownBaseType,
            format!("Unknown base type '{rest}' in '{original}'; defaulting to string"),
        ));
        BaseType::String
    });

    let field_type = match depth {
        0 => FieldType::Scalar(base),
        1 => FieldType::Array(base),
        _ => FieldType::Array2D(base),
    };
    TypeResolution {
        field_type,
        diagnostics,
    }
}
