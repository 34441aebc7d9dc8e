use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{BaseType, FieldType};

pub const ELEMENT_DELIMITER: char = ',';
pub const ROW_DELIMITER: char = ';';
pub const PAIR_DELIMITERS: [char; 2] = [',', ';'];
pub const KEY_VALUE_DELIMITERS: [char; 2] = [':', '='];

/// A typed cell as it is stored in the binary record set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<CellValue>),
    Pairs(Vec<(CellValue, CellValue)>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            CellValue::Int(i) => Some(i as f64),
            CellValue::UInt(u) => Some(u as f64),
            CellValue::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::UInt(u) => u.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Str(s) => s.clone(),
            CellValue::List(items) => {
                if items.iter().any(|item| matches!(item, CellValue::List(_))) {
                    items.iter().map(CellValue::as_display).join(";")
                } else {
                    items.iter().map(CellValue::as_display).join(",")
                }
            }
            CellValue::Pairs(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", k.as_display(), v.as_display()))
                .join(","),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn check_signed_range(parsed: i64, base: BaseType, value: &str) -> Result<()> {
    let fits = match base {
        BaseType::Int8 => i8::try_from(parsed).is_ok(),
        BaseType::Int16 => i16::try_from(parsed).is_ok(),
        BaseType::Int32 => i32::try_from(parsed).is_ok(),
        _ => true,
    };
    if fits {
        Ok(())
    } else {
        Err(anyhow!("Value '{value}' is out of range for {base}"))
    }
}

fn check_unsigned_range(parsed: u64, base: BaseType, value: &str) -> Result<()> {
    let fits = match base {
        BaseType::UInt8 => u8::try_from(parsed).is_ok(),
        BaseType::UInt16 => u16::try_from(parsed).is_ok(),
        BaseType::UInt32 => u32::try_from(parsed).is_ok(),
        _ => true,
    };
    if fits {
        Ok(())
    } else {
        Err(anyhow!("Value '{value}' is out of range for {base}"))
    }
}

fn check_float_range(parsed: f64, base: BaseType, value: &str) -> Result<()> {
    if base == BaseType::Float && parsed.is_finite() && parsed.abs() > f64::from(f32::MAX) {
        Err(anyhow!("Value '{value}' is out of range for {base}"))
    } else {
        Ok(())
    }
}

/// Parses one scalar element. Empty text yields [`CellValue::Null`].
pub fn parse_scalar(value: &str, base: BaseType) -> Result<CellValue> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(CellValue::Null);
    }
    let parsed = match base {
        BaseType::String => CellValue::Str(value.to_string()),
        BaseType::Bool => match parse_bool(value) {
            Some(b) => CellValue::Bool(b),
            None => bail!("Failed to parse '{value}' as bool"),
        },
        BaseType::Float | BaseType::Double => {
            let parsed: f64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as {base}"))?;
            check_float_range(parsed, base, value)?;
            CellValue::Float(parsed)
        }
        signed if signed.is_signed_integer() => {
            let parsed: i64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as {base}"))?;
            check_signed_range(parsed, base, value)?;
            CellValue::Int(parsed)
        }
        _ => {
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as {base}"))?;
            check_unsigned_range(parsed, base, value)?;
            CellValue::UInt(parsed)
        }
    };
    Ok(parsed)
}

pub fn split_elements(text: &str) -> impl Iterator<Item = &str> {
    text.split(ELEMENT_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn split_rows(text: &str) -> impl Iterator<Item = &str> {
    text.split(ROW_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn split_entries(text: &str) -> impl Iterator<Item = &str> {
    text.split(PAIR_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn split_pair(entry: &str) -> Option<(&str, &str)> {
    entry
        .split_once(KEY_VALUE_DELIMITERS)
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Parses a (normalized) cell into its typed value.
pub fn parse_cell(text: &str, field_type: &FieldType) -> Result<CellValue> {
    if text.trim().is_empty() {
        return Ok(match field_type {
            FieldType::Scalar(_) => CellValue::Null,
            FieldType::Array(_) | FieldType::Array2D(_) => CellValue::List(Vec::new()),
            FieldType::Map { .. } | FieldType::KeyValuePairs { .. } => {
                CellValue::Pairs(Vec::new())
            }
        });
    }
    let value = match *field_type {
        FieldType::Scalar(base) => parse_scalar(text, base)?,
        FieldType::Array(base) => CellValue::List(
            split_elements(text)
                .map(|item| parse_scalar(item, base))
                .collect::<Result<Vec<_>>>()?,
        ),
        FieldType::Array2D(base) => CellValue::List(
            split_rows(text)
                .map(|row| {
                    split_elements(row)
                        .map(|item| parse_scalar(item, base))
                        .collect::<Result<Vec<_>>>()
                        .map(CellValue::List)
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        FieldType::Map { key, value } | FieldType::KeyValuePairs { key, value } => {
            CellValue::Pairs(
                split_entries(text)
                    .map(|entry| {
                        let (k, v) = split_pair(entry)
                            .ok_or_else(|| anyhow!("Entry '{entry}' is missing a key separator"))?;
                        Ok((parse_scalar(k, key)?, parse_scalar(v, value)?))
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };
    Ok(value)
}

pub fn value_to_evalexpr(value: &CellValue) -> evalexpr::Value {
    match value {
        CellValue::Null => evalexpr::Value::Empty,
        CellValue::Bool(b) => evalexpr::Value::Boolean(*b),
        CellValue::Int(i) => evalexpr::Value::Int(*i),
        CellValue::UInt(u) => match i64::try_from(*u) {
            Ok(i) => evalexpr::Value::Int(i),
            Err(_) => evalexpr::Value::Float(*u as f64),
        },
        CellValue::Float(f) => evalexpr::Value::Float(*f),
        CellValue::Str(s) => evalexpr::Value::String(s.clone()),
        CellValue::List(items) => {
            evalexpr::Value::Tuple(items.iter().map(value_to_evalexpr).collect())
        }
        CellValue::Pairs(pairs) => evalexpr::Value::Tuple(
            pairs
                .iter()
                .map(|(k, v)| {
                    evalexpr::Value::Tuple(vec![value_to_evalexpr(k), value_to_evalexpr(v)])
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::Value as EvalValue;

    #[test]
    fn parse_scalar_handles_empty_and_boolean_inputs() {
        assert_eq!(parse_scalar("", BaseType::Int32).unwrap(), CellValue::Null);
        assert_eq!(parse_scalar("Yes", BaseType::Bool).unwrap(), CellValue::Bool(true));
        assert_eq!(parse_scalar("0", BaseType::Bool).unwrap(), CellValue::Bool(false));
        assert!(parse_scalar("maybe", BaseType::Bool).is_err());
    }

    #[test]
    fn parse_scalar_enforces_integer_width() {
        assert_eq!(parse_scalar("127", BaseType::Int8).unwrap(), CellValue::Int(127));
        assert!(parse_scalar("128", BaseType::Int8).is_err());
        assert!(parse_scalar("-1", BaseType::UInt16).is_err());
        assert_eq!(parse_scalar(" 42 ", BaseType::UInt8).unwrap(), CellValue::UInt(42));
    }

    #[test]
    fn parse_scalar_keeps_float_within_single_precision() {
        assert_eq!(parse_scalar("1.5", BaseType::Float).unwrap(), CellValue::Float(1.5));
        let err = parse_scalar("1e300", BaseType::Float).unwrap_err();
        assert!(err.to_string().contains("out of range for float"));
        assert!(parse_scalar("-1e39", BaseType::Float).is_err());
        assert_eq!(parse_scalar("1e300", BaseType::Double).unwrap(), CellValue::Float(1e300));
    }

    #[test]
    fn parse_cell_reads_ragged_matrix() {
        let parsed = parse_cell("1,2;3", &FieldType::Array2D(BaseType::Int32)).unwrap();
        assert_eq!(
            parsed,
            CellValue::List(vec![
                CellValue::List(vec![CellValue::Int(1), CellValue::Int(2)]),
                CellValue::List(vec![CellValue::Int(3)]),
            ])
        );
        assert_eq!(parsed.as_display(), "1,2;3");
    }

    #[test]
    fn parse_cell_reads_pairs_with_either_separator() {
        let ty = FieldType::Map {
            key: BaseType::String,
            value: BaseType::Int32,
        };
        let parsed = parse_cell("hp:10;mp=5", &ty).unwrap();
        assert_eq!(
            parsed,
            CellValue::Pairs(vec![
                (CellValue::Str("hp".into()), CellValue::Int(10)),
                (CellValue::Str("mp".into()), CellValue::Int(5)),
            ])
        );
    }

    #[test]
    fn value_to_evalexpr_preserves_variants() {
        assert_eq!(value_to_evalexpr(&CellValue::Int(42)), EvalValue::Int(42));
        assert_eq!(value_to_evalexpr(&CellValue::UInt(7)), EvalValue::Int(7));
        assert_eq!(value_to_evalexpr(&CellValue::Null), EvalValue::Empty);
    }
}
