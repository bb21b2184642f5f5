// src/legacy/codec.rs

//! Field codec shared by the b1 and bz1 layouts
//!
//! Each measurement carries a field table assigning a one-byte id and a type
//! to every field. A stored point is the concatenation of `[id][data]` for
//! each field present at that timestamp:
//!
//! - float: 8 bytes, big-endian IEEE-754 bits
//! - integer: 8 bytes, big-endian two's complement
//! - boolean: 1 byte, non-zero is true
//! - string: u16 big-endian length followed by UTF-8 bytes

use crate::model::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown field id {0}")]
    UnknownFieldId(u8),

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("field {field} expects {expected} but got {actual}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("truncated data for field {0}")]
    Truncated(String),

    #[error("string value of field {0} is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("string value of field {0} is too long")]
    StringTooLong(String),

    #[error("measurement already has 255 fields")]
    TooManyFields,
}

/// Stored type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Float,
    Integer,
    Boolean,
    String,
}

impl FieldType {
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Float => ValueKind::Float,
            Self::Integer => ValueKind::Integer,
            Self::Boolean => ValueKind::Boolean,
            Self::String => ValueKind::String,
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Float(_) => Self::Float,
            Value::Integer(_) => Self::Integer,
            Value::Boolean(_) => Self::Boolean,
            Value::String(_) => Self::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Field table of one measurement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFields {
    pub fields: BTreeMap<String, Field>,
}

impl MeasurementFields {
    /// Register a field, returning its id. Existing fields keep their id.
    pub fn add(&mut self, name: &str, field_type: FieldType) -> Result<u8, CodecError> {
        if let Some(field) = self.fields.get(name) {
            if field.field_type != field_type {
                return Err(CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: field.field_type.kind(),
                    actual: field_type.kind(),
                });
            }
            return Ok(field.id);
        }

        let id = u8::try_from(self.fields.len() + 1).map_err(|_| CodecError::TooManyFields)?;
        self.fields.insert(
            name.to_string(),
            Field {
                id,
                name: name.to_string(),
                field_type,
            },
        );
        Ok(id)
    }

    fn field_by_id(&self, id: u8) -> Option<&Field> {
        self.fields.values().find(|f| f.id == id)
    }

    /// Encode the field values of one point
    pub fn encode(&self, values: &[(String, Value)]) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        for (name, value) in values {
            let field = self
                .fields
                .get(name)
                .ok_or_else(|| CodecError::UnknownField(name.clone()))?;
            if field.field_type.kind() != value.kind() {
                return Err(CodecError::TypeMismatch {
                    field: name.clone(),
                    expected: field.field_type.kind(),
                    actual: value.kind(),
                });
            }

            buf.push(field.id);
            match value {
                Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
                Value::Integer(v) => buf.extend_from_slice(&v.to_be_bytes()),
                Value::Boolean(v) => buf.push(u8::from(*v)),
                Value::String(s) => {
                    let len = u16::try_from(s.len())
                        .map_err(|_| CodecError::StringTooLong(name.clone()))?;
                    buf.extend_from_slice(&len.to_be_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    /// Decode the field values of one point, in stored order
    pub fn decode(&self, mut buf: &[u8]) -> Result<Vec<(String, Value)>, CodecError> {
        let mut values = Vec::new();

        while let Some((&id, rest)) = buf.split_first() {
            let field = self.field_by_id(id).ok_or(CodecError::UnknownFieldId(id))?;
            let truncated = || CodecError::Truncated(field.name.clone());

            let (value, rest) = match field.field_type {
                FieldType::Float => {
                    let (bytes, rest) = split_array::<8>(rest).ok_or_else(truncated)?;
                    (Value::Float(f64::from_bits(u64::from_be_bytes(bytes))), rest)
                }
                FieldType::Integer => {
                    let (bytes, rest) = split_array::<8>(rest).ok_or_else(truncated)?;
                    (Value::Integer(i64::from_be_bytes(bytes)), rest)
                }
                FieldType::Boolean => {
                    let (&b, rest) = rest.split_first().ok_or_else(truncated)?;
                    (Value::Boolean(b != 0), rest)
                }
                FieldType::String => {
                    let (len, rest) = split_array::<2>(rest).ok_or_else(truncated)?;
                    let len = u16::from_be_bytes(len) as usize;
                    if rest.len() < len {
                        return Err(truncated());
                    }
                    let (raw, rest) = rest.split_at(len);
                    let s = std::str::from_utf8(raw)
                        .map_err(|_| CodecError::InvalidUtf8(field.name.clone()))?;
                    (Value::String(s.to_string()), rest)
                }
            };

            values.push((field.name.clone(), value));
            buf = rest;
        }

        Ok(values)
    }
}

fn split_array<const N: usize>(buf: &[u8]) -> Option<([u8; N], &[u8])> {
    if buf.len() < N {
        return None;
    }
    let (head, rest) = buf.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Some((out, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_fields() -> MeasurementFields {
        let mut fields = MeasurementFields::default();
        fields.add("value", FieldType::Float).unwrap();
        fields.add("count", FieldType::Integer).unwrap();
        fields.add("up", FieldType::Boolean).unwrap();
        fields.add("note", FieldType::String).unwrap();
        fields
    }

    #[test]
    fn test_field_ids_are_stable() {
        let mut fields = cpu_fields();
        assert_eq!(fields.add("value", FieldType::Float).unwrap(), 1);
        assert_eq!(fields.add("extra", FieldType::Float).unwrap(), 5);
        assert!(matches!(
            fields.add("value", FieldType::String),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_mixed_point() {
        let fields = cpu_fields();
        let point = vec![
            ("value".to_string(), Value::Float(1.5)),
            ("count".to_string(), Value::Integer(-3)),
            ("up".to_string(), Value::Boolean(true)),
            ("note".to_string(), Value::String("héllo".to_string())),
        ];
        let buf = fields.encode(&point).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(fields.decode(&buf).unwrap(), point);
    }

    #[test]
    fn test_decode_unknown_id() {
        let fields = cpu_fields();
        assert_eq!(
            fields.decode(&[42, 0, 0]),
            Err(CodecError::UnknownFieldId(42))
        );
    }

    #[test]
    fn test_decode_truncated() {
        let fields = cpu_fields();
        assert_eq!(
            fields.decode(&[1, 0, 0, 0]),
            Err(CodecError::Truncated("value".to_string()))
        );
        assert_eq!(
            fields.decode(&[4, 0, 9, b'a']),
            Err(CodecError::Truncated("note".to_string()))
        );
    }

    #[test]
    fn test_encode_type_mismatch() {
        let fields = cpu_fields();
        let err = fields
            .encode(&[("value".to_string(), Value::Integer(1))])
            .unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn test_fields_json_shape() {
        let fields = cpu_fields();
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["fields"]["value"]["type"], "float");
        assert_eq!(json["fields"]["value"]["id"], 1);
    }
}
