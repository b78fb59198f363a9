//! Typed value <-> byte encoding driven by a `TableSchema`.
//!
//! Layout: `ceil(num_attributes / 8)` bytes of null bitmap (bit `i` of byte
//! `i / 8`, bit index `i % 8`), followed by the concatenation of non-null
//! attribute encodings in attribute order. Null attributes contribute no
//! payload bytes.

use crate::error::{FluxError, Result};
use crate::schema::TableSchema;
use crate::types::{DataType, Value};

fn bitmap_len(num_attributes: usize) -> usize {
    (num_attributes + 7) / 8
}

fn bit_is_set(bitmap: &[u8], i: usize) -> bool {
    (bitmap[i / 8] >> (i % 8)) & 1 == 1
}

fn set_bit(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 1 << (i % 8);
}

/// Encodes one non-null value. Rejects type mismatches and oversized
/// strings.
pub(crate) fn encode_value(attr_name: &str, value: &Value, data_type: &DataType) -> Result<Vec<u8>> {
    match (value, data_type) {
        (Value::Int(v), DataType::Integer) => Ok(v.to_le_bytes().to_vec()),
        (Value::Double(v), DataType::Double) => Ok(v.to_le_bytes().to_vec()),
        (Value::Bool(v), DataType::Boolean) => Ok(vec![*v as u8]),
        (Value::Str(s), DataType::Char(n)) => {
            let bytes = s.as_bytes();
            if bytes.len() > *n as usize {
                return Err(FluxError::LengthExceeded {
                    attr: attr_name.to_string(),
                    max: *n,
                    actual: bytes.len(),
                });
            }
            let mut buf = vec![0u8; *n as usize];
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(buf)
        }
        (Value::Str(s), DataType::Varchar(n)) => {
            let bytes = s.as_bytes();
            if bytes.len() > *n as usize {
                return Err(FluxError::LengthExceeded {
                    attr: attr_name.to_string(),
                    max: *n,
                    actual: bytes.len(),
                });
            }
            let mut buf = Vec::with_capacity(2 + bytes.len());
            buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(bytes);
            Ok(buf)
        }
        _ => Err(FluxError::TypeMismatch {
            attr: attr_name.to_string(),
            expected: data_type.tag(),
            actual: value.type_name(),
        }),
    }
}

/// Decodes one non-null value, returning the value and the number of bytes
/// consumed.
pub(crate) fn decode_value(bytes: &[u8], data_type: &DataType) -> (Value, usize) {
    match data_type {
        DataType::Integer => (
            Value::Int(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            4,
        ),
        DataType::Double => (
            Value::Double(f64::from_le_bytes(bytes[0..8].try_into().unwrap())),
            8,
        ),
        DataType::Boolean => (Value::Bool(bytes[0] != 0), 1),
        DataType::Char(n) => {
            let n = *n as usize;
            let raw = &bytes[..n];
            let trimmed = raw
                .iter()
                .rposition(|&b| b != 0)
                .map(|i| &raw[..=i])
                .unwrap_or(&[]);
            let s = std::str::from_utf8(trimmed)
                .unwrap_or_default()
                .trim_end()
                .to_string();
            (Value::Str(s), n)
        }
        DataType::Varchar(_) => {
            let len = u16::from_le_bytes(bytes[0..2].try_into().unwrap()) as usize;
            let s = String::from_utf8_lossy(&bytes[2..2 + len]).into_owned();
            (Value::Str(s), 2 + len)
        }
    }
}

/// Encode a full record. `values` must have exactly one entry per attribute
/// in `schema`, in attribute order. Rejects a null in a NOT NULL attribute,
/// a type mismatch, or a string longer than its CHAR/VARCHAR max length.
pub fn encode(values: &[Value], schema: &TableSchema) -> Result<Vec<u8>> {
    let num_attrs = schema.attributes.len();
    let mut bitmap = vec![0u8; bitmap_len(num_attrs)];
    let mut payload = Vec::new();

    for (i, (value, attr)) in values.iter().zip(schema.attributes.iter()).enumerate() {
        if value.is_null() {
            if attr.is_not_null {
                return Err(FluxError::NullInNotNull(attr.name.clone()));
            }
            set_bit(&mut bitmap, i);
            continue;
        }
        payload.extend(encode_value(&attr.name, value, &attr.data_type)?);
    }

    let mut record = bitmap;
    record.extend(payload);
    Ok(record)
}

/// Decode a full record back into one value per attribute, in attribute
/// order.
pub fn decode(bytes: &[u8], schema: &TableSchema) -> Vec<Value> {
    let num_attrs = schema.attributes.len();
    let bitmap_size = bitmap_len(num_attrs);
    let bitmap = &bytes[..bitmap_size];
    let mut cursor = bitmap_size;
    let mut values = Vec::with_capacity(num_attrs);

    for (i, attr) in schema.attributes.iter().enumerate() {
        if bit_is_set(bitmap, i) {
            values.push(Value::Null);
            continue;
        }
        let (value, consumed) = decode_value(&bytes[cursor..], &attr.data_type);
        cursor += consumed;
        values.push(value);
    }

    values
}

/// Read a single attribute's value out of an encoded record without
/// decoding the whole thing, used by the primary-key scan.
pub fn decode_attribute(bytes: &[u8], schema: &TableSchema, attr_index: usize) -> Value {
    let num_attrs = schema.attributes.len();
    let bitmap_size = bitmap_len(num_attrs);
    let bitmap = &bytes[..bitmap_size];
    let mut cursor = bitmap_size;

    for (i, attr) in schema.attributes.iter().enumerate() {
        if bit_is_set(bitmap, i) {
            if i == attr_index {
                return Value::Null;
            }
            continue;
        }
        let (value, consumed) = decode_value(&bytes[cursor..], &attr.data_type);
        if i == attr_index {
            return value;
        }
        cursor += consumed;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeSchema;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                AttributeSchema::new("id", DataType::Integer, true, true, None),
                AttributeSchema::new("name", DataType::Varchar(16), false, false, None),
                AttributeSchema::new("tag", DataType::Char(4), false, false, None),
            ],
        )
    }

    #[test]
    fn round_trips_non_null_values() {
        let s = schema();
        let values = vec![
            Value::Int(42),
            Value::Str("alice".to_string()),
            Value::Str("ab".to_string()),
        ];
        let bytes = encode(&values, &s).unwrap();
        let decoded = decode(&bytes, &s);
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_nulls() {
        let s = schema();
        let values = vec![Value::Int(1), Value::Null, Value::Null];
        let bytes = encode(&values, &s).unwrap();
        let decoded = decode(&bytes, &s);
        assert_eq!(decoded, values);
    }

    #[test]
    fn rejects_null_in_primary_key() {
        let s = schema();
        let values = vec![Value::Null, Value::Str("x".into()), Value::Null];
        assert!(matches!(
            encode(&values, &s),
            Err(FluxError::NullInNotNull(_))
        ));
    }

    #[test]
    fn rejects_oversized_char() {
        let s = schema();
        let values = vec![
            Value::Int(1),
            Value::Str("x".into()),
            Value::Str("toolong".into()),
        ];
        assert!(matches!(
            encode(&values, &s),
            Err(FluxError::LengthExceeded { .. })
        ));
    }

    #[test]
    fn rejects_oversized_varchar() {
        let s = schema();
        let values = vec![
            Value::Int(1),
            Value::Str("this name is definitely too long".into()),
            Value::Null,
        ];
        assert!(matches!(
            encode(&values, &s),
            Err(FluxError::LengthExceeded { .. })
        ));
    }

    #[test]
    fn rejects_type_mismatch() {
        let s = schema();
        let values = vec![
            Value::Str("not an int".into()),
            Value::Str("x".into()),
            Value::Null,
        ];
        assert!(matches!(
            encode(&values, &s),
            Err(FluxError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn char_trims_padding_and_trailing_whitespace() {
        let s = TableSchema::new(
            "t",
            vec![AttributeSchema::new(
                "tag",
                DataType::Char(8),
                false,
                false,
                None,
            )],
        );
        let values = vec![Value::Str("hi  ".to_string())];
        let bytes = encode(&values, &s).unwrap();
        let decoded = decode(&bytes, &s);
        assert_eq!(decoded, vec![Value::Str("hi".to_string())]);
    }

    #[test]
    fn decode_attribute_matches_full_decode() {
        let s = schema();
        let values = vec![Value::Int(7), Value::Null, Value::Str("zz".into())];
        let bytes = encode(&values, &s).unwrap();
        for (i, expected) in values.iter().enumerate() {
            assert_eq!(&decode_attribute(&bytes, &s, i), expected);
        }
    }
}
