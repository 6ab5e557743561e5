//! Shape-directed encoder.

use eyre::Result;

use super::shape::Shape;
use super::value::Value;
use crate::error::EngineError;

/// Encodes `value` under `shape` into a fresh byte buffer.
///
/// A value that does not match the shape fails with `InvalidDataType`; an
/// array whose element count differs from the shape's declared length fails
/// with `InvalidSize`.
pub fn encode(shape: &Shape, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(shape, value, &mut out)?;
    Ok(out)
}

fn mismatch(shape: &Shape, value: &Value) -> eyre::Report {
    EngineError::invalid_data_type(format!(
        "value of kind {} does not match shape {:?}",
        value.kind(),
        shape
    ))
    .into()
}

fn encode_into(shape: &Shape, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (shape, value) {
        (Shape::Void, Value::Void) => Ok(()),
        (Shape::Bool, Value::Bool(b)) => {
            out.push(*b as u8);
            Ok(())
        }
        (Shape::Int { bits, signed }, _) => encode_int(*bits, *signed, value, out)
            .ok_or_else(|| mismatch(shape, value)),
        (Shape::Float { bits: 32 }, Value::F32(v)) => {
            out.extend_from_slice(&v.to_bits().to_le_bytes());
            Ok(())
        }
        (Shape::Float { bits: 64 }, Value::F64(v)) => {
            out.extend_from_slice(&v.to_bits().to_le_bytes());
            Ok(())
        }
        (Shape::Float { bits }, _) => Err(EngineError::invalid_data_type(format!(
            "unsupported float width: {bits} bits"
        ))
        .into()),
        (Shape::Array { len, elem }, Value::Array(items)) => {
            if items.len() != *len {
                return Err(EngineError::InvalidSize {
                    expected: *len,
                    actual: items.len(),
                }
                .into());
            }
            for item in items {
                encode_into(elem, item, out)?;
            }
            Ok(())
        }
        (Shape::Seq { .. }, Value::Bytes(block)) if shape.is_byte_seq() => {
            out.extend_from_slice(&(block.len() as u64).to_le_bytes());
            out.extend_from_slice(block);
            Ok(())
        }
        (Shape::Seq { elem }, Value::Seq(items)) => {
            if matches!(elem.as_ref(), Shape::Void) {
                return Err(EngineError::invalid_data_type(
                    "sequence elements must occupy at least one byte",
                )
                .into());
            }
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode_into(elem, item, out)?;
            }
            Ok(())
        }
        (Shape::Record { fields }, Value::Record(values)) => {
            if values.len() != fields.len() {
                return Err(EngineError::InvalidSize {
                    expected: fields.len(),
                    actual: values.len(),
                }
                .into());
            }
            for (field, value) in fields.iter().zip(values) {
                encode_into(&field.shape, value, out)?;
            }
            Ok(())
        }
        (Shape::Ref { elem }, Value::Ref(inner)) => encode_into(elem, inner, out),
        _ => Err(mismatch(shape, value)),
    }
}

/// Returns `None` on width/signedness mismatch so the caller can produce a
/// shape-aware error.
fn encode_int(bits: u16, signed: bool, value: &Value, out: &mut Vec<u8>) -> Option<()> {
    match (bits, signed, value) {
        (8, false, Value::U8(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (16, false, Value::U16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (32, false, Value::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (64, false, Value::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (128, false, Value::U128(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (8, true, Value::I8(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (16, true, Value::I16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (32, true, Value::I32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (64, true, Value::I64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (128, true, Value::I128(v)) => out.extend_from_slice(&v.to_le_bytes()),
        _ => return None,
    }
    Some(())
}
