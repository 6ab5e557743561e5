//! Shape-directed decoder.

use eyre::Result;

use super::shape::Shape;
use super::value::Value;
use crate::error::EngineError;

/// Decodes `bytes` under `shape`, consuming the entire input.
///
/// Truncated input and trailing bytes fail with `InvalidSize`; bytes that
/// cannot carry a value of the shape (a bool byte other than 0/1, an
/// unsupported width) fail with `InvalidDataType`.
pub fn decode(shape: &Shape, bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor {
        buf: bytes,
        pos: 0,
    };
    let value = cursor.read_shape(shape)?;
    if cursor.pos != bytes.len() {
        return Err(EngineError::InvalidSize {
            expected: cursor.pos,
            actual: bytes.len(),
        }
        .into());
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(EngineError::InvalidSize {
                expected: n,
                actual: remaining,
            }
            .into());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_len(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        let mut le = [0u8; 8];
        le.copy_from_slice(raw);
        Ok(u64::from_le_bytes(le))
    }

    /// Rejects a declared element count that cannot fit in the remaining
    /// input, before any allocation is sized from it. Every supported
    /// element shape occupies at least one byte.
    fn check_len(&self, len: u64) -> Result<usize> {
        let remaining = self.buf.len() - self.pos;
        if len > remaining as u64 {
            return Err(EngineError::InvalidSize {
                expected: len.min(usize::MAX as u64) as usize,
                actual: remaining,
            }
            .into());
        }
        Ok(len as usize)
    }

    fn read_shape(&mut self, shape: &Shape) -> Result<Value> {
        match shape {
            Shape::Void => Ok(Value::Void),
            Shape::Bool => match self.take(1)?[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(EngineError::invalid_data_type(format!(
                    "bool byte must be 0 or 1, got {other}"
                ))
                .into()),
            },
            Shape::Int { bits, signed } => self.read_int(*bits, *signed),
            Shape::Float { bits: 32 } => {
                let raw = self.take(4)?;
                let mut le = [0u8; 4];
                le.copy_from_slice(raw);
                Ok(Value::F32(f32::from_bits(u32::from_le_bytes(le))))
            }
            Shape::Float { bits: 64 } => {
                let raw = self.take(8)?;
                let mut le = [0u8; 8];
                le.copy_from_slice(raw);
                Ok(Value::F64(f64::from_bits(u64::from_le_bytes(le))))
            }
            Shape::Float { bits } => Err(EngineError::invalid_data_type(format!(
                "unsupported float width: {bits} bits"
            ))
            .into()),
            Shape::Array { len, elem } => {
                let mut items = Vec::new();
                for _ in 0..*len {
                    items.push(self.read_shape(elem)?);
                }
                Ok(Value::Array(items))
            }
            Shape::Seq { elem } => {
                if matches!(elem.as_ref(), Shape::Void) {
                    return Err(EngineError::invalid_data_type(
                        "sequence elements must occupy at least one byte",
                    )
                    .into());
                }
                let len = self.read_len()?;
                let len = self.check_len(len)?;
                if shape.is_byte_seq() {
                    return Ok(Value::Bytes(self.take(len)?.to_vec()));
                }
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(self.read_shape(elem)?);
                }
                Ok(Value::Seq(items))
            }
            Shape::Record { fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.read_shape(&field.shape)?);
                }
                Ok(Value::Record(values))
            }
            Shape::Ref { elem } => Ok(Value::Ref(Box::new(self.read_shape(elem)?))),
        }
    }

    fn read_int(&mut self, bits: u16, signed: bool) -> Result<Value> {
        macro_rules! read_le {
            ($ty:ty, $variant:ident) => {{
                let raw = self.take(std::mem::size_of::<$ty>())?;
                let mut le = [0u8; std::mem::size_of::<$ty>()];
                le.copy_from_slice(raw);
                Ok(Value::$variant(<$ty>::from_le_bytes(le)))
            }};
        }
        match (bits, signed) {
            (8, false) => read_le!(u8, U8),
            (16, false) => read_le!(u16, U16),
            (32, false) => read_le!(u32, U32),
            (64, false) => read_le!(u64, U64),
            (128, false) => read_le!(u128, U128),
            (8, true) => read_le!(i8, I8),
            (16, true) => read_le!(i16, I16),
            (32, true) => read_le!(i32, I32),
            (64, true) => read_le!(i64, I64),
            (128, true) => read_le!(i128, I128),
            _ => Err(EngineError::invalid_data_type(format!(
                "unsupported integer width: {bits} bits"
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_invalid_size() {
        let err = decode(&Shape::u32(), &[1, 2]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidSize {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_invalid_size() {
        let err = decode(&Shape::Bool, &[1, 0]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidSize { .. })
        ));
    }

    #[test]
    fn bad_bool_byte_is_invalid_data_type() {
        let err = decode(&Shape::Bool, &[2]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidDataType { .. })
        ));
    }

    #[test]
    fn oversized_declared_length_rejected_before_allocation() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.push(0);
        let err = decode(&Shape::bytes(), &bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidSize { .. })
        ));
    }

    #[test]
    fn decode_under_wrong_shape_fails_cleanly() {
        // Encoded as (u32, bytes); decoded as (bytes, u32) must error, not
        // misread memory.
        let shape = Shape::record(vec![
            crate::codec::Field::new("n", Shape::u32()),
            crate::codec::Field::new("b", Shape::bytes()),
        ]);
        let wrong = Shape::record(vec![
            crate::codec::Field::new("b", Shape::bytes()),
            crate::codec::Field::new("n", Shape::u32()),
        ]);
        let bytes = crate::codec::encode(
            &shape,
            &Value::Record(vec![Value::U32(300), Value::Bytes(b"xyz".to_vec())]),
        )
        .unwrap();
        assert!(decode(&wrong, &bytes).is_err());
    }

    #[test]
    fn u128_roundtrip() {
        let bytes = crate::codec::encode(&Shape::u128(), &Value::U128(u128::MAX - 1)).unwrap();
        assert_eq!(decode(&Shape::u128(), &bytes).unwrap(), Value::U128(u128::MAX - 1));
    }
}
