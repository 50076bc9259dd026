//! Self-describing deterministic binary encoding for stored values
//!
//! The shortest integer tag that fits the value is always chosen, and map
//! keys are emitted in insertion order of the source `Value` — callers that
//! need cross-peer determinism (e.g. envelope payloads) canonicalize
//! upstream via [`crate::canonical`]. Decoding is strict: an unrecognized tag
//! byte, or running out of input mid-value, fails with [`Error::InvalidEncoding`]
//! or [`Error::Truncated`].

use crate::error::{Error, Result};

/// A decoded/encodable value. Map entries preserve insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer, stored at the narrowest width that holds it
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Opaque byte blob
    Bytes(Vec<u8>),
    /// Ordered array of values
    Array(Vec<Value>),
    /// String-keyed map, insertion order preserved
    Map(Vec<(String, Value)>),
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum Tag {
    Null = 0,
    False = 1,
    True = 2,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Float64 = 7,
    Str = 8,
    Bytes = 9,
    Array = 10,
    Map = 11,
}

impl TryFrom<u8> for Tag {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Tag::Null),
            1 => Ok(Tag::False),
            2 => Ok(Tag::True),
            3 => Ok(Tag::Int8),
            4 => Ok(Tag::Int16),
            5 => Ok(Tag::Int32),
            6 => Ok(Tag::Int64),
            7 => Ok(Tag::Float64),
            8 => Ok(Tag::Str),
            9 => Ok(Tag::Bytes),
            10 => Ok(Tag::Array),
            11 => Ok(Tag::Map),
            other => Err(Error::InvalidEncoding(other)),
        }
    }
}

/// Encode a value to its binary representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(Tag::Null as u8),
        Value::Bool(false) => out.push(Tag::False as u8),
        Value::Bool(true) => out.push(Tag::True as u8),
        Value::Int(n) => encode_int(*n, out),
        Value::Float(f) => {
            out.push(Tag::Float64 as u8);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => {
            out.push(Tag::Str as u8);
            encode_len_prefixed(s.as_bytes(), out);
        }
        Value::Bytes(b) => {
            out.push(Tag::Bytes as u8);
            encode_len_prefixed(b, out);
        }
        Value::Array(items) => {
            out.push(Tag::Array as u8);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            out.push(Tag::Map as u8);
            out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
            for (key, val) in entries {
                encode_len_prefixed(key.as_bytes(), out);
                encode_into(val, out);
            }
        }
    }
}

fn encode_int(n: i64, out: &mut Vec<u8>) {
    if let Ok(v) = i8::try_from(n) {
        out.push(Tag::Int8 as u8);
        out.push(v as u8);
    } else if let Ok(v) = i16::try_from(n) {
        out.push(Tag::Int16 as u8);
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i32::try_from(n) {
        out.push(Tag::Int32 as u8);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.push(Tag::Int64 as u8);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_len_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Decode a value from its binary representation. The entire input must be
/// consumed; leftover bytes are a `TrailingBytes` error.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor { buf: bytes, pos: 0 };
    let value = decode_value(&mut cursor)?;
    if cursor.pos != cursor.buf.len() {
        return Err(Error::TrailingBytes(cursor.buf.len() - cursor.pos));
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<Value> {
    let tag = Tag::try_from(cursor.take_u8()?)?;
    match tag {
        Tag::Null => Ok(Value::Null),
        Tag::False => Ok(Value::Bool(false)),
        Tag::True => Ok(Value::Bool(true)),
        Tag::Int8 => Ok(Value::Int(cursor.take(1)?[0] as i8 as i64)),
        Tag::Int16 => {
            let bytes = cursor.take(2)?;
            Ok(Value::Int(i16::from_be_bytes(bytes.try_into().unwrap()) as i64))
        }
        Tag::Int32 => {
            let bytes = cursor.take(4)?;
            Ok(Value::Int(i32::from_be_bytes(bytes.try_into().unwrap()) as i64))
        }
        Tag::Int64 => {
            let bytes = cursor.take(8)?;
            Ok(Value::Int(i64::from_be_bytes(bytes.try_into().unwrap())))
        }
        Tag::Float64 => {
            let bytes = cursor.take(8)?;
            Ok(Value::Float(f64::from_be_bytes(bytes.try_into().unwrap())))
        }
        Tag::Str => {
            let len = cursor.take_u32()? as usize;
            let bytes = cursor.take(len)?;
            let s = std::str::from_utf8(bytes).map_err(|_| Error::InvalidMapKey)?;
            Ok(Value::Str(s.to_string()))
        }
        Tag::Bytes => {
            let len = cursor.take_u32()? as usize;
            Ok(Value::Bytes(cursor.take(len)?.to_vec()))
        }
        Tag::Array => {
            let count = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::Array(items))
        }
        Tag::Map => {
            let count = cursor.take_u32()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let klen = cursor.take_u32()? as usize;
                let kbytes = cursor.take(klen)?;
                let key = std::str::from_utf8(kbytes)
                    .map_err(|_| Error::InvalidMapKey)?
                    .to_string();
                let val = decode_value(cursor)?;
                entries.push((key, val));
            }
            Ok(Value::Map(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalars() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(0),
            Value::Int(-1),
            Value::Int(127),
            Value::Int(128),
            Value::Int(70_000),
            Value::Int(i64::MAX),
            Value::Float(3.25),
            Value::Str("hello".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let encoded = encode(&v);
            assert_eq!(decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn narrowest_tag_chosen() {
        assert_eq!(encode(&Value::Int(1))[0], Tag::Int8 as u8);
        assert_eq!(encode(&Value::Int(1000))[0], Tag::Int16 as u8);
        assert_eq!(encode(&Value::Int(1_000_000))[0], Tag::Int32 as u8);
        assert_eq!(encode(&Value::Int(i64::MAX))[0], Tag::Int64 as u8);
    }

    #[test]
    fn roundtrip_nested() {
        let v = Value::Map(vec![
            ("b".into(), Value::Int(2)),
            ("a".into(), Value::Array(vec![Value::Str("x".into()), Value::Null])),
        ]);
        let encoded = encode(&v);
        assert_eq!(decode(&encoded).unwrap(), v);
    }

    #[test]
    fn map_preserves_insertion_order() {
        let v = Value::Map(vec![("z".into(), Value::Null), ("a".into(), Value::Null)]);
        let encoded = encode(&v);
        match decode(&encoded).unwrap() {
            Value::Map(entries) => {
                assert_eq!(entries[0].0, "z");
                assert_eq!(entries[1].0, "a");
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn unknown_tag_is_invalid_encoding() {
        let bytes = vec![99u8];
        assert!(matches!(decode(&bytes), Err(Error::InvalidEncoding(99))));
    }

    #[test]
    fn truncated_input_errors() {
        let bytes = vec![Tag::Int32 as u8, 0, 0];
        assert!(matches!(decode(&bytes), Err(Error::Truncated)));
    }
}
