//! Canonical JSON-like serialization for signed bytes
//!
//! Separate from the byte [`codec`](crate::codec) used for stored values:
//! this is strictly for bytes that go under a signature
//! (`signature = sign(canonicalize(payload))`). Map keys are sorted
//! lexicographically by their UTF-8 bytes so the signed form is stable
//! across peers regardless of local map iteration order.

use crate::codec::Value;
use crate::error::{Error, Result};

/// Normalize a float for canonical encoding.
/// - NaN and Inf are rejected
/// - -0.0 is converted to +0.0
pub fn normalize_f64(v: f64) -> Result<f64> {
    if v.is_nan() {
        return Err(Error::FloatNormalization("NaN not allowed".into()));
    }
    if v.is_infinite() {
        return Err(Error::FloatNormalization("Infinity not allowed".into()));
    }
    if v == 0.0 && v.is_sign_negative() {
        return Ok(0.0);
    }
    Ok(v)
}

/// Serialize a value to canonical bytes: lexicographic key ordering, no
/// insignificant whitespace, standard scalar encodings. This is the
/// normative encoding for every signature in the system.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::Float(f) => {
            let normalized = normalize_f64(*f)?;
            out.extend_from_slice(format_float(normalized).as_bytes());
        }
        Value::Str(s) => write_json_string(s, out),
        Value::Bytes(b) => {
            // Bytes have no JSON primitive; canonicalize as a hex string so the
            // signed form stays JSON-like and unambiguous.
            write_json_string(&hex_encode(b), out);
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Map(entries) => {
            let mut sorted: Vec<&(String, Value)> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(key, out);
                out.push(b':');
                write_value(val, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_normalization() {
        assert_eq!(normalize_f64(1.5).unwrap(), 1.5);
        assert_eq!(normalize_f64(0.0).unwrap(), 0.0);
        assert_eq!(normalize_f64(-0.0).unwrap(), 0.0);
        assert!(normalize_f64(f64::NAN).is_err());
        assert!(normalize_f64(f64::INFINITY).is_err());
        assert!(normalize_f64(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn key_order_is_lexicographic_regardless_of_insertion() {
        let a = Value::Map(vec![
            ("z".into(), Value::Int(1)),
            ("a".into(), Value::Int(2)),
        ]);
        let b = Value::Map(vec![
            ("a".into(), Value::Int(2)),
            ("z".into(), Value::Int(1)),
        ]);
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn deterministic_across_runs() {
        let v = Value::Map(vec![("k".into(), Value::Str("v".into()))]);
        assert_eq!(canonical_bytes(&v).unwrap(), canonical_bytes(&v).unwrap());
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(canonical_bytes(&v).unwrap(), b"[1,2]");
    }

    #[test]
    fn rejects_nan() {
        let v = Value::Float(f64::NAN);
        assert!(canonical_bytes(&v).is_err());
    }

    #[test]
    fn string_escaping() {
        let v = Value::Str("a\"b\\c".into());
        assert_eq!(canonical_bytes(&v).unwrap(), br#""a\"b\\c""#);
    }
}
