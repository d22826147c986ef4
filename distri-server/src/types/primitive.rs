//! Fixed-width primitive types for static-mode work and solutions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Family of a static-mode primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveKind {
    /// Signed little-endian integer
    Int,
    /// Unsigned little-endian integer
    Uint,
    /// IEEE 754 float
    Float,
    /// UTF-8 string, zero padded to the width
    String,
}

/// A primitive type together with its byte width.
///
/// Every static-mode value of this type occupies exactly `width` bytes in the
/// session buffer, regardless of its magnitude or length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrimitiveType {
    #[serde(rename = "type")]
    pub kind: PrimitiveKind,
    pub width: usize,
}

impl PrimitiveType {
    pub const fn new(kind: PrimitiveKind, width: usize) -> Self {
        Self { kind, width }
    }

    /// Check that the width is one this kind can be packed with.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.kind {
            PrimitiveKind::Int | PrimitiveKind::Uint => matches!(self.width, 1 | 2 | 4 | 8),
            PrimitiveKind::Float => matches!(self.width, 4 | 8),
            PrimitiveKind::String => self.width > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "unsupported width {} for primitive type {}",
                self.width, self.kind
            )))
        }
    }

    /// Pack `value` into `out`, which must be exactly `width` bytes long.
    pub fn encode(&self, value: &Value, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), self.width);

        if value.is_array() || value.is_object() {
            return Err(Error::Codec(format!(
                "composite value {} cannot be packed as {}",
                value, self.kind
            )));
        }

        match self.kind {
            PrimitiveKind::Int => {
                let v = value.as_i64().ok_or_else(|| self.mismatch(value))?;
                let bits = self.width as u32 * 8;
                if bits < 64 {
                    let min = -(1i64 << (bits - 1));
                    let max = (1i64 << (bits - 1)) - 1;
                    if v < min || v > max {
                        return Err(self.out_of_range(value));
                    }
                }
                out.copy_from_slice(&v.to_le_bytes()[..self.width]);
            }
            PrimitiveKind::Uint => {
                let v = value.as_u64().ok_or_else(|| self.mismatch(value))?;
                let bits = self.width as u32 * 8;
                if bits < 64 && v >> bits != 0 {
                    return Err(self.out_of_range(value));
                }
                out.copy_from_slice(&v.to_le_bytes()[..self.width]);
            }
            PrimitiveKind::Float => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                if self.width == 4 {
                    let narrow = v as f32;
                    if !narrow.is_finite() {
                        return Err(self.out_of_range(value));
                    }
                    out.copy_from_slice(&narrow.to_le_bytes());
                } else {
                    out.copy_from_slice(&v.to_le_bytes());
                }
            }
            PrimitiveKind::String => {
                let s = value.as_str().ok_or_else(|| self.mismatch(value))?;
                // Trailing zeros are padding, so a NUL inside the string
                // would not survive decoding.
                if s.len() > self.width || s.contains('\0') {
                    return Err(self.out_of_range(value));
                }
                out.fill(0);
                out[..s.len()].copy_from_slice(s.as_bytes());
            }
        }

        Ok(())
    }

    /// Unpack a value previously written by [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> Value {
        debug_assert_eq!(bytes.len(), self.width);

        match self.kind {
            PrimitiveKind::Int => {
                let negative = bytes[self.width - 1] & 0x80 != 0;
                let mut buf = if negative { [0xff; 8] } else { [0; 8] };
                buf[..self.width].copy_from_slice(bytes);
                Value::from(i64::from_le_bytes(buf))
            }
            PrimitiveKind::Uint => {
                let mut buf = [0; 8];
                buf[..self.width].copy_from_slice(bytes);
                Value::from(u64::from_le_bytes(buf))
            }
            PrimitiveKind::Float => {
                if self.width == 4 {
                    let mut buf = [0; 4];
                    buf.copy_from_slice(bytes);
                    Value::from(f64::from(f32::from_le_bytes(buf)))
                } else {
                    let mut buf = [0; 8];
                    buf.copy_from_slice(bytes);
                    Value::from(f64::from_le_bytes(buf))
                }
            }
            PrimitiveKind::String => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Value::from(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::Codec(format!("value {} is not of type {}", value, self.kind))
    }

    fn out_of_range(&self, value: &Value) -> Error {
        Error::Codec(format!(
            "value {} does not fit in {} bytes of {}",
            value, self.width, self.kind
        ))
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind, self.width * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn round_trip(ty: PrimitiveType, value: Value) -> Value {
        let mut buf = vec![0u8; ty.width];
        ty.encode(&value, &mut buf).unwrap();
        ty.decode(&buf)
    }

    #[test_case(PrimitiveKind::Int, 1, json!(-128))]
    #[test_case(PrimitiveKind::Int, 1, json!(127))]
    #[test_case(PrimitiveKind::Int, 2, json!(-30000))]
    #[test_case(PrimitiveKind::Int, 4, json!(-2147483648i64))]
    #[test_case(PrimitiveKind::Int, 8, json!(i64::MIN))]
    #[test_case(PrimitiveKind::Uint, 1, json!(255))]
    #[test_case(PrimitiveKind::Uint, 2, json!(65535))]
    #[test_case(PrimitiveKind::Uint, 4, json!(4000000000u64))]
    #[test_case(PrimitiveKind::Uint, 8, json!(u64::MAX))]
    #[test_case(PrimitiveKind::Float, 4, json!(1.5))]
    #[test_case(PrimitiveKind::Float, 8, json!(-1234.5678))]
    #[test_case(PrimitiveKind::String, 8, json!("collatz"))]
    #[test_case(PrimitiveKind::String, 3, json!("abc"))]
    #[test_case(PrimitiveKind::String, 4, json!(""))]
    fn test_round_trip(kind: PrimitiveKind, width: usize, value: Value) {
        let ty = PrimitiveType::new(kind, width);
        ty.validate().unwrap();
        assert_eq!(round_trip(ty, value.clone()), value);
    }

    #[test_case(PrimitiveKind::Int, 1, json!(128) ; "int8 overflow")]
    #[test_case(PrimitiveKind::Uint, 2, json!(65536) ; "uint16 overflow")]
    #[test_case(PrimitiveKind::Uint, 4, json!(-1) ; "negative unsigned")]
    #[test_case(PrimitiveKind::Int, 4, json!(1.5) ; "fractional int")]
    #[test_case(PrimitiveKind::Float, 8, json!("1.0") ; "string as float")]
    #[test_case(PrimitiveKind::Float, 4, json!(1e40) ; "float32 overflow")]
    #[test_case(PrimitiveKind::Float, 4, json!(-1e40) ; "float32 negative overflow")]
    #[test_case(PrimitiveKind::String, 2, json!("abc") ; "string too long")]
    #[test_case(PrimitiveKind::String, 4, json!(7) ; "number as string")]
    #[test_case(PrimitiveKind::Int, 8, json!([1, 2]) ; "array")]
    #[test_case(PrimitiveKind::Int, 8, json!({"a": 1}) ; "object")]
    fn test_encode_rejects(kind: PrimitiveKind, width: usize, value: Value) {
        let ty = PrimitiveType::new(kind, width);
        let mut buf = vec![0u8; width];
        assert!(matches!(ty.encode(&value, &mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn test_validate_widths() {
        assert!(PrimitiveType::new(PrimitiveKind::Int, 3).validate().is_err());
        assert!(PrimitiveType::new(PrimitiveKind::Float, 2).validate().is_err());
        assert!(PrimitiveType::new(PrimitiveKind::String, 0).validate().is_err());
        assert!(PrimitiveType::new(PrimitiveKind::Uint, 8).validate().is_ok());
    }

    #[test]
    fn test_parse_from_config() {
        let ty: PrimitiveType = serde_json::from_value(json!({"type": "float", "width": 4})).unwrap();
        assert_eq!(ty, PrimitiveType::new(PrimitiveKind::Float, 4));
        assert_eq!(ty.to_string(), "float32");
    }
}
