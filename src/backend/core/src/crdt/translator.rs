//! Wire translators for container values.
//!
//! A translator is the only place that knows how a native value looks on the
//! wire. Containers stay format-agnostic: they hand values to their translator
//! on the way out and get either a value or a [`DecodeError`] on the way in.
//!
//! Floats get special treatment because JSON has no representation for
//! infinities, and `-inf` is the identity score of a [`HighScore`].
//!
//! [`DecodeError`]: crate::error::ErrorCode::DecodeError
//! [`HighScore`]: super::HighScore

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use crate::error::{Result, SyncError};

/// Encode/decode pair mapping a native value to its wire form.
pub trait Translator<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Value>;
    fn decode(&self, value: &Value) -> Result<T>;
}

/// Encode a float, spelling out non-finite values as strings.
pub fn encode_float(value: f64) -> Value {
    if value.is_nan() {
        Value::String("nan".to_string())
    } else if value == f64::INFINITY {
        Value::String("inf".to_string())
    } else if value == f64::NEG_INFINITY {
        Value::String("-inf".to_string())
    } else {
        // Finite floats always produce a JSON number.
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Inverse of [`encode_float`]. Integers are accepted and widened.
///
/// `"nan"` is rejected: it sorts above `inf` under `total_cmp`, so a single
/// NaN score or timestamp would pin a register forever.
pub fn decode_float(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            SyncError::decode(format!("number {} is not representable as f64", n))
        }),
        Value::String(s) => match s.as_str() {
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "nan" => Err(SyncError::decode("NaN is not a valid score or timestamp")),
            other => Err(SyncError::decode(format!(
                "expected a float, got string {:?}",
                other
            ))),
        },
        other => Err(SyncError::decode(format!("expected a float, got {}", other))),
    }
}

/// Split a wire tuple into exactly `N` parts.
pub fn decode_tuple<const N: usize>(value: &Value) -> Result<&[Value; N]> {
    let items = value
        .as_array()
        .ok_or_else(|| SyncError::decode(format!("expected a {}-tuple, got {}", N, value)))?;
    items.as_slice().try_into().map_err(|_| {
        SyncError::decode(format!("expected a {}-tuple, got {} items", N, items.len()))
    })
}

/// Deterministic text form of an encoded value, used for tie-breaks.
///
/// `serde_json::Map` is ordered by key unless `preserve_order` is enabled, so
/// the same value always renders the same way on every replica.
pub fn canonical_form(value: &Value) -> String {
    value.to_string()
}

/// `f64` as a JSON number (or tagged string when non-finite).
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatTranslator;

impl Translator<f64> for FloatTranslator {
    fn encode(&self, value: &f64) -> Result<Value> {
        Ok(encode_float(*value))
    }

    fn decode(&self, value: &Value) -> Result<f64> {
        decode_float(value)
    }
}

/// `String` as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringTranslator;

impl Translator<String> for StringTranslator {
    fn encode(&self, value: &String) -> Result<Value> {
        Ok(Value::String(value.clone()))
    }

    fn decode(&self, value: &Value) -> Result<String> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| SyncError::decode(format!("expected a string, got {}", value)))
    }
}

/// Any serde type, through `serde_json`.
pub struct SerdeTranslator<T>(PhantomData<fn() -> T>);

impl<T> SerdeTranslator<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SerdeTranslator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Translator<T> for SerdeTranslator<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|e| SyncError::encode(e.to_string()))
    }

    fn decode(&self, value: &Value) -> Result<T> {
        T::deserialize(value).map_err(|e| SyncError::decode(e.to_string()))
    }
}

/// `#[serde(with = "float_serde")]` for fields that may hold infinities.
pub mod float_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        super::encode_float(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        super::decode_float(&value).map_err(|e| serde::de::Error::custom(e.message().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_float_non_finite_round_trip() {
        for v in [f64::NEG_INFINITY, f64::INFINITY, 0.0, -2.5] {
            assert_eq!(decode_float(&encode_float(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_float_rejects_nan() {
        let err = decode_float(&encode_float(f64::NAN)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
    }

    #[test]
    fn test_float_accepts_integers() {
        assert_eq!(decode_float(&json!(3)).unwrap(), 3.0);
    }

    #[test]
    fn test_float_rejects_garbage() {
        let err = decode_float(&json!("three")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
        assert!(decode_float(&json!([1.0])).is_err());
    }

    #[test]
    fn test_string_translator() {
        let t = StringTranslator;
        assert_eq!(t.decode(&t.encode(&"lap".to_string()).unwrap()).unwrap(), "lap");
        assert_eq!(t.decode(&json!(1)).unwrap_err().code(), ErrorCode::DecodeError);
    }

    #[test]
    fn test_decode_tuple_arity() {
        assert!(decode_tuple::<2>(&json!([1, 2])).is_ok());
        assert!(decode_tuple::<2>(&json!([1, 2, 3])).is_err());
        assert!(decode_tuple::<2>(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_serde_translator() {
        let t = SerdeTranslator::<Vec<u32>>::new();
        let wire = t.encode(&vec![1, 2]).unwrap();
        assert_eq!(wire, json!([1, 2]));
        assert!(t.decode(&json!("nope")).is_err());
    }

    #[test]
    fn test_float_serde_field() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Record {
            #[serde(with = "float_serde")]
            score: f64,
        }

        let text = serde_json::to_string(&Record {
            score: f64::NEG_INFINITY,
        })
        .unwrap();
        assert_eq!(text, r#"{"score":"-inf"}"#);
        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back.score, f64::NEG_INFINITY);
    }
}
