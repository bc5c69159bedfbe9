//! The value domain carried in arguments and payloads.
//!
//! Scalars, sequences, and string-keyed mappings, recursively. Anything that
//! `serde_json` can represent is accepted; anything it rejects (non-string map
//! keys, failing `Serialize` impls) is a serialization error at the caller.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WireError;
use crate::WireResult;

pub use serde_json::Value;

/// Convert any serializable value into a wire value.
pub fn to_value<T: Serialize>(value: T) -> WireResult<Value> {
    serde_json::to_value(value).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Convert a wire value back into a typed value.
pub fn from_value<T: DeserializeOwned>(value: Value) -> WireResult<T> {
    serde_json::from_value(value).map_err(|e| WireError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_nested_values_convert() {
        let value = to_value(vec![vec![1, 2], vec![3]]).unwrap();
        assert_eq!(value, serde_json::json!([[1, 2], [3]]));

        let back: Vec<Vec<i32>> = from_value(value).unwrap();
        assert_eq!(back, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_non_string_keys_rejected() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");

        let err = to_value(&map).unwrap_err();
        assert!(matches!(err, WireError::Serialization(_)));
    }

    #[test]
    fn test_type_mismatch_on_decode() {
        let err = from_value::<u32>(Value::String("nope".into())).unwrap_err();
        assert!(matches!(err, WireError::Serialization(_)));
    }
}
