//! Serde helpers for flexible deserialization of inbound frames.
//!
//! When the `tracing` feature is enabled, failed deserializations are reported with the
//! JSON path of the offending field, which is usually enough to spot a server-side change.

use serde::Deserialize;
use serde::de::{self, DeserializeOwned};
use serde_json::Value;

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Session identifiers are strings on newer servers and integers on older ones.
/// Use with `#[serde_as(as = "StringFromAny")]` for `String` fields
/// or `#[serde_as(as = "Option<StringFromAny>")]` for `Option<String>`.
pub struct StringFromAny;

/// Wire shapes accepted for an identifier.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = match RawId::deserialize(deserializer) {
            Ok(RawId::Text(text)) => text,
            Ok(RawId::Unsigned(number)) => number.to_string(),
            Ok(RawId::Signed(number)) => number.to_string(),
            Err(_e) => return Err(de::Error::custom("expected a string or an integer id")),
        };
        Ok(id)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

/// Deserialize a JSON value, logging the failing path when deserialization fails.
#[cfg(feature = "tracing")]
pub fn deserialize_logged<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    use std::any::type_name;

    serde_path_to_error::deserialize(value).map_err(|e| {
        tracing::debug!(
            type_name = %type_name::<T>(),
            path = %e.path(),
            error = %e.inner(),
            "deserialization failed"
        );
        e.into_inner()
    })
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_logged<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    serde_json::from_value(value)
}
