//! Loosely-typed JSON handling.
//!
//! Unique responsibility: turn the provider's JSON into typed values.
//!
//! - [`JsonScalar`]: a decoded scalar whose wire type is not guaranteed
//!   (`123`, `123.0` and `"123"` all occur for the same id),
//! - [`ResourceId`]: the canonical string identifier built from a scalar,
//! - [`Sensitive`]: wrapper that keeps secrets out of `Debug` and `Display` output,
//! - [`RemoteDocument`]: tolerant accessors over the inner object of a
//!   `{"<kind>": {...}}` response envelope.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::hostman_error::{ReconcileError, Result};

/// A decoded JSON scalar of unknown wire type.
///
/// Deserialization goes through [`Value`], so it classifies exactly like
/// `From<&Value>` (an unsigned id above `i64::MAX` stays exact).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonScalar {
    /// JSON string.
    String(String),
    /// JSON number that fits an `i64`.
    Integer(i64),
    /// JSON floating point number.
    Float(f64),
    /// Anything else (bool, huge unsigned, object...).
    Other(Value),
}

impl JsonScalar {
    /// Canonical string form used for identifiers and comparisons.
    ///
    /// Strings pass through, integers are decimal, integral floats drop the
    /// fractional part, anything else uses its JSON text.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) if is_integral(*f) => format!("{f:.0}"),
            Self::Float(f) => f.to_string(),
            Self::Other(v) => v.to_string(),
        }
    }

    /// Whether this scalar carries no value (null or empty string).
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(s) => s.trim().is_empty(),
            Self::Other(v) => v.is_null(),
            Self::Integer(_) | Self::Float(_) => false,
        }
    }
}

impl From<&Value> for JsonScalar {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) if n.is_i64() => n.as_i64().map_or_else(|| Self::Other(value.clone()), Self::Integer),
            Value::Number(n) if n.is_f64() => n.as_f64().map_or_else(|| Self::Other(value.clone()), Self::Float),
            other => Self::Other(other.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for JsonScalar {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(|value| Self::from(&value))
    }
}

impl From<&str> for JsonScalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for JsonScalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl fmt::Display for JsonScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// `f64::fract` is only const on recent toolchains.
#[allow(clippy::float_cmp, clippy::missing_const_for_fn)]
fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0
}

/// Convert a JSON number to `i64` without loss.
///
/// Floats are accepted only when integral and in range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn as_integer(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if let Some(u) = n.as_u64() {
        return i64::try_from(u).ok();
    }
    let f = n.as_f64()?;
    (is_integral(f) && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Optional integer that counts as set (zero means unset).
#[must_use]
pub fn non_zero(value: Option<i64>) -> Option<i64> {
    value.filter(|n| *n != 0)
}

/// Optional string that counts as set (blank means unset).
#[must_use]
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Canonical identifier of a remote resource.
///
/// Empty means "not created yet" or "already deleted".
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "JsonScalar", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a `ResourceId` from an already canonical string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the record is absent remotely.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Forget the identifier.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl From<JsonScalar> for ResourceId {
    fn from(value: JsonScalar) -> Self {
        if value.is_blank() {
            return Self::default();
        }
        Self(value.canonical())
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceId").field(&self.0).finish()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A secret value: serialized as-is for the host, never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    /// Wrap a secret.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the secret.
    #[must_use]
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Inner object of a provider response, with tolerant field accessors.
///
/// Every accessor returns `None` for an absent or `null` field instead of
/// failing, so optional attributes never break a read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDocument(Map<String, Value>);

impl RemoteDocument {
    /// Parse `body` and unwrap the object stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the body is not JSON and `MissingField` if `key`
    /// is absent or not an object.
    pub fn from_envelope(body: &[u8], key: &'static str) -> Result<Self> {
        let mut root: Value = serde_json::from_slice(body).map_err(|source| ReconcileError::Decode {
            context: format!("`{key}` envelope"),
            source,
        })?;
        match root.get_mut(key).map(Value::take) {
            Some(Value::Object(map)) => Ok(Self(map)),
            _ => Err(ReconcileError::MissingField {
                context: "response envelope".to_string(),
                field: key,
            }),
        }
    }

    /// Canonical `id` of the document.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` if there is no usable id.
    pub fn id(&self, context: &str) -> Result<ResourceId> {
        self.scalar("id")
            .map(ResourceId::from)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReconcileError::MissingField {
                context: context.to_string(),
                field: "id",
            })
    }

    /// Raw access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// String field.
    #[must_use]
    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Integer field; integral floats are accepted.
    #[must_use]
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(as_integer)
    }

    /// Boolean field.
    #[must_use]
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Any scalar field.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<JsonScalar> {
        self.get(key).map(JsonScalar::from)
    }

    /// Nested object.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Self> {
        match self.get(key) {
            Some(Value::Object(map)) => Some(Self(map.clone())),
            _ => None,
        }
    }

    /// Array of nested objects; non-object entries are skipped.
    #[must_use]
    pub fn objects(&self, key: &str) -> Vec<Self> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_object().cloned().map(Self))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl From<Map<String, Value>> for RemoteDocument {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_id_in_every_wire_encoding_normalizes_identically() {
        for raw in [json!(123), json!(123.0), json!("123")] {
            assert_eq!(JsonScalar::from(&raw).canonical(), "123", "input {raw}");
        }
    }

    #[test]
    fn non_integral_and_odd_scalars_fall_back_to_json_text() {
        assert_eq!(JsonScalar::from(&json!(1.5)).canonical(), "1.5");
        assert_eq!(JsonScalar::from(&json!(true)).canonical(), "true");
        assert_eq!(JsonScalar::from(&json!(u64::MAX)).canonical(), u64::MAX.to_string());
    }

    #[test]
    fn huge_unsigned_id_deserializes_without_precision_loss() {
        let raw = json!(u64::MAX);
        let decoded: Option<JsonScalar> = serde_json::from_value(raw.clone()).ok();
        assert_eq!(decoded.as_ref().map(JsonScalar::canonical), Some(u64::MAX.to_string()));
        assert_eq!(decoded, Some(JsonScalar::from(&raw)));

        let id: ResourceId = serde_json::from_value(raw).unwrap_or_default();
        assert_eq!(id.as_str(), "18446744073709551615");
    }

    #[test]
    fn resource_id_deserializes_from_any_scalar() {
        let from_num: ResourceId = serde_json::from_value(json!(42)).unwrap_or_default();
        let from_float: ResourceId = serde_json::from_value(json!(42.0)).unwrap_or_default();
        let from_str: ResourceId = serde_json::from_value(json!("42")).unwrap_or_default();
        assert_eq!(from_num.as_str(), "42");
        assert_eq!(from_num, from_float);
        assert_eq!(from_num, from_str);

        let null: ResourceId = serde_json::from_value(json!(null)).unwrap_or_else(|_| ResourceId::new("x"));
        assert!(null.is_empty());
        assert_eq!(serde_json::to_value(&from_num).ok(), Some(json!("42")));
    }

    #[test]
    fn integer_conversion_is_loss_free() {
        assert_eq!(as_integer(&json!(200)), Some(200));
        assert_eq!(as_integer(&json!(200.0)), Some(200));
        assert_eq!(as_integer(&json!(200.5)), None);
        assert_eq!(as_integer(&json!("200")), None);
    }

    #[test]
    fn envelope_unwraps_inner_document_and_tolerates_missing_fields() {
        let body = br#"{"server": {"id": 7.0, "name": "web", "root_pass": null}}"#;
        let doc = RemoteDocument::from_envelope(body, "server").unwrap_or_default();
        assert_eq!(doc.id("server").ok(), Some(ResourceId::new("7")));
        assert_eq!(doc.string("name").as_deref(), Some("web"));
        assert_eq!(doc.string("root_pass"), None);
        assert_eq!(doc.integer("bandwidth"), None);
    }

    #[test]
    fn envelope_errors_are_decode_failures() {
        assert!(matches!(
            RemoteDocument::from_envelope(b"not json", "ip"),
            Err(ReconcileError::Decode { .. })
        ));
        assert!(matches!(
            RemoteDocument::from_envelope(br#"{"server": {}}"#, "ip"),
            Err(ReconcileError::MissingField { field: "ip", .. })
        ));
    }

    #[test]
    fn sensitive_values_never_show_in_debug_or_display() {
        let secret = Sensitive::new("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "<redacted>");
        assert_eq!(format!("{secret}"), "<redacted>");
        assert_eq!(secret.to_string(), "<redacted>");
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(serde_json::to_value(&secret).ok(), Some(json!("hunter2")));
    }
}
