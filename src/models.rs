use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Kommo lead identifier.
pub type LeadId = i64;

/// Kommo contact identifier.
pub type ContactId = i64;

// ============ Canonical identifiers ============

/// Normalized identifier used for every status, pipeline, field and chat comparison.
///
/// Kommo (and hand-written client config files) mix numeric and string ids,
/// e.g. `142` vs `"142"`. Both deserialize into the same canonical form so
/// comparisons never depend on the upstream JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CanonicalId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for CanonicalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CanonicalId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for CanonicalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct CanonicalIdVisitor;

impl<'de> Visitor<'de> for CanonicalIdVisitor {
    type Value = CanonicalId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer or string identifier")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CanonicalId::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(CanonicalId(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.is_finite() && v.fract() == 0.0 {
            Ok(CanonicalId((v as i64).to_string()))
        } else {
            Err(E::custom(format!("non-integral identifier {}", v)))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CanonicalId::new(v))
    }
}

impl<'de> Deserialize<'de> for CanonicalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CanonicalIdVisitor)
    }
}

/// Deserializes an optional list, silently dropping elements that do not fit `T`
/// (and treating `null` / a non-array as an empty list).
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Like `Option<T>` but maps values of the wrong shape to `None` instead of failing.
fn lenient_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

// ============ Time windows ============

/// Half-open `[start, end)` window of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: i64,
    pub end: i64,
}

impl PeriodWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Inclusive upper bound, as Kommo's `[to]` filters expect.
    pub fn last_second(&self) -> i64 {
        self.end - 1
    }
}

// ============ CRM records ============

/// One entry of a record's `custom_fields_values`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomFieldEntry {
    #[serde(default, deserialize_with = "lenient_option")]
    pub field_id: Option<CanonicalId>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub field_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub field_name: Option<String>,
    /// Raw value objects, usually `{"value": ...}`; only the first one is significant.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub values: Vec<Value>,
}

impl CustomFieldEntry {
    /// Scalar content of the first value, if there is one.
    pub fn first_scalar(&self) -> Option<String> {
        self.values.first().and_then(value_scalar)
    }

    /// Scalar content of every value, in order.
    pub fn scalars(&self) -> Vec<String> {
        self.values.iter().filter_map(value_scalar).collect()
    }
}

/// Renders `{"value": <scalar>}` (or a bare scalar) as text.
fn value_scalar(value: &Value) -> Option<String> {
    let inner = match value {
        Value::Object(map) => map.get("value")?,
        other => other,
    };
    match inner {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactLink {
    pub id: ContactId,
    #[serde(default, deserialize_with = "lenient_option")]
    pub is_main: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadEmbedded {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub contacts: Vec<ContactLink>,
}

/// A Kommo lead (sales opportunity). Read-only snapshot for one report/export cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    #[serde(default, deserialize_with = "lenient_option")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub status_id: Option<CanonicalId>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub pipeline_id: Option<CanonicalId>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub responsible_user_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub created_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub updated_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub closed_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub custom_fields_values: Vec<CustomFieldEntry>,
    #[serde(rename = "_embedded", default, deserialize_with = "lenient_option")]
    pub embedded: Option<LeadEmbedded>,
}

impl Lead {
    /// Decodes one lead from a raw API item; `None` when the item has no usable id.
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value::<Lead>(value) {
            Ok(lead) => Some(lead),
            Err(e) => {
                tracing::warn!("Skipping malformed lead record: {}", e);
                None
            }
        }
    }

    pub fn has_status(&self, status: &CanonicalId) -> bool {
        self.status_id.as_ref() == Some(status)
    }

    /// First linked contact id, in API order.
    pub fn first_contact_id(&self) -> Option<ContactId> {
        self.embedded
            .as_ref()
            .and_then(|e| e.contacts.first())
            .map(|c| c.id)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().map(str::trim).unwrap_or("")
    }
}

/// A Kommo contact, used to resolve phone/email for a lead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    #[serde(default, deserialize_with = "lenient_option")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub custom_fields_values: Vec<CustomFieldEntry>,
}

impl Contact {
    /// All values of the system field with the given code (`PHONE`, `EMAIL`).
    pub fn values_by_code(&self, code: &str) -> Vec<String> {
        self.custom_fields_values
            .iter()
            .filter(|f| {
                f.field_code
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(code))
                    .unwrap_or(false)
            })
            .flat_map(|f| f.scalars())
            .collect()
    }

    pub fn phones(&self) -> Vec<String> {
        self.values_by_code("PHONE")
    }

    pub fn emails(&self) -> Vec<String> {
        self.values_by_code("EMAIL")
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().map(str::trim).unwrap_or("")
    }
}
