//! Custom-field lookup on lead records.

use crate::models::{CanonicalId, Lead};

/// Label used when a lead has no value for the requested field.
pub const UNKNOWN_VALUE: &str = "Unknown";

/// Scalar content of the first value of the first entry matching `field_id`.
pub fn extract_optional_field_value(lead: &Lead, field_id: &CanonicalId) -> Option<String> {
    lead.custom_fields_values
        .iter()
        .find(|entry| entry.field_id.as_ref() == Some(field_id))
        .and_then(|entry| entry.first_scalar())
}

/// Same lookup as [`extract_optional_field_value`], falling back to [`UNKNOWN_VALUE`].
///
/// Never fails: absent entries, empty value lists and non-scalar values all
/// resolve to the sentinel.
pub fn extract_field_value(lead: &Lead, field_id: &CanonicalId) -> String {
    extract_optional_field_value(lead, field_id).unwrap_or_else(|| UNKNOWN_VALUE.to_string())
}
