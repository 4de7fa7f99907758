//! Defensive recovery of the model's response onto the fixed schema.
//!
//! ## Why is normalization necessary?
//!
//! Even a well-prompted model occasionally disobeys the "respond with only
//! the JSON" rule: it wraps the object in ` ```json ` fences, prepends a
//! sentence of prose, or returns something that is not JSON at all. None of
//! that may fail the document — a certificate that rasterised and reached the
//! model always produces a record, in the worst case all-sentinel.
//!
//! Fence stripping is an explicit, named step ([`strip_code_fences`]) rather
//! than ad hoc string replacement, so its edge cases (no fences, partial
//! fences, leading prose) are unit-tested in isolation.

use crate::schema::{CertificateFields, FIELD_KEYS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());

/// Remove markdown code-fence markers and surrounding whitespace.
///
/// Removes every ```` ```json ```` / ```` ``` ```` marker wherever it
/// appears, so partial fences (an opening marker with no closing one) and
/// fenced blocks preceded by prose are handled the same way. The content
/// between the markers is untouched.
pub fn strip_code_fences(raw: &str) -> String {
    RE_FENCE.replace_all(raw.trim(), "").trim().to_string()
}

/// Parse the model's raw response into a [`CertificateFields`] record.
///
/// On a successful parse of a JSON object, known keys with string values are
/// overlaid onto the all-sentinel default; unknown keys and non-string values
/// are ignored. On any parse failure or non-object result the default record
/// is returned unchanged — this is a recoverable condition, logged but never
/// an error. The result always has exactly the ten schema fields.
pub fn normalize(raw: &str) -> CertificateFields {
    let cleaned = strip_code_fences(raw);

    let parsed: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, response_len = raw.len(), "model response is not JSON, keeping sentinel defaults");
            return CertificateFields::default();
        }
    };

    let map = match parsed.as_object() {
        Some(m) => m,
        None => {
            warn!("model response parsed to a non-object, keeping sentinel defaults");
            return CertificateFields::default();
        }
    };

    let mut fields = CertificateFields::default();
    let mut applied = 0usize;
    for key in FIELD_KEYS {
        if let Some(value) = map.get(key).and_then(Value::as_str) {
            fields.set_field(key, value);
            applied += 1;
        }
    }
    debug!(applied, "overlaid model fields onto schema defaults");

    fields
}
