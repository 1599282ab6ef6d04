//! Caller identity helpers shared by the hub and the admission layer.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Identity assigned to callers that did not present one.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Falls back to [`ANONYMOUS_IDENTITY`] for a missing or blank identity.
pub fn resolve_identity(raw: Option<&str>) -> &str {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => ANONYMOUS_IDENTITY,
    }
}
