//! Medical record number (MRN) handling.
//!
//! MRNs are opaque clinical identifiers with a deterministic *format* but
//! no encoded meaning — in particular they never derive from name or DOB.
//! Uniqueness is enforced by a database unique index; generation here only
//! needs to make collisions unlikely. MRNs are PHI-adjacent: never log them.

use rand::RngCore;

use crate::models::ValidationError;

/// Maximum MRN length.
pub const MAX_MRN_LEN: usize = 50;

/// Normalize and validate a caller-supplied MRN.
///
/// Whitespace is trimmed; case is preserved (callers may depend on exact
/// casing). The character set is kept conservative — alphanumerics and
/// `-` only — to avoid downstream escaping issues.
pub fn normalize_mrn(mrn: &str) -> Result<String, ValidationError> {
    let normalized = mrn.trim();
    if normalized.is_empty() {
        return Err(ValidationError::EmptyMrn);
    }
    if normalized.chars().count() > MAX_MRN_LEN {
        return Err(ValidationError::MrnTooLong);
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ValidationError::MrnInvalidChar);
    }
    Ok(normalized.to_string())
}

/// Generate an MRN: `{prefix}` + 16 uppercase hex chars from 64 bits of
/// randomness. Collision-safe in practice; the DB unique index is the
/// source of truth and callers retry on conflict.
pub fn generate_mrn(prefix: &str) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", prefix, hex::encode_upper(bytes))
}
