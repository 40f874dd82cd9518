//! Opaque pagination cursor codec.
//!
//! Cursors encode the `(sort value, tie-break id)` boundary of the last
//! item on a page, plus the sort/order/filter the page was fetched with,
//! as URL-safe base64 over compact JSON. The token is versioned and
//! self-describing so a future sort-key addition fails closed on old
//! tokens instead of silently misbehaving.
//!
//! Decoding validates the token against the *current* query: a cursor
//! minted for one sort/order/filter combination is rejected when replayed
//! against another. That rejection is a distinct error, never a silent
//! reset to page one, and never conflated with "no more results".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current cursor token format version.
pub const CURSOR_VERSION: u8 = 1;

/// Why a cursor token was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Token is not valid base64/JSON or carries an impossible payload.
    #[error("malformed cursor token")]
    Malformed,

    /// Token was minted by an incompatible format version.
    #[error("unsupported cursor version")]
    Version,

    /// Token was minted for a different sort, order, or filter.
    #[error("cursor does not match the current sort, order, or filter")]
    QueryMismatch,
}

/// Sort keys accepted for patient listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientSortKey {
    Name,
    DateOfBirth,
    CreatedAt,
}

impl PatientSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientSortKey::Name => "name",
            PatientSortKey::DateOfBirth => "date_of_birth",
            PatientSortKey::CreatedAt => "created_at",
        }
    }
}

impl std::str::FromStr for PatientSortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(PatientSortKey::Name),
            "date_of_birth" => Ok(PatientSortKey::DateOfBirth),
            "created_at" => Ok(PatientSortKey::CreatedAt),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

/// Sort direction. The tie-break id follows the same direction so the
/// composite `(sort value, id)` order is strict and total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    /// SQL comparison operator selecting rows strictly beyond a boundary.
    pub fn beyond_operator(&self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Boundary pair of the last item on a page. The sort value is carried as
/// a string (dates in ISO 8601) so resumption never needs to look the
/// entity up again — comparing against the recorded value is enough even
/// if the entity was deleted in the meantime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CursorBoundary {
    id: Uuid,
    value: String,
}

/// Decoded patient-listing cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientCursor {
    pub sort: PatientSortKey,
    pub order: SortOrder,
    /// Name filter active when the cursor was minted. Bound into the
    /// token so a cursor cannot be replayed against a different filter.
    pub name: Option<String>,
    pub last_id: Uuid,
    pub last_value: String,
}

#[derive(Serialize, Deserialize)]
struct PatientCursorPayload {
    v: u8,
    sort: PatientSortKey,
    order: SortOrder,
    name: Option<String>,
    last: CursorBoundary,
}

fn encode_payload<T: Serialize>(payload: &T) -> String {
    // serde_json never fails on these payloads (no maps with non-string
    // keys, no non-finite floats).
    let raw = serde_json::to_vec(payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(raw)
}

fn decode_payload<T: for<'de> Deserialize<'de>>(token: &str) -> Result<T, CursorError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| CursorError::Malformed)?;
    serde_json::from_slice(&raw).map_err(|_| CursorError::Malformed)
}

/// Encode a patient cursor as an opaque token.
pub fn encode_patient_cursor(cursor: &PatientCursor) -> String {
    encode_payload(&PatientCursorPayload {
        v: CURSOR_VERSION,
        sort: cursor.sort,
        order: cursor.order,
        name: cursor.name.clone(),
        last: CursorBoundary {
            id: cursor.last_id,
            value: cursor.last_value.clone(),
        },
    })
}

/// Decode a patient cursor token and check it against the current query.
pub fn decode_patient_cursor(
    token: &str,
    sort: PatientSortKey,
    order: SortOrder,
    name: Option<&str>,
) -> Result<PatientCursor, CursorError> {
    let payload: PatientCursorPayload = decode_payload(token)?;

    if payload.v != CURSOR_VERSION {
        return Err(CursorError::Version);
    }
    if payload.sort != sort || payload.order != order || payload.name.as_deref() != name {
        return Err(CursorError::QueryMismatch);
    }
    if payload.last.value.is_empty() && sort != PatientSortKey::Name {
        return Err(CursorError::Malformed);
    }

    Ok(PatientCursor {
        sort: payload.sort,
        order: payload.order,
        name: payload.name,
        last_id: payload.last.id,
        last_value: payload.last.value,
    })
}

/// Decoded note-listing cursor. Note listings use a fixed order
/// (`taken_at DESC, id DESC`), so only the owning patient is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteCursor {
    pub patient_id: Uuid,
    pub last_taken_at: DateTime<Utc>,
    pub last_id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct NoteCursorPayload {
    v: u8,
    patient_id: Uuid,
    last_taken_at: DateTime<Utc>,
    last_id: Uuid,
}

/// Encode a note cursor as an opaque token.
pub fn encode_note_cursor(cursor: &NoteCursor) -> String {
    encode_payload(&NoteCursorPayload {
        v: CURSOR_VERSION,
        patient_id: cursor.patient_id,
        last_taken_at: cursor.last_taken_at,
        last_id: cursor.last_id,
    })
}

/// Decode a note cursor token, rejecting tokens minted for another patient.
pub fn decode_note_cursor(token: &str, patient_id: Uuid) -> Result<NoteCursor, CursorError> {
    let payload: NoteCursorPayload = decode_payload(token)?;

    if payload.v != CURSOR_VERSION {
        return Err(CursorError::Version);
    }
    if payload.patient_id != patient_id {
        return Err(CursorError::QueryMismatch);
    }

    Ok(NoteCursor {
        patient_id: payload.patient_id,
        last_taken_at: payload.last_taken_at,
        last_id: payload.last_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PatientCursor {
        PatientCursor {
            sort: PatientSortKey::Name,
            order: SortOrder::Asc,
            name: Some("smith".to_string()),
            last_id: Uuid::new_v4(),
            last_value: "Smith, Jane".to_string(),
        }
    }

    #[test]
    fn test_patient_cursor_round_trip() {
        let cursor = sample();
        let token = encode_patient_cursor(&cursor);
        let decoded =
            decode_patient_cursor(&token, PatientSortKey::Name, SortOrder::Asc, Some("smith"))
                .unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode_patient_cursor(&sample());
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_sort_mismatch_rejected() {
        let token = encode_patient_cursor(&sample());
        let err = decode_patient_cursor(
            &token,
            PatientSortKey::DateOfBirth,
            SortOrder::Asc,
            Some("smith"),
        )
        .unwrap_err();
        assert_eq!(err, CursorError::QueryMismatch);
    }

    #[test]
    fn test_order_mismatch_rejected() {
        let token = encode_patient_cursor(&sample());
        let err =
            decode_patient_cursor(&token, PatientSortKey::Name, SortOrder::Desc, Some("smith"))
                .unwrap_err();
        assert_eq!(err, CursorError::QueryMismatch);
    }

    #[test]
    fn test_filter_mismatch_rejected() {
        let token = encode_patient_cursor(&sample());
        let err = decode_patient_cursor(&token, PatientSortKey::Name, SortOrder::Asc, None)
            .unwrap_err();
        assert_eq!(err, CursorError::QueryMismatch);
    }

    #[test]
    fn test_garbage_token_is_malformed_not_mismatch() {
        let err = decode_patient_cursor("!!!not base64!!!", PatientSortKey::Name, SortOrder::Asc, None)
            .unwrap_err();
        assert_eq!(err, CursorError::Malformed);

        let valid_b64_bad_json = URL_SAFE_NO_PAD.encode(b"{\"v\":1");
        let err = decode_patient_cursor(
            &valid_b64_bad_json,
            PatientSortKey::Name,
            SortOrder::Asc,
            None,
        )
        .unwrap_err();
        assert_eq!(err, CursorError::Malformed);
    }

    #[test]
    fn test_unknown_version_fails_closed() {
        let payload = serde_json::json!({
            "v": 2,
            "sort": "name",
            "order": "asc",
            "name": null,
            "last": { "id": Uuid::nil(), "value": "x" },
        });
        let token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let err =
            decode_patient_cursor(&token, PatientSortKey::Name, SortOrder::Asc, None).unwrap_err();
        assert_eq!(err, CursorError::Version);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let mut token = encode_patient_cursor(&sample());
        token.push('x');
        // Either the base64 or the JSON layer catches it; both are Malformed.
        let result =
            decode_patient_cursor(&token, PatientSortKey::Name, SortOrder::Asc, Some("smith"));
        assert!(matches!(
            result,
            Err(CursorError::Malformed) | Err(CursorError::QueryMismatch)
        ));
    }

    #[test]
    fn test_note_cursor_round_trip() {
        let cursor = NoteCursor {
            patient_id: Uuid::new_v4(),
            last_taken_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap(),
            last_id: Uuid::new_v4(),
        };
        let token = encode_note_cursor(&cursor);
        assert_eq!(decode_note_cursor(&token, cursor.patient_id).unwrap(), cursor);
    }

    #[test]
    fn test_note_cursor_bound_to_patient() {
        let cursor = NoteCursor {
            patient_id: Uuid::new_v4(),
            last_taken_at: Utc::now(),
            last_id: Uuid::new_v4(),
        };
        let token = encode_note_cursor(&cursor);
        let err = decode_note_cursor(&token, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, CursorError::QueryMismatch);
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!(
            "date_of_birth".parse::<PatientSortKey>().unwrap(),
            PatientSortKey::DateOfBirth
        );
        assert!("dob".parse::<PatientSortKey>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("descending".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_beyond_operator() {
        assert_eq!(SortOrder::Asc.beyond_operator(), ">");
        assert_eq!(SortOrder::Desc.beyond_operator(), "<");
    }
}
