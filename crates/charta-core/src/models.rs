//! Core data models for charta.
//!
//! These types are shared across all charta crates and represent the core
//! domain entities: patients, their clinical notes, and the optional
//! derived SOAP document that accompanies a note.
//!
//! The guiding invariant of the whole model is that the raw note content
//! is the authoritative clinical record. Everything derived from it
//! (extracted text, parsed SOAP sections) is best-effort metadata and must
//! never be read as replacing or amending the raw content.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::soap::SoapSections;

/// Maximum length of the free-form note type label.
pub const MAX_NOTE_TYPE_LEN: usize = 50;

/// Expected hex length of a SHA-256 checksum.
pub const CHECKSUM_HEX_LEN: usize = 64;

// =============================================================================
// PATIENT
// =============================================================================

/// A registered patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub date_of_birth: NaiveDate,
    /// Medical record number. Opaque identifier, unique per patient.
    /// PHI-adjacent: never emit in logs.
    pub mrn: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// NOTE
// =============================================================================

/// Authoritative content backing of a note.
///
/// A note is either inline text or a reference to a stored file, never
/// both and never neither. The sum type makes the "exactly one" rule hold
/// by construction; [`NoteDraft::validate`] is the only place the ambiguous
/// two-optional shape is allowed to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoteContent {
    /// Inline text supplied directly in the submission.
    Inline { text: String, mime_type: String },
    /// File-backed content held in the blob store.
    File {
        /// Storage-relative blob key. Never an absolute path.
        key: String,
        size_bytes: i64,
        /// SHA-256 of the stored bytes, 64 hex chars when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum_sha256: Option<String>,
        mime_type: String,
    },
}

impl NoteContent {
    /// Blob key for file-backed content, if any.
    pub fn file_key(&self) -> Option<&str> {
        match self {
            NoteContent::File { key, .. } => Some(key),
            NoteContent::Inline { .. } => None,
        }
    }

    /// Inline text, if this note carries its content directly.
    pub fn inline_text(&self) -> Option<&str> {
        match self {
            NoteContent::Inline { text, .. } => Some(text),
            NoteContent::File { .. } => None,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            NoteContent::Inline { mime_type, .. } => mime_type,
            NoteContent::File { mime_type, .. } => mime_type,
        }
    }
}

/// Lifecycle state of a note.
///
/// Notes are soft-deleted for auditability; a deleted note keeps its row
/// but disappears from every normal read path. Read paths filter on this
/// state rather than null-checking a timestamp at each query site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NoteLifecycle {
    Active,
    Deleted { at: DateTime<Utc> },
}

impl NoteLifecycle {
    /// Reconstruct lifecycle state from a nullable deletion timestamp.
    pub fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => NoteLifecycle::Deleted { at },
            None => NoteLifecycle::Active,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, NoteLifecycle::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            NoteLifecycle::Deleted { at } => Some(*at),
            NoteLifecycle::Active => None,
        }
    }
}

/// A persisted clinical note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// When the clinician took the note. Never later than ingestion time.
    pub taken_at: DateTime<Utc>,
    /// Free-form label. The literal "soap" (trimmed, case-insensitive)
    /// selects the SOAP parsing path at ingestion; every other value is
    /// stored as-is with no special handling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_type: Option<String>,
    pub content: NoteContent,
    /// Plain-text shadow copy extracted from file-backed content at
    /// upload time. Kept apart from inline content so the two are never
    /// conflated. Absent for inline notes and non-text files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub lifecycle: NoteLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Text to feed the SOAP parser: inline content for inline notes, the
    /// extracted shadow copy for file-backed notes.
    pub fn parse_source(&self) -> Option<&str> {
        self.content.inline_text().or(self.extracted_text.as_deref())
    }
}

// =============================================================================
// DERIVED SOAP DOCUMENT
// =============================================================================

/// Derived structured record for a SOAP-formatted note.
///
/// Non-authoritative 1:1 companion to a [`Note`], created at ingestion iff
/// the parser extracted at least one non-empty section, and never mutated
/// afterwards. Schema and parser version are opaque tags so future parser
/// revisions can coexist with old derived rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapDocument {
    pub schema: String,
    pub parser_version: String,
    pub sections: SoapSections,
}

// =============================================================================
// NOTE VALIDATION
// =============================================================================

/// Reference to file content already written to the blob store.
#[derive(Debug, Clone)]
pub struct FileReference {
    pub key: String,
    pub size_bytes: i64,
    pub checksum_sha256: Option<String>,
}

/// A note submission before validation.
///
/// This is the one place both content modes are representable at once,
/// so that "both present" and "neither present" are detectable as
/// distinct validation failures instead of being unconstructible.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub taken_at: Option<DateTime<Utc>>,
    pub note_type: Option<String>,
    pub content_text: Option<String>,
    pub content_mime_type: Option<String>,
    pub file: Option<FileReference>,
}

/// A note submission that passed every invariant check.
#[derive(Debug, Clone)]
pub struct ValidatedNote {
    pub taken_at: DateTime<Utc>,
    pub note_type: Option<String>,
    pub content: NoteContent,
}

impl ValidatedNote {
    /// Whether the type label selects the SOAP parsing path.
    /// Comparison is trimmed and case-insensitive; "soap-note" does not match.
    pub fn is_soap(&self) -> bool {
        self.note_type
            .as_deref()
            .map(|t| t.trim().eq_ignore_ascii_case("soap"))
            .unwrap_or(false)
    }
}

/// A violated note or patient invariant. Each variant identifies exactly
/// which rule failed; callers report these synchronously and never
/// partially persist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("exactly one of inline text or file content must be provided, not both")]
    ContentModeConflict,

    #[error("a note requires either inline text or file content")]
    ContentMissing,

    #[error("taken_at is required")]
    MissingTakenAt,

    #[error("taken_at must not be in the future")]
    FutureTakenAt,

    #[error("note_type must be {MAX_NOTE_TYPE_LEN} characters or fewer")]
    NoteTypeTooLong,

    #[error("storage key must be a relative path without traversal segments")]
    InvalidStorageKey,

    #[error("checksum must be a {CHECKSUM_HEX_LEN}-character hex string")]
    InvalidChecksum,

    #[error("date_of_birth must be today or in the past")]
    FutureDateOfBirth,

    #[error("name must not be empty")]
    EmptyName,

    #[error("MRN must not be empty")]
    EmptyMrn,

    #[error("MRN must be {max} characters or fewer", max = crate::mrn::MAX_MRN_LEN)]
    MrnTooLong,

    #[error("MRN contains invalid characters")]
    MrnInvalidChar,
}

/// True when `key` is storage-relative: not absolute and free of `..`
/// traversal segments.
pub fn is_safe_storage_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
        return false;
    }
    !key.split(['/', '\\']).any(|segment| segment == "..")
}

impl NoteDraft {
    /// Validate every note invariant against the current time.
    ///
    /// Pure gate before persistence: no I/O, no side effects. Returns the
    /// first violated invariant as a distinct [`ValidationError`].
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedNote, ValidationError> {
        let taken_at = self.taken_at.ok_or(ValidationError::MissingTakenAt)?;
        if taken_at > now {
            return Err(ValidationError::FutureTakenAt);
        }

        if let Some(note_type) = self.note_type.as_deref() {
            if note_type.chars().count() > MAX_NOTE_TYPE_LEN {
                return Err(ValidationError::NoteTypeTooLong);
            }
        }

        let content = match (self.content_text, self.file) {
            (Some(_), Some(_)) => return Err(ValidationError::ContentModeConflict),
            (None, None) => return Err(ValidationError::ContentMissing),
            (Some(text), None) => NoteContent::Inline {
                text,
                mime_type: self
                    .content_mime_type
                    .unwrap_or_else(|| "text/plain".to_string()),
            },
            (None, Some(file)) => {
                if !is_safe_storage_key(&file.key) {
                    return Err(ValidationError::InvalidStorageKey);
                }
                if let Some(checksum) = file.checksum_sha256.as_deref() {
                    if checksum.len() != CHECKSUM_HEX_LEN
                        || !checksum.chars().all(|c| c.is_ascii_hexdigit())
                    {
                        return Err(ValidationError::InvalidChecksum);
                    }
                }
                NoteContent::File {
                    key: file.key,
                    size_bytes: file.size_bytes,
                    checksum_sha256: file.checksum_sha256,
                    mime_type: self
                        .content_mime_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                }
            }
        };

        Ok(ValidatedNote {
            taken_at,
            note_type: self.note_type,
            content,
        })
    }
}

/// Validate a patient date of birth against the current date.
pub fn validate_date_of_birth(
    date_of_birth: NaiveDate,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    if date_of_birth > today {
        return Err(ValidationError::FutureDateOfBirth);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn inline_draft() -> NoteDraft {
        NoteDraft {
            taken_at: Some(now() - Duration::hours(1)),
            note_type: Some("soap".to_string()),
            content_text: Some("S: chest pain".to_string()),
            content_mime_type: None,
            file: None,
        }
    }

    fn file_ref() -> FileReference {
        FileReference {
            key: "p1/n1/blob".to_string(),
            size_bytes: 42,
            checksum_sha256: Some("a".repeat(64)),
        }
    }

    #[test]
    fn test_inline_draft_validates() {
        let note = inline_draft().validate(now()).unwrap();
        assert_eq!(note.content.inline_text(), Some("S: chest pain"));
        assert_eq!(note.content.mime_type(), "text/plain");
        assert!(note.is_soap());
    }

    #[test]
    fn test_both_content_modes_rejected() {
        let mut draft = inline_draft();
        draft.file = Some(file_ref());
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::ContentModeConflict
        );
    }

    #[test]
    fn test_neither_content_mode_rejected() {
        let mut draft = inline_draft();
        draft.content_text = None;
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::ContentMissing
        );
    }

    #[test]
    fn test_future_taken_at_rejected() {
        let mut draft = inline_draft();
        draft.taken_at = Some(now() + Duration::seconds(1));
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::FutureTakenAt
        );
    }

    #[test]
    fn test_taken_at_exactly_now_allowed() {
        let mut draft = inline_draft();
        draft.taken_at = Some(now());
        assert!(draft.validate(now()).is_ok());
    }

    #[test]
    fn test_note_type_length_bound() {
        let mut draft = inline_draft();
        draft.note_type = Some("x".repeat(MAX_NOTE_TYPE_LEN));
        assert!(draft.clone().validate(now()).is_ok());

        draft.note_type = Some("x".repeat(MAX_NOTE_TYPE_LEN + 1));
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::NoteTypeTooLong
        );
    }

    #[test]
    fn test_note_type_content_is_unconstrained() {
        let mut draft = inline_draft();
        draft.note_type = Some("soap-note!! anything goes".to_string());
        let note = draft.validate(now()).unwrap();
        assert!(!note.is_soap());
    }

    #[test]
    fn test_absolute_storage_key_rejected() {
        let mut draft = inline_draft();
        draft.content_text = None;
        draft.file = Some(FileReference {
            key: "/etc/passwd".to_string(),
            ..file_ref()
        });
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::InvalidStorageKey
        );
    }

    #[test]
    fn test_traversal_storage_key_rejected() {
        let mut draft = inline_draft();
        draft.content_text = None;
        draft.file = Some(FileReference {
            key: "p1/../../../secrets".to_string(),
            ..file_ref()
        });
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::InvalidStorageKey
        );
    }

    #[test]
    fn test_checksum_length_enforced() {
        let mut draft = inline_draft();
        draft.content_text = None;
        draft.file = Some(FileReference {
            checksum_sha256: Some("abc123".to_string()),
            ..file_ref()
        });
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::InvalidChecksum
        );
    }

    #[test]
    fn test_checksum_must_be_hex() {
        let mut draft = inline_draft();
        draft.content_text = None;
        draft.file = Some(FileReference {
            checksum_sha256: Some("z".repeat(64)),
            ..file_ref()
        });
        assert_eq!(
            draft.validate(now()).unwrap_err(),
            ValidationError::InvalidChecksum
        );
    }

    #[test]
    fn test_file_draft_validates() {
        let mut draft = inline_draft();
        draft.content_text = None;
        draft.content_mime_type = Some("application/pdf".to_string());
        draft.file = Some(file_ref());
        let note = draft.validate(now()).unwrap();
        assert_eq!(note.content.file_key(), Some("p1/n1/blob"));
        assert_eq!(note.content.mime_type(), "application/pdf");
    }

    #[test]
    fn test_soap_label_matching() {
        for label in ["SOAP", " soap ", "Soap"] {
            let mut draft = inline_draft();
            draft.note_type = Some(label.to_string());
            assert!(draft.validate(now()).unwrap().is_soap(), "label {label:?}");
        }
        for label in ["soap-note", "", "progress"] {
            let mut draft = inline_draft();
            draft.note_type = Some(label.to_string());
            assert!(!draft.validate(now()).unwrap().is_soap(), "label {label:?}");
        }
    }

    #[test]
    fn test_lifecycle_round_trip() {
        assert_eq!(NoteLifecycle::from_deleted_at(None), NoteLifecycle::Active);
        let at = now();
        let deleted = NoteLifecycle::from_deleted_at(Some(at));
        assert!(deleted.is_deleted());
        assert_eq!(deleted.deleted_at(), Some(at));
        assert_eq!(NoteLifecycle::Active.deleted_at(), None);
    }

    #[test]
    fn test_dob_validation() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(validate_date_of_birth(today, today).is_ok());
        assert_eq!(
            validate_date_of_birth(today.succ_opt().unwrap(), today).unwrap_err(),
            ValidationError::FutureDateOfBirth
        );
    }
}
