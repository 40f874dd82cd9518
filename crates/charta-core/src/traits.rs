//! Core traits for charta abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cursor::{PatientSortKey, SortOrder};
use crate::error::Result;
use crate::models::{Note, Patient, SoapDocument, ValidatedNote};

/// Default page size for listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Maximum page size for listings.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Minimum name-filter length, after trimming. Shorter filters are
/// rejected rather than applied or silently ignored.
pub const MIN_NAME_FILTER_LEN: usize = 3;

// =============================================================================
// PATIENT REPOSITORY
// =============================================================================

/// Request for creating a patient.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub date_of_birth: NaiveDate,
    /// Explicit MRN. When absent and auto-generation is enabled, one is
    /// generated; otherwise creation is rejected.
    pub mrn: Option<String>,
}

/// Request for updating a patient. MRN is immutable by design.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

/// Request for listing patients with cursor pagination.
#[derive(Debug, Clone)]
pub struct ListPatientsRequest {
    pub limit: i64,
    /// Opaque cursor from a previous page, if resuming.
    pub cursor: Option<String>,
    /// Case-insensitive substring filter on name. Rejected when shorter
    /// than [`MIN_NAME_FILTER_LEN`] characters after trimming.
    pub name: Option<String>,
    pub sort: PatientSortKey,
    pub order: SortOrder,
}

impl Default for ListPatientsRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            cursor: None,
            name: None,
            sort: PatientSortKey::CreatedAt,
            order: SortOrder::Asc,
        }
    }
}

/// One page of patients.
#[derive(Debug, Clone, Serialize)]
pub struct ListPatientsResponse {
    pub items: Vec<Patient>,
    pub limit: i64,
    /// Token for the next page; null when this page ends the collection.
    pub next_cursor: Option<String>,
}

/// Repository for patient CRUD and listing.
#[async_trait]
pub trait PatientRepository: Send + Sync {
    /// Create a patient. Validates date of birth and MRN format, and
    /// generates an MRN when configured to.
    async fn create(&self, req: CreatePatientRequest) -> Result<Patient>;

    /// Fetch a patient by ID.
    async fn fetch(&self, id: Uuid) -> Result<Patient>;

    /// Update name and/or date of birth.
    async fn update(&self, id: Uuid, req: UpdatePatientRequest) -> Result<Patient>;

    /// Delete a patient. Rejected while the patient still owns notes.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// List patients with stable cursor pagination.
    async fn list(&self, req: ListPatientsRequest) -> Result<ListPatientsResponse>;

    /// Check whether a patient exists.
    async fn exists(&self, id: Uuid) -> Result<bool>;
}

// =============================================================================
// NOTE REPOSITORY
// =============================================================================

/// Request for ingesting a validated note.
#[derive(Debug, Clone)]
pub struct IngestNoteRequest {
    /// Note ID, chosen by the caller so file-backed submissions can key
    /// their blob under the note before the row exists.
    pub note_id: Uuid,
    pub patient_id: Uuid,
    pub note: ValidatedNote,
    /// Plain-text shadow copy for text-like file content. Ignored for
    /// inline notes (their text is already authoritative).
    pub extracted_text: Option<String>,
}

/// Request for listing a patient's notes (fixed order: taken_at DESC).
#[derive(Debug, Clone)]
pub struct ListNotesRequest {
    pub patient_id: Uuid,
    pub limit: i64,
    pub cursor: Option<String>,
}

/// One page of notes.
#[derive(Debug, Clone, Serialize)]
pub struct ListNotesResponse {
    pub items: Vec<Note>,
    pub limit: i64,
    pub next_cursor: Option<String>,
}

/// Repository for note ingestion and reads.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Persist a validated note, then opportunistically derive and persist
    /// SOAP structure. Ingestion success is never gated on parsing.
    async fn ingest(&self, req: IngestNoteRequest) -> Result<Note>;

    /// Fetch an active note owned by the given patient.
    async fn fetch(&self, patient_id: Uuid, note_id: Uuid) -> Result<Note>;

    /// List a patient's active notes, newest taken_at first.
    async fn list(&self, req: ListNotesRequest) -> Result<ListNotesResponse>;

    /// Fetch the derived SOAP document for a note, if one was produced.
    async fn fetch_structured(&self, patient_id: Uuid, note_id: Uuid)
        -> Result<Option<SoapDocument>>;

    /// Soft-delete a note (sets the deletion timestamp; the row remains).
    async fn soft_delete(&self, patient_id: Uuid, note_id: Uuid) -> Result<()>;

    /// Permanently delete a note and its derived record. Returns the blob
    /// key of file-backed content so the caller can release it from the
    /// blob store.
    async fn hard_delete(&self, patient_id: Uuid, note_id: Uuid) -> Result<Option<String>>;
}
