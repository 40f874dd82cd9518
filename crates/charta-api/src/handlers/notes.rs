//! Note ingestion and read handlers.
//!
//! Two submission paths share one validation and ingestion pipeline:
//! inline JSON notes and multipart file uploads. The upload path rejects
//! whatever it can (timestamp, type label, MIME, size) before writing a
//! byte to the blob store, and releases the blob if a later check fails.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use charta_core::{
    FileReference, IngestNoteRequest, ListNotesRequest, NoteDraft, PatientRepository,
    DEFAULT_PAGE_LIMIT,
};
use charta_db::{BlobStore, NoteRepository};

use crate::{ApiError, AppState};

/// Inline note submission body.
#[derive(Debug, Deserialize)]
pub struct CreateNoteBody {
    pub taken_at: Option<DateTime<Utc>>,
    pub note_type: Option<String>,
    pub text: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListNotesQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteNoteQuery {
    /// When true, permanently removes the note, its derived record, and
    /// any stored file. Default is a soft delete.
    pub purge: Option<bool>,
}

pub async fn create_note(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(body): Json<CreateNoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = NoteDraft {
        taken_at: body.taken_at,
        note_type: body.note_type,
        content_text: Some(body.text),
        content_mime_type: body.mime_type,
        file: None,
    };
    let note = draft
        .validate(Utc::now())
        .map_err(charta_core::Error::Validation)?;

    let created = state
        .db
        .notes
        .ingest(IngestNoteRequest {
            note_id: Uuid::new_v4(),
            patient_id,
            note,
            extracted_text: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Multipart file upload.
///
/// # Multipart Fields
/// - `file`: note content (required)
/// - `taken_at`: RFC 3339 timestamp (required)
/// - `note_type`: free-form type label (optional)
pub async fn upload_note(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut content_type: Option<String> = None;
    let mut taken_at: Option<String> = None;
    let mut note_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("file") => {
                content_type = field.content_type().map(|c| c.to_string());
                file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
                        .to_vec(),
                );
            }
            Some("taken_at") => {
                taken_at = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?,
                );
            }
            Some("note_type") => {
                let val = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;
                if !val.trim().is_empty() {
                    note_type = Some(val.trim().to_string());
                }
            }
            _ => {} // ignore unknown fields
        }
    }

    // Everything checkable without the blob store gets checked first.
    let taken_at = taken_at
        .ok_or_else(|| ApiError::BadRequest("Missing taken_at field".to_string()))?
        .parse::<DateTime<Utc>>()
        .map_err(|_| ApiError::BadRequest("taken_at must be an RFC 3339 timestamp".to_string()))?;
    if taken_at > Utc::now() {
        return Err(ApiError::BadRequest(
            "taken_at cannot be in the future".to_string(),
        ));
    }

    let data = file_data
        .ok_or_else(|| ApiError::BadRequest("Missing file in multipart form".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    if data.len() as u64 > state.settings.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "file exceeds the {} byte upload limit",
            state.settings.max_upload_bytes
        )));
    }

    let mime_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
    if !state.settings.is_mime_allowed(&mime_type) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "MIME type {} is not accepted for note uploads",
            mime_type
        )));
    }

    if !state.db.patients.exists(patient_id).await? {
        return Err(ApiError::NotFound(format!("Patient {} not found", patient_id)));
    }

    // Text files get a plain-text shadow copy so file-backed SOAP notes
    // can still be parsed at ingestion.
    let extracted_text = if mime_type_essence(&mime_type) == "text/plain" {
        match String::from_utf8(data.clone()) {
            Ok(text) => Some(text),
            Err(_) => {
                return Err(ApiError::BadRequest(
                    "text/plain upload is not valid UTF-8".to_string(),
                ))
            }
        }
    } else {
        None
    };

    let note_id = Uuid::new_v4();
    let blob = state.store.put(patient_id, note_id, &data).await?;

    let draft = NoteDraft {
        taken_at: Some(taken_at),
        note_type,
        content_text: None,
        content_mime_type: Some(mime_type),
        file: Some(FileReference {
            key: blob.key.clone(),
            size_bytes: blob.size_bytes,
            checksum_sha256: Some(blob.checksum_sha256.clone()),
        }),
    };

    let note = match draft.validate(Utc::now()) {
        Ok(note) => note,
        Err(e) => {
            release_blob(&state, &blob.key).await;
            return Err(charta_core::Error::Validation(e).into());
        }
    };

    let created = match state
        .db
        .notes
        .ingest(IngestNoteRequest {
            note_id,
            patient_id,
            note,
            extracted_text,
        })
        .await
    {
        Ok(created) => created,
        Err(e) => {
            release_blob(&state, &blob.key).await;
            return Err(e.into());
        }
    };

    Ok((StatusCode::CREATED, Json(created)))
}

fn mime_type_essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Delete a blob whose note row never materialized. Failure leaves an
/// orphan file, which is harmless; the row is what matters.
async fn release_blob(state: &AppState, key: &str) {
    if let Err(e) = state.store.delete(key).await {
        warn!(
            subsystem = "api",
            component = "notes",
            op = "release_blob",
            error = %e,
            "Failed to remove blob after rejected upload"
        );
    }
}

pub async fn get_note(
    State(state): State<AppState>,
    Path((patient_id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.db.notes.fetch(patient_id, note_id).await?;
    Ok(Json(note))
}

pub async fn list_notes(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<ListNotesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.patients.exists(patient_id).await? {
        return Err(ApiError::NotFound(format!("Patient {} not found", patient_id)));
    }

    let response = state
        .db
        .notes
        .list(ListNotesRequest {
            patient_id,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            cursor: query.cursor,
        })
        .await?;

    Ok(Json(response))
}

pub async fn get_note_structured(
    State(state): State<AppState>,
    Path((patient_id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state
        .db
        .notes
        .fetch_structured(patient_id, note_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Note {} has no structured document", note_id))
        })?;
    Ok(Json(doc))
}

pub async fn download_note(
    State(state): State<AppState>,
    Path((patient_id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.db.notes.fetch(patient_id, note_id).await?;
    let mime_type = note.content.mime_type().to_string();

    let bytes = match note.content.file_key() {
        Some(key) => state.store.get(key).await?,
        // Inline notes download as their raw text.
        None => note
            .content
            .inline_text()
            .unwrap_or_default()
            .as_bytes()
            .to_vec(),
    };

    Ok(([(header::CONTENT_TYPE, mime_type)], bytes))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path((patient_id, note_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<DeleteNoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.purge.unwrap_or(false) {
        let blob_key = state.db.notes.hard_delete(patient_id, note_id).await?;
        if let Some(key) = blob_key {
            release_blob(&state, &key).await;
        }
    } else {
        state.db.notes.soft_delete(patient_id, note_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
