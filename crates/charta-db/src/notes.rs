//! Note repository: ingestion pipeline and reads.
//!
//! The defining guarantee of ingestion is that persisting the raw note is
//! never gated on SOAP derivation. The note row (plus the optional
//! extracted-text shadow copy) commits first; derivation then runs as a
//! best-effort follow-up whose failures are logged and swallowed. A parse
//! that finds nothing is not a failure at all — just a normal branch with
//! no derived row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use charta_core::{
    decode_note_cursor, encode_note_cursor, parse_soap, Error, IngestNoteRequest,
    ListNotesRequest, ListNotesResponse, Note, NoteContent, NoteCursor, NoteLifecycle,
    NoteRepository, Result, SoapDocument, SoapSections, MAX_PAGE_LIMIT, SOAP_PARSER_VERSION,
    SOAP_SCHEMA,
};

const NOTE_COLUMNS: &str = "n.id, n.patient_id, n.taken_at, n.note_type, n.content_text, \
     n.content_mime_type, n.file_path, n.file_size_bytes, n.checksum_sha256, n.deleted_at, \
     n.created_at, n.updated_at, t.text AS extracted_text";

const NOTE_FROM: &str = "FROM patient_notes n LEFT JOIN patient_note_text t ON t.note_id = n.id";

/// PostgreSQL implementation of NoteRepository.
pub struct PgNoteRepository {
    pool: PgPool,
}

/// Map a joined note row back to the domain model. Rows violating the
/// content XOR cannot exist under the schema check constraints; hitting
/// one anyway is an internal error, not caller input.
fn row_to_note(row: sqlx::postgres::PgRow) -> Result<Note> {
    let content_text: Option<String> = row.get("content_text");
    let file_path: Option<String> = row.get("file_path");
    let content_mime_type: Option<String> = row.get("content_mime_type");

    let content = match (content_text, file_path) {
        (Some(text), None) => NoteContent::Inline {
            text,
            mime_type: content_mime_type.unwrap_or_else(|| "text/plain".to_string()),
        },
        (None, Some(key)) => NoteContent::File {
            key,
            size_bytes: row.get::<Option<i64>, _>("file_size_bytes").unwrap_or(0),
            checksum_sha256: row.get("checksum_sha256"),
            mime_type: content_mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        },
        _ => {
            return Err(Error::Internal(
                "note row violates the content xor invariant".to_string(),
            ))
        }
    };

    let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");

    Ok(Note {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        taken_at: row.get("taken_at"),
        note_type: row.get("note_type"),
        content,
        extracted_text: row.get("extracted_text"),
        lifecycle: NoteLifecycle::from_deleted_at(deleted_at),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl PgNoteRepository {
    /// Create a new PgNoteRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Best-effort SOAP derivation for a freshly ingested note.
    ///
    /// Runs only for notes whose type label selected the parsing path.
    /// Persists a derived row iff the parser matched and extracted at
    /// least one non-empty section. Never propagates an error: the raw
    /// note is already committed and stays authoritative either way.
    /// Logs carry ids only, never note content.
    async fn derive_soap(&self, note_id: Uuid, raw_text: Option<&str>) {
        let Some(raw_text) = raw_text else {
            debug!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                "SOAP derivation skipped: no text available for parsing"
            );
            return;
        };

        let parsed = parse_soap(raw_text);
        if !parsed.matched {
            debug!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                "SOAP derivation skipped: no markers found"
            );
            return;
        }
        if !parsed.sections.has_content() {
            debug!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                "SOAP derivation skipped: all sections empty"
            );
            return;
        }
        if parsed.sections.present_count() < 4 {
            warn!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                sections_present = parsed.sections.present_count(),
                "SOAP parse incomplete"
            );
        }

        let sections = match serde_json::to_value(&parsed.sections) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "soap",
                    op = "derive",
                    note_id = %note_id,
                    error = %e,
                    "SOAP sections failed to serialize"
                );
                return;
            }
        };

        // Idempotent: if a derived row already exists for this note, keep
        // it (derived records are never mutated after creation).
        let result = sqlx::query(
            "INSERT INTO patient_note_structured (note_id, schema, parser_version, sections)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (note_id) DO NOTHING",
        )
        .bind(note_id)
        .bind(SOAP_SCHEMA)
        .bind(SOAP_PARSER_VERSION)
        .bind(&sections)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => info!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                sections_present = parsed.sections.present_count(),
                "Derived SOAP record persisted"
            ),
            Err(e) => warn!(
                subsystem = "db",
                component = "soap",
                op = "derive",
                note_id = %note_id,
                error = %e,
                "SOAP derivation persistence failed; raw note unaffected"
            ),
        }
    }
}

#[async_trait]
impl NoteRepository for PgNoteRepository {
    async fn ingest(&self, req: IngestNoteRequest) -> Result<Note> {
        let exists = sqlx::query("SELECT 1 FROM patients WHERE id = $1")
            .bind(req.patient_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::PatientNotFound(req.patient_id));
        }

        let (content_text, file_path, file_size_bytes, checksum_sha256, mime_type) =
            match &req.note.content {
                NoteContent::Inline { text, mime_type } => {
                    (Some(text.as_str()), None, None, None, mime_type.as_str())
                }
                NoteContent::File {
                    key,
                    size_bytes,
                    checksum_sha256,
                    mime_type,
                } => (
                    None,
                    Some(key.as_str()),
                    Some(*size_bytes),
                    checksum_sha256.as_deref(),
                    mime_type.as_str(),
                ),
            };

        // Shadow text only makes sense for file-backed content; for
        // inline notes the text is already authoritative.
        let extracted_text = match &req.note.content {
            NoteContent::File { .. } => req.extracted_text.as_deref(),
            NoteContent::Inline { .. } => None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO patient_notes
                 (id, patient_id, taken_at, note_type, content_text, content_mime_type,
                  file_path, file_size_bytes, checksum_sha256)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(req.note_id)
        .bind(req.patient_id)
        .bind(req.note.taken_at)
        .bind(req.note.note_type.as_deref())
        .bind(content_text)
        .bind(mime_type)
        .bind(file_path)
        .bind(file_size_bytes)
        .bind(checksum_sha256)
        .execute(&mut *tx)
        .await?;

        if let Some(text) = extracted_text {
            sqlx::query("INSERT INTO patient_note_text (note_id, text) VALUES ($1, $2)")
                .bind(req.note_id)
                .bind(text)
                .execute(&mut *tx)
                .await?;
        }

        // The raw note is committed here; nothing after this point may
        // undo it.
        tx.commit().await?;

        info!(
            subsystem = "db",
            component = "notes",
            op = "ingest",
            patient_id = %req.patient_id,
            note_id = %req.note_id,
            "Note ingested"
        );

        if req.note.is_soap() {
            let raw_text = match &req.note.content {
                NoteContent::Inline { text, .. } => Some(text.as_str()),
                NoteContent::File { .. } => req.extracted_text.as_deref(),
            };
            self.derive_soap(req.note_id, raw_text).await;
        }

        self.fetch(req.patient_id, req.note_id).await
    }

    async fn fetch(&self, patient_id: Uuid, note_id: Uuid) -> Result<Note> {
        let row = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} {NOTE_FROM}
             WHERE n.id = $1 AND n.patient_id = $2 AND n.deleted_at IS NULL"
        ))
        .bind(note_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_note(row),
            None => Err(Error::NoteNotFound(note_id)),
        }
    }

    async fn list(&self, req: ListNotesRequest) -> Result<ListNotesResponse> {
        let limit = req.limit.clamp(1, MAX_PAGE_LIMIT);

        // Fixed order: taken_at DESC, tie-break id DESC.
        let boundary = match req.cursor.as_deref() {
            Some(token) => Some(decode_note_cursor(token, req.patient_id)?),
            None => None,
        };

        let mut sql = format!(
            "SELECT {NOTE_COLUMNS} {NOTE_FROM}
             WHERE n.patient_id = $1 AND n.deleted_at IS NULL"
        );
        if boundary.is_some() {
            sql.push_str(
                " AND (n.taken_at < $2 OR (n.taken_at = $2 AND n.id < $3))",
            );
            sql.push_str(" ORDER BY n.taken_at DESC, n.id DESC LIMIT $4");
        } else {
            sql.push_str(" ORDER BY n.taken_at DESC, n.id DESC LIMIT $2");
        }

        let mut query = sqlx::query(&sql).bind(req.patient_id);
        if let Some(boundary) = &boundary {
            query = query.bind(boundary.last_taken_at).bind(boundary.last_id);
        }
        query = query.bind(limit + 1);

        let rows = query.fetch_all(&self.pool).await?;
        let has_more = rows.len() as i64 > limit;
        let mut items = rows
            .into_iter()
            .map(row_to_note)
            .collect::<Result<Vec<_>>>()?;
        items.truncate(limit as usize);

        let next_cursor = match (has_more, items.last()) {
            (true, Some(last)) => Some(encode_note_cursor(&NoteCursor {
                patient_id: req.patient_id,
                last_taken_at: last.taken_at,
                last_id: last.id,
            })),
            _ => None,
        };

        Ok(ListNotesResponse {
            items,
            limit,
            next_cursor,
        })
    }

    async fn fetch_structured(
        &self,
        patient_id: Uuid,
        note_id: Uuid,
    ) -> Result<Option<SoapDocument>> {
        // Resolve the note first so "note missing" and "no derived data"
        // stay distinguishable to callers.
        self.fetch(patient_id, note_id).await?;

        let row = sqlx::query(
            "SELECT schema, parser_version, sections
             FROM patient_note_structured WHERE note_id = $1",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let sections: SoapSections = serde_json::from_value(row.get("sections"))?;
                Ok(Some(SoapDocument {
                    schema: row.get("schema"),
                    parser_version: row.get("parser_version"),
                    sections,
                }))
            }
            None => Ok(None),
        }
    }

    async fn soft_delete(&self, patient_id: Uuid, note_id: Uuid) -> Result<()> {
        let done = sqlx::query(
            "UPDATE patient_notes SET deleted_at = now(), updated_at = now()
             WHERE id = $1 AND patient_id = $2 AND deleted_at IS NULL",
        )
        .bind(note_id)
        .bind(patient_id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NoteNotFound(note_id));
        }
        info!(
            subsystem = "db",
            component = "notes",
            op = "soft_delete",
            patient_id = %patient_id,
            note_id = %note_id,
            "Note soft-deleted"
        );
        Ok(())
    }

    async fn hard_delete(&self, patient_id: Uuid, note_id: Uuid) -> Result<Option<String>> {
        // Hard delete also reaches soft-deleted notes; the derived and
        // extracted-text rows go with the note via ON DELETE CASCADE.
        let row = sqlx::query(
            "DELETE FROM patient_notes WHERE id = $1 AND patient_id = $2
             RETURNING file_path",
        )
        .bind(note_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(
                    subsystem = "db",
                    component = "notes",
                    op = "hard_delete",
                    patient_id = %patient_id,
                    note_id = %note_id,
                    "Note hard-deleted"
                );
                Ok(row.get("file_path"))
            }
            None => Err(Error::NoteNotFound(note_id)),
        }
    }
}
