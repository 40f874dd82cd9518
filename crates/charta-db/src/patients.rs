//! Patient repository with keyset cursor pagination.
//!
//! Listing uses a composite `(sort value, id)` keyset rather than offsets,
//! so pages stay correct — no skips, no duplicates — while rows are
//! concurrently inserted or deleted, and no total count is ever needed.
//! The tie-break id makes the order strict even when the sort key has
//! duplicate values (identical names or dates of birth).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use charta_core::{
    decode_patient_cursor, encode_patient_cursor, generate_mrn, normalize_mrn,
    validate_date_of_birth, CreatePatientRequest, CursorError, Error, ListPatientsRequest,
    ListPatientsResponse, Patient, PatientCursor, PatientRepository, PatientSortKey, Result,
    SortOrder, UpdatePatientRequest, ValidationError, MAX_PAGE_LIMIT, MIN_NAME_FILTER_LEN,
};

use crate::escape_like;

const PATIENT_COLUMNS: &str = "id, name, date_of_birth, mrn, created_at, updated_at";

/// Attempts at generating a unique MRN before giving up. The DB unique
/// index is the source of truth; this only bounds the retry loop.
const MRN_GENERATION_ATTEMPTS: usize = 5;

/// PostgreSQL implementation of PatientRepository.
pub struct PgPatientRepository {
    pool: PgPool,
    mrn_prefix: String,
    mrn_auto_generate: bool,
}

/// Boundary sort value decoded from a cursor, typed per sort key so the
/// comparison happens on the column's native type.
#[derive(Debug, Clone, PartialEq)]
enum BoundaryValue {
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

/// Parse the string-encoded cursor boundary value for the given sort key.
fn parse_boundary_value(sort: PatientSortKey, raw: &str) -> std::result::Result<BoundaryValue, CursorError> {
    match sort {
        PatientSortKey::Name => Ok(BoundaryValue::Text(raw.to_string())),
        PatientSortKey::DateOfBirth => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(BoundaryValue::Date)
            .map_err(|_| CursorError::Malformed),
        PatientSortKey::CreatedAt => DateTime::parse_from_rfc3339(raw)
            .map(|dt| BoundaryValue::Timestamp(dt.with_timezone(&Utc)))
            .map_err(|_| CursorError::Malformed),
    }
}

/// Format a patient's sort value for embedding in an outbound cursor.
fn format_boundary_value(sort: PatientSortKey, patient: &Patient) -> String {
    match sort {
        PatientSortKey::Name => patient.name.clone(),
        PatientSortKey::DateOfBirth => patient.date_of_birth.format("%Y-%m-%d").to_string(),
        PatientSortKey::CreatedAt => patient.created_at.to_rfc3339(),
    }
}

/// Normalize the name filter: trimmed and lowercased. A supplied filter
/// shorter than [`MIN_NAME_FILTER_LEN`] characters after trimming is
/// rejected outright, never applied and never silently dropped.
fn normalize_name_filter(name: Option<&str>) -> Result<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let normalized = name.trim().to_lowercase();
    if normalized.chars().count() < MIN_NAME_FILTER_LEN {
        return Err(Error::InvalidInput(format!(
            "name filter must be at least {} characters",
            MIN_NAME_FILTER_LEN
        )));
    }
    Ok(Some(normalized))
}

/// Build the listing SQL. The filter is applied before ordering and
/// before the boundary comparison; the boundary selects rows strictly
/// beyond `(value, id)` under the composite order.
fn build_list_query(
    sort: PatientSortKey,
    order: SortOrder,
    has_filter: bool,
    has_cursor: bool,
) -> String {
    let mut sql = format!("SELECT {} FROM patients WHERE TRUE", PATIENT_COLUMNS);
    let mut param_idx = 1;

    if has_filter {
        sql.push_str(&format!(" AND lower(name) LIKE ${} ESCAPE '\\'", param_idx));
        param_idx += 1;
    }

    if has_cursor {
        let op = order.beyond_operator();
        let col = sort.as_str();
        sql.push_str(&format!(
            " AND ({col} {op} ${v} OR ({col} = ${v} AND id {op} ${id}))",
            v = param_idx,
            id = param_idx + 1,
        ));
        param_idx += 2;
    }

    sql.push_str(&format!(
        " ORDER BY {col} {dir}, id {dir} LIMIT ${limit}",
        col = sort.as_str(),
        dir = order.sql_keyword(),
        limit = param_idx,
    ));
    sql
}

fn row_to_patient(row: sqlx::postgres::PgRow) -> Patient {
    Patient {
        id: row.get("id"),
        name: row.get("name"),
        date_of_birth: row.get("date_of_birth"),
        mrn: row.get("mrn"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// True when a sqlx error is a PostgreSQL unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// True when a sqlx error is a PostgreSQL foreign-key violation.
pub(crate) fn is_fk_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

impl PgPatientRepository {
    /// Create a new PgPatientRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            mrn_prefix: "MRN-".to_string(),
            mrn_auto_generate: true,
        }
    }

    /// Override MRN generation settings.
    pub fn with_mrn_config(mut self, prefix: &str, auto_generate: bool) -> Self {
        self.mrn_prefix = prefix.to_string();
        self.mrn_auto_generate = auto_generate;
        self
    }

    async fn insert_row(&self, name: &str, date_of_birth: NaiveDate, mrn: &str) -> Result<Patient> {
        let row = sqlx::query(&format!(
            "INSERT INTO patients (id, name, date_of_birth, mrn)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            PATIENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(date_of_birth)
        .bind(mrn)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_patient(row))
    }
}

#[async_trait]
impl PatientRepository for PgPatientRepository {
    async fn create(&self, req: CreatePatientRequest) -> Result<Patient> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        validate_date_of_birth(req.date_of_birth, Utc::now().date_naive())?;

        if let Some(mrn) = req.mrn.as_deref() {
            let mrn = normalize_mrn(mrn)?;
            return match self.insert_row(name, req.date_of_birth, &mrn).await {
                Ok(patient) => {
                    info!(
                        subsystem = "db",
                        component = "patients",
                        op = "create",
                        patient_id = %patient.id,
                        "Patient created"
                    );
                    Ok(patient)
                }
                // Never echo the MRN back: it is PHI-adjacent.
                Err(Error::Database(e)) if is_unique_violation(&e) => {
                    Err(Error::Conflict("MRN is already in use".to_string()))
                }
                Err(e) => Err(e),
            };
        }

        if !self.mrn_auto_generate {
            return Err(Error::InvalidInput("MRN is required".to_string()));
        }

        // Generated MRNs can race with concurrent creates; regenerate on
        // unique violation instead of surfacing it.
        for _ in 0..MRN_GENERATION_ATTEMPTS {
            let candidate = generate_mrn(&self.mrn_prefix);
            match self.insert_row(name, req.date_of_birth, &candidate).await {
                Ok(patient) => {
                    info!(
                        subsystem = "db",
                        component = "patients",
                        op = "create",
                        patient_id = %patient.id,
                        "Patient created"
                    );
                    return Ok(patient);
                }
                Err(Error::Database(e)) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Internal(
            "unable to generate a unique MRN".to_string(),
        ))
    }

    async fn fetch(&self, id: Uuid) -> Result<Patient> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM patients WHERE id = $1",
            PATIENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_patient).ok_or(Error::PatientNotFound(id))
    }

    async fn update(&self, id: Uuid, req: UpdatePatientRequest) -> Result<Patient> {
        let current = self.fetch(id).await?;

        let name = match req.name {
            Some(name) => {
                let trimmed = name.trim().to_string();
                if trimmed.is_empty() {
                    return Err(ValidationError::EmptyName.into());
                }
                trimmed
            }
            None => current.name,
        };
        let date_of_birth = match req.date_of_birth {
            Some(dob) => {
                validate_date_of_birth(dob, Utc::now().date_naive())?;
                dob
            }
            None => current.date_of_birth,
        };

        let row = sqlx::query(&format!(
            "UPDATE patients SET name = $2, date_of_birth = $3, updated_at = now()
             WHERE id = $1
             RETURNING {}",
            PATIENT_COLUMNS
        ))
        .bind(id)
        .bind(&name)
        .bind(date_of_birth)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_patient(row))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(Error::PatientNotFound(id)),
            Ok(_) => Ok(()),
            Err(e) if is_fk_violation(&e) => Err(Error::Conflict(
                "patient still owns notes; delete the notes first".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, req: ListPatientsRequest) -> Result<ListPatientsResponse> {
        let limit = req.limit.clamp(1, MAX_PAGE_LIMIT);
        let filter = normalize_name_filter(req.name.as_deref())?;

        // An inbound cursor must match the active sort, order, and filter;
        // mismatches are a reported error, never a silent reset to page one.
        let boundary = match req.cursor.as_deref() {
            Some(token) => {
                let cursor =
                    decode_patient_cursor(token, req.sort, req.order, filter.as_deref())?;
                let value = parse_boundary_value(req.sort, &cursor.last_value)?;
                Some((value, cursor.last_id))
            }
            None => None,
        };

        let sql = build_list_query(req.sort, req.order, filter.is_some(), boundary.is_some());
        let mut query = sqlx::query(&sql);
        if let Some(filter) = &filter {
            query = query.bind(format!("%{}%", escape_like(filter)));
        }
        if let Some((value, last_id)) = &boundary {
            query = match value {
                BoundaryValue::Text(s) => query.bind(s.clone()),
                BoundaryValue::Date(d) => query.bind(*d),
                BoundaryValue::Timestamp(t) => query.bind(*t),
            };
            query = query.bind(*last_id);
        }
        query = query.bind(limit + 1);

        let rows = query.fetch_all(&self.pool).await?;
        let has_more = rows.len() as i64 > limit;
        let mut items: Vec<Patient> = rows.into_iter().map(row_to_patient).collect();
        items.truncate(limit as usize);

        let next_cursor = match (has_more, items.last()) {
            (true, Some(last)) => Some(encode_patient_cursor(&PatientCursor {
                sort: req.sort,
                order: req.order,
                name: filter,
                last_id: last.id,
                last_value: format_boundary_value(req.sort, last),
            })),
            _ => None,
        };

        Ok(ListPatientsResponse {
            items,
            limit,
            next_cursor,
        })
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_list_query_plain() {
        let sql = build_list_query(PatientSortKey::CreatedAt, SortOrder::Asc, false, false);
        assert!(sql.contains("ORDER BY created_at ASC, id ASC"));
        assert!(sql.ends_with("LIMIT $1"));
        assert!(!sql.contains("LIKE"));
    }

    #[test]
    fn test_list_query_with_filter_and_cursor() {
        let sql = build_list_query(PatientSortKey::Name, SortOrder::Desc, true, true);
        assert!(sql.contains("lower(name) LIKE $1"));
        assert!(sql.contains("(name < $2 OR (name = $2 AND id < $3))"));
        assert!(sql.contains("ORDER BY name DESC, id DESC"));
        assert!(sql.ends_with("LIMIT $4"));
    }

    #[test]
    fn test_list_query_cursor_ascending_uses_strictly_greater() {
        let sql = build_list_query(PatientSortKey::DateOfBirth, SortOrder::Asc, false, true);
        assert!(sql.contains("(date_of_birth > $1 OR (date_of_birth = $1 AND id > $2))"));
    }

    #[test]
    fn test_boundary_value_round_trip() {
        let patient = Patient {
            id: Uuid::new_v4(),
            name: "Smith, Jane".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1984, 2, 29).unwrap(),
            mrn: "MRN-AB12".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };

        let raw = format_boundary_value(PatientSortKey::Name, &patient);
        assert_eq!(
            parse_boundary_value(PatientSortKey::Name, &raw).unwrap(),
            BoundaryValue::Text("Smith, Jane".to_string())
        );

        let raw = format_boundary_value(PatientSortKey::DateOfBirth, &patient);
        assert_eq!(
            parse_boundary_value(PatientSortKey::DateOfBirth, &raw).unwrap(),
            BoundaryValue::Date(patient.date_of_birth)
        );

        let raw = format_boundary_value(PatientSortKey::CreatedAt, &patient);
        assert_eq!(
            parse_boundary_value(PatientSortKey::CreatedAt, &raw).unwrap(),
            BoundaryValue::Timestamp(patient.created_at)
        );
    }

    #[test]
    fn test_malformed_boundary_value_rejected() {
        assert_eq!(
            parse_boundary_value(PatientSortKey::DateOfBirth, "not a date").unwrap_err(),
            CursorError::Malformed
        );
        assert_eq!(
            parse_boundary_value(PatientSortKey::CreatedAt, "2026-99-99").unwrap_err(),
            CursorError::Malformed
        );
    }

    #[test]
    fn test_name_filter_normalization() {
        assert_eq!(
            normalize_name_filter(Some("  SMITH  ")).unwrap(),
            Some("smith".to_string())
        );
        assert_eq!(normalize_name_filter(None).unwrap(), None);
    }

    #[test]
    fn test_name_filter_below_minimum_length_rejected() {
        for raw in ["ab", " a ", "", "   "] {
            assert!(
                matches!(
                    normalize_name_filter(Some(raw)),
                    Err(Error::InvalidInput(_))
                ),
                "input {raw:?}"
            );
        }
    }
}
