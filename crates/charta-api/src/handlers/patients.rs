//! Patient CRUD and listing handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use charta_core::{
    CreatePatientRequest, ListPatientsRequest, PatientRepository, PatientSortKey, SortOrder,
    UpdatePatientRequest, DEFAULT_PAGE_LIMIT,
};

use crate::{ApiError, AppState};

/// Query parameters for patient listing. Sort and order arrive as strings
/// so an unknown value is a 400, not a silent default.
#[derive(Debug, Deserialize)]
pub struct ListPatientsQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub name: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patient = state.db.patients.create(req).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let patient = state.db.patients.fetch(id).await?;
    Ok(Json(patient))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patient = state.db.patients.update(id, req).await?;
    Ok(Json(patient))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.patients.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_patients(
    State(state): State<AppState>,
    Query(query): Query<ListPatientsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sort = match query.sort.as_deref() {
        Some(raw) => raw
            .parse::<PatientSortKey>()
            .map_err(ApiError::BadRequest)?,
        None => PatientSortKey::CreatedAt,
    };
    let order = match query.order.as_deref() {
        Some(raw) => raw.parse::<SortOrder>().map_err(ApiError::BadRequest)?,
        None => SortOrder::Asc,
    };

    let response = state
        .db
        .patients
        .list(ListPatientsRequest {
            limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            cursor: query.cursor,
            name: query.name,
            sort,
            order,
        })
        .await?;

    Ok(Json(response))
}
