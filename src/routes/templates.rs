use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use super::{pdf_response, Disposition};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::TemplateRecord;

const UPLOAD_FIELD: &str = "contract_pdf";

#[derive(Serialize)]
pub struct TemplateResponse {
    pub id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<TemplateRecord> for TemplateResponse {
    fn from(record: TemplateRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            size_bytes: record.size_bytes,
            checksum: record.checksum,
            note: record.note,
            created_at: record.created_at,
            is_active: record.is_active,
        }
    }
}

#[derive(Serialize)]
pub struct ActiveTemplateResponse {
    pub id: i64,
    pub filename: String,
    pub pdf_url: String,
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TemplateResponse>>> {
    let templates = state.contracts.list_templates().await?;
    Ok(Json(templates.into_iter().map(Into::into).collect()))
}

pub async fn upload_template(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<TemplateResponse>)> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read uploaded template");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        upload = Some((filename, data.to_vec()));
    }

    let (filename, bytes) = upload.ok_or_else(|| {
        error!("upload rejected: missing contract_pdf field");
        AppError::bad_request("missing 'contract_pdf' file")
    })?;

    let template = state.contracts.upload_template(bytes, &filename).await?;
    Ok((StatusCode::CREATED, Json(template.into())))
}

pub async fn active_template(
    State(state): State<AppState>,
) -> AppResult<Json<ActiveTemplateResponse>> {
    let template = state.contracts.active_template().await?;
    Ok(Json(ActiveTemplateResponse {
        id: template.id,
        pdf_url: format!("/api/templates/{}/download", template.id),
        filename: template.filename,
    }))
}

pub async fn activate_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TemplateResponse>> {
    let template = state.contracts.activate_template(id).await?;
    Ok(Json(template.into()))
}

pub async fn download_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let file = state.contracts.template_bytes(id).await?;
    Ok(pdf_response(file, Disposition::Inline))
}
