use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{pdf_response, Disposition};
use crate::error::AppResult;
use crate::models::PersonalizedContract;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateContractRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Deserialize)]
pub struct SignContractRequest {
    /// `data:image/<type>;base64,<payload>`
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
pub struct ContractResponse {
    pub id: i64,
    pub template_id: i64,
    pub employee_name: String,
    pub employee_address: String,
    pub created_at: DateTime<Utc>,
    pub is_signed: bool,
    pub signature_timestamp: Option<DateTime<Utc>>,
    pub pdf_url: String,
    pub signed_pdf_url: Option<String>,
}

impl From<PersonalizedContract> for ContractResponse {
    fn from(contract: PersonalizedContract) -> Self {
        let signed_pdf_url = contract
            .is_signed()
            .then(|| format!("/api/contracts/{}/signed", contract.id));
        Self {
            id: contract.id,
            template_id: contract.template_id,
            pdf_url: format!("/api/contracts/{}/download", contract.id),
            is_signed: contract.is_signed(),
            employee_name: contract.employee_name,
            employee_address: contract.employee_address,
            created_at: contract.created_at,
            signature_timestamp: contract.signature_timestamp,
            signed_pdf_url,
        }
    }
}

pub async fn list_contracts(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ContractResponse>>> {
    let contracts = state.contracts.list_personalized().await?;
    Ok(Json(contracts.into_iter().map(Into::into).collect()))
}

pub async fn create_contract(
    State(state): State<AppState>,
    Json(payload): Json<CreateContractRequest>,
) -> AppResult<(StatusCode, Json<ContractResponse>)> {
    let contract = state
        .contracts
        .personalize(&payload.name, &payload.address)
        .await?;
    Ok((StatusCode::CREATED, Json(contract.into())))
}

pub async fn download_generated(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let file = state.contracts.generated_bytes(id).await?;
    Ok(pdf_response(file, Disposition::Inline))
}

pub async fn sign_contract(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<SignContractRequest>,
) -> AppResult<Json<ContractResponse>> {
    let contract = state.contracts.sign(id, &payload.signature).await?;
    Ok(Json(contract.into()))
}

pub async fn download_signed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let file = state.contracts.signed_bytes(id).await?;
    Ok(pdf_response(file, Disposition::Attachment))
}
