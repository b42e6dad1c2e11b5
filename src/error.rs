use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use crate::pdf::ComposeError;
use crate::store::StoreError;

/// Failures of the contract core. Each variant is a stable kind the
/// transport layer can map without knowing how the core works.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("no active contract template")]
    NoActiveTemplate,
    #[error("corrupt document: {0}")]
    CorruptDocument(String),
    #[error("incompatible pages: {0}")]
    IncompatiblePages(String),
    #[error("invalid signature data: {0}")]
    InvalidSignatureData(String),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
    #[error("artifact store error: {0:#}")]
    Artifact(anyhow::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ContractResult<T> = Result<T, ContractError>;

impl From<ComposeError> for ContractError {
    fn from(value: ComposeError) -> Self {
        match value {
            ComposeError::CorruptDocument(message) => ContractError::CorruptDocument(message),
            ComposeError::IncompatiblePages(message) => ContractError::IncompatiblePages(message),
            ComposeError::Serialization(message) => ContractError::Internal(message),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<ContractError> for AppError {
    fn from(value: ContractError) -> Self {
        match value {
            ContractError::InvalidFormat(_) | ContractError::InvalidSignatureData(_) => {
                AppError::bad_request(value.to_string())
            }
            ContractError::NotFound(_) | ContractError::NoActiveTemplate => {
                AppError::not_found(value.to_string())
            }
            ContractError::CorruptDocument(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, value.to_string())
            }
            ContractError::IncompatiblePages(_)
            | ContractError::Store(_)
            | ContractError::Artifact(_)
            | ContractError::Internal(_) => AppError::internal(value),
        }
    }
}
