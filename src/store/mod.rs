//! Record persistence for templates and personalized contracts.
//!
//! Byte payloads never live here; records only point at artifacts held by
//! [`crate::storage::ArtifactStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ContractTemplate, NewContractTemplate, NewPersonalizedContract, PersonalizedContract,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A template row together with whether it is the active one.
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub id: i64,
    pub artifact_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl TemplateRecord {
    pub fn from_row(row: ContractTemplate, is_active: bool) -> Self {
        Self {
            id: row.id,
            artifact_id: row.artifact_id,
            filename: row.filename,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            note: row.note,
            created_at: row.created_at,
            is_active,
        }
    }
}

/// The Template Activation Store. It is the only writer of the active
/// template, and every mutation leaves exactly one template active (or none
/// before the first upload).
#[async_trait]
pub trait TemplateStore: Send + Sync + 'static {
    /// Inserts a template and makes it the active one in a single atomic step.
    async fn insert_active(&self, template: NewContractTemplate) -> StoreResult<TemplateRecord>;

    /// Makes `id` the active template. Fails with [`StoreError::NotFound`]
    /// without changing anything when no such template exists.
    async fn activate(&self, id: i64) -> StoreResult<TemplateRecord>;

    async fn active(&self) -> StoreResult<Option<TemplateRecord>>;

    async fn find_template(&self, id: i64) -> StoreResult<Option<TemplateRecord>>;

    /// All templates, most recently created first.
    async fn list_templates(&self) -> StoreResult<Vec<TemplateRecord>>;
}

#[async_trait]
pub trait PersonalizedStore: Send + Sync + 'static {
    async fn insert_contract(
        &self,
        contract: NewPersonalizedContract,
    ) -> StoreResult<PersonalizedContract>;

    async fn find_contract(&self, id: i64) -> StoreResult<Option<PersonalizedContract>>;

    /// Points the record at a new signed artifact, replacing any earlier one.
    async fn record_signature(
        &self,
        id: i64,
        signed_artifact_id: Uuid,
        signed_at: DateTime<Utc>,
    ) -> StoreResult<PersonalizedContract>;

    /// All personalized contracts, most recently created first.
    async fn list_contracts(&self) -> StoreResult<Vec<PersonalizedContract>>;
}
