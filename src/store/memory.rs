use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PersonalizedStore, StoreError, StoreResult, TemplateRecord, TemplateStore};
use crate::models::{
    ContractTemplate, NewContractTemplate, NewPersonalizedContract, PersonalizedContract,
};

/// In-process record store. One lock guards templates, the active pointer
/// and contracts, so every operation is applied as a single unit.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    templates: BTreeMap<i64, ContractTemplate>,
    active: Option<i64>,
    contracts: BTreeMap<i64, PersonalizedContract>,
    last_template_id: i64,
    last_contract_id: i64,
}

impl MemoryState {
    fn record(&self, template: &ContractTemplate) -> TemplateRecord {
        TemplateRecord::from_row(template.clone(), self.active == Some(template.id))
    }
}

/// Newest first; ids break ties between rows created within the same instant.
fn newest_first<T>(
    rows: impl Iterator<Item = T>,
    key: impl Fn(&T) -> (DateTime<Utc>, i64),
) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn insert_active(&self, template: NewContractTemplate) -> StoreResult<TemplateRecord> {
        let mut state = self.state.lock().await;
        state.last_template_id += 1;
        let row = ContractTemplate {
            id: state.last_template_id,
            artifact_id: template.artifact_id,
            filename: template.filename,
            size_bytes: template.size_bytes,
            checksum: template.checksum,
            note: template.note,
            created_at: Utc::now(),
        };
        state.active = Some(row.id);
        state.templates.insert(row.id, row.clone());
        Ok(TemplateRecord::from_row(row, true))
    }

    async fn activate(&self, id: i64) -> StoreResult<TemplateRecord> {
        let mut state = self.state.lock().await;
        let row = state.templates.get(&id).cloned().ok_or(StoreError::NotFound)?;
        state.active = Some(id);
        Ok(TemplateRecord::from_row(row, true))
    }

    async fn active(&self) -> StoreResult<Option<TemplateRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .active
            .and_then(|id| state.templates.get(&id))
            .map(|row| state.record(row)))
    }

    async fn find_template(&self, id: i64) -> StoreResult<Option<TemplateRecord>> {
        let state = self.state.lock().await;
        Ok(state.templates.get(&id).map(|row| state.record(row)))
    }

    async fn list_templates(&self) -> StoreResult<Vec<TemplateRecord>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state.templates.values().map(|row| state.record(row)),
            |record| (record.created_at, record.id),
        ))
    }
}

#[async_trait]
impl PersonalizedStore for MemoryStore {
    async fn insert_contract(
        &self,
        contract: NewPersonalizedContract,
    ) -> StoreResult<PersonalizedContract> {
        let mut state = self.state.lock().await;
        state.last_contract_id += 1;
        let row = PersonalizedContract {
            id: state.last_contract_id,
            template_id: contract.template_id,
            employee_name: contract.employee_name,
            employee_address: contract.employee_address,
            generated_artifact_id: contract.generated_artifact_id,
            created_at: Utc::now(),
            signed_artifact_id: None,
            signature_timestamp: None,
        };
        state.contracts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_contract(&self, id: i64) -> StoreResult<Option<PersonalizedContract>> {
        let state = self.state.lock().await;
        Ok(state.contracts.get(&id).cloned())
    }

    async fn record_signature(
        &self,
        id: i64,
        signed_artifact_id: Uuid,
        signed_at: DateTime<Utc>,
    ) -> StoreResult<PersonalizedContract> {
        let mut state = self.state.lock().await;
        let row = state.contracts.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.signed_artifact_id = Some(signed_artifact_id);
        row.signature_timestamp = Some(signed_at);
        Ok(row.clone())
    }

    async fn list_contracts(&self) -> StoreResult<Vec<PersonalizedContract>> {
        let state = self.state.lock().await;
        Ok(newest_first(state.contracts.values().cloned(), |row| {
            (row.created_at, row.id)
        }))
    }
}
