use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = contract_templates)]
pub struct ContractTemplate {
    pub id: i64,
    pub artifact_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contract_templates)]
pub struct NewContractTemplate {
    pub artifact_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = personalized_contracts)]
#[diesel(belongs_to(ContractTemplate, foreign_key = template_id))]
pub struct PersonalizedContract {
    pub id: i64,
    pub template_id: i64,
    pub employee_name: String,
    pub employee_address: String,
    pub generated_artifact_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub signed_artifact_id: Option<Uuid>,
    pub signature_timestamp: Option<DateTime<Utc>>,
}

impl PersonalizedContract {
    pub fn is_signed(&self) -> bool {
        self.signed_artifact_id.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = personalized_contracts)]
pub struct NewPersonalizedContract {
    pub template_id: i64,
    pub employee_name: String,
    pub employee_address: String,
    pub generated_artifact_id: Uuid,
}
