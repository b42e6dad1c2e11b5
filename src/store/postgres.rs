use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::{PersonalizedStore, StoreError, StoreResult, TemplateRecord, TemplateStore};
use crate::db::PgPool;
use crate::models::{
    ContractTemplate, NewContractTemplate, NewPersonalizedContract, PersonalizedContract,
};
use crate::schema::{active_template, contract_templates, personalized_contracts};

const ACTIVE_SLOT: i16 = 1;

/// PostgreSQL-backed record store. The active template is the single row of
/// `active_template`, so moving it is one upsert inside a transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn point_active_at(conn: &mut PgConnection, template_id: i64) -> QueryResult<usize> {
    let now = Utc::now();
    diesel::insert_into(active_template::table)
        .values((
            active_template::slot.eq(ACTIVE_SLOT),
            active_template::template_id.eq(template_id),
            active_template::activated_at.eq(now),
        ))
        .on_conflict(active_template::slot)
        .do_update()
        .set((
            active_template::template_id.eq(template_id),
            active_template::activated_at.eq(now),
        ))
        .execute(conn)
}

fn active_id(conn: &mut PgConnection) -> QueryResult<Option<i64>> {
    active_template::table
        .find(ACTIVE_SLOT)
        .select(active_template::template_id)
        .first(conn)
        .optional()
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn insert_active(&self, template: NewContractTemplate) -> StoreResult<TemplateRecord> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let row: ContractTemplate = diesel::insert_into(contract_templates::table)
                    .values(&template)
                    .get_result(conn)?;
                point_active_at(conn, row.id)?;
                Ok(TemplateRecord::from_row(row, true))
            })
        })
        .await
    }

    async fn activate(&self, id: i64) -> StoreResult<TemplateRecord> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let row: ContractTemplate = contract_templates::table
                    .find(id)
                    .first(conn)
                    .optional()?
                    .ok_or(StoreError::NotFound)?;
                point_active_at(conn, row.id)?;
                Ok(TemplateRecord::from_row(row, true))
            })
        })
        .await
    }

    async fn active(&self) -> StoreResult<Option<TemplateRecord>> {
        self.run(|conn| {
            let row: Option<ContractTemplate> = active_template::table
                .inner_join(contract_templates::table)
                .select(contract_templates::all_columns)
                .first(conn)
                .optional()?;
            Ok(row.map(|row| TemplateRecord::from_row(row, true)))
        })
        .await
    }

    async fn find_template(&self, id: i64) -> StoreResult<Option<TemplateRecord>> {
        self.run(move |conn| {
            let row: Option<ContractTemplate> = contract_templates::table
                .find(id)
                .first(conn)
                .optional()?;
            let active = active_id(conn)?;
            Ok(row.map(|row| {
                let is_active = active == Some(row.id);
                TemplateRecord::from_row(row, is_active)
            }))
        })
        .await
    }

    async fn list_templates(&self) -> StoreResult<Vec<TemplateRecord>> {
        self.run(|conn| {
            let rows: Vec<(ContractTemplate, Option<i16>)> = contract_templates::table
                .left_join(
                    active_template::table
                        .on(active_template::template_id.eq(contract_templates::id)),
                )
                .select((
                    contract_templates::all_columns,
                    active_template::slot.nullable(),
                ))
                .order((
                    contract_templates::created_at.desc(),
                    contract_templates::id.desc(),
                ))
                .load(conn)?;
            Ok(rows
                .into_iter()
                .map(|(row, slot)| TemplateRecord::from_row(row, slot.is_some()))
                .collect())
        })
        .await
    }
}

#[async_trait]
impl PersonalizedStore for PgStore {
    async fn insert_contract(
        &self,
        contract: NewPersonalizedContract,
    ) -> StoreResult<PersonalizedContract> {
        self.run(move |conn| {
            let row = diesel::insert_into(personalized_contracts::table)
                .values(&contract)
                .get_result(conn)?;
            Ok(row)
        })
        .await
    }

    async fn find_contract(&self, id: i64) -> StoreResult<Option<PersonalizedContract>> {
        self.run(move |conn| {
            let row = personalized_contracts::table
                .find(id)
                .first(conn)
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn record_signature(
        &self,
        id: i64,
        signed_artifact_id: Uuid,
        signed_at: DateTime<Utc>,
    ) -> StoreResult<PersonalizedContract> {
        self.run(move |conn| {
            diesel::update(personalized_contracts::table.find(id))
                .set((
                    personalized_contracts::signed_artifact_id.eq(Some(signed_artifact_id)),
                    personalized_contracts::signature_timestamp.eq(Some(signed_at)),
                ))
                .get_result(conn)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn list_contracts(&self) -> StoreResult<Vec<PersonalizedContract>> {
        self.run(|conn| {
            let rows = personalized_contracts::table
                .order((
                    personalized_contracts::created_at.desc(),
                    personalized_contracts::id.desc(),
                ))
                .load(conn)?;
            Ok(rows)
        })
        .await
    }
}
