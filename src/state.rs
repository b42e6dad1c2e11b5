use std::sync::Arc;

use anyhow::Result;

use crate::{
    config::{AppConfig, StorageBackend},
    db,
    s3,
    service::ContractService,
    storage::MemoryArtifactStore,
    store::{MemoryStore, PgStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub contracts: ContractService,
}

impl AppState {
    pub fn new(config: AppConfig, contracts: ContractService) -> Self {
        Self {
            config: Arc::new(config),
            contracts,
        }
    }

    /// Wires the stores selected by `STORAGE_BACKEND`. For PostgreSQL this
    /// also applies pending migrations.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let contracts = match config.storage_backend {
            StorageBackend::Postgres => {
                let pool = db::init_pool_with_size(
                    config.require_database_url()?,
                    config.database_max_pool_size,
                )?;
                let applied = {
                    let pool = pool.clone();
                    tokio::task::spawn_blocking(move || db::run_migrations(&pool)).await??
                };
                tracing::info!(applied, "database migrations up to date");

                let store = Arc::new(PgStore::new(pool));
                let artifacts = Arc::new(s3::connect_artifact_store(&config).await?);
                ContractService::new(store.clone(), store, artifacts)
            }
            StorageBackend::Memory => in_memory_service(),
        };
        Ok(Self::new(config, contracts))
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, in_memory_service())
    }
}

fn in_memory_service() -> ContractService {
    let store = Arc::new(MemoryStore::default());
    ContractService::new(store.clone(), store, Arc::new(MemoryArtifactStore::default()))
}
