pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pdf;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod service;
pub mod signature;
pub mod state;
pub mod storage;
pub mod store;

pub use service::{ContractService, DocumentFile};

use tracing_subscriber::EnvFilter;

/// Installs the compact `RUST_LOG`-driven subscriber shared by the binaries.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
