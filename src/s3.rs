use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;
use crate::storage::S3ArtifactStore;

/// Connects the S3 artifact store named by `S3_BUCKET`.
pub async fn connect_artifact_store(config: &AppConfig) -> Result<S3ArtifactStore> {
    let bucket = config.require_s3_bucket()?.to_string();
    let client = build_client(config).await;
    tracing::info!(
        bucket = %bucket,
        endpoint = config.aws_endpoint_url.as_deref().unwrap_or("aws"),
        region = %config.aws_region,
        "connected artifact store"
    );
    Ok(S3ArtifactStore::new(client, bucket))
}

/// Path-style addressing keeps MinIO and other compatible endpoints working.
pub async fn build_client(config: &AppConfig) -> S3Client {
    let base_config = load_sdk_config(config).await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();
    S3Client::from_conf(s3_config)
}

async fn load_sdk_config(config: &AppConfig) -> SdkConfig {
    let region_provider =
        RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
            .or_default_provider()
            .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = config.aws_endpoint_url.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }

    match (
        config.aws_access_key_id.as_deref(),
        config.aws_secret_access_key.as_deref(),
    ) {
        (Some(access_key), Some(secret_key)) => {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "contract-desk-env");
            loader.credentials_provider(credentials).load().await
        }
        _ => loader.load().await,
    }
}
