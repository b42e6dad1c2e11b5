use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tokio::sync::Mutex;
use uuid::Uuid;

const ARTIFACT_PREFIX: &str = "artifacts";
const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Immutable blob storage for template, generated and signed documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Stores `bytes` under a fresh identifier.
    async fn put(&self, bytes: Vec<u8>) -> Result<Uuid>;

    /// Returns `None` when nothing is stored under `id`.
    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>>;
}

pub fn artifact_key(id: Uuid) -> String {
    format!("{ARTIFACT_PREFIX}/{id}")
}

pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(artifact_key(id))
            .content_type(PDF_CONTENT_TYPE)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .context("failed to upload artifact to S3")?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(artifact_key(id))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(err).context("failed to download artifact from S3");
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .context("failed to read artifact stream")?
            .into_bytes()
            .to_vec();

        Ok(Some(bytes))
    }
}

/// Artifact store held in process memory.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.objects.lock().await.insert(id, bytes);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().await.get(&id).cloned())
    }
}
