//! The contract core: template activation, personalization and signing over
//! pluggable record and artifact stores.
//!
//! Composition always finishes before anything is written, so a failed
//! personalization or signature leaves both stores untouched.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ContractError, ContractResult};
use crate::models::{NewContractTemplate, NewPersonalizedContract, PersonalizedContract};
use crate::pdf::{self, SignedDocument};
use crate::signature;
use crate::storage::ArtifactStore;
use crate::store::{PersonalizedStore, StoreError, TemplateRecord, TemplateStore};

const PDF_EXTENSION: &str = ".pdf";
const PDF_MAGIC: &[u8] = b"%PDF-";

/// A stored document together with the name it is served under.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ContractService {
    templates: Arc<dyn TemplateStore>,
    contracts: Arc<dyn PersonalizedStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ContractService {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        contracts: Arc<dyn PersonalizedStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            templates,
            contracts,
            artifacts,
        }
    }

    /// Stores a new template and makes it the active one.
    pub async fn upload_template(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> ContractResult<TemplateRecord> {
        validate_template(&bytes, filename)?;

        let size_bytes = i64::try_from(bytes.len())
            .map_err(|_| ContractError::InvalidFormat("document is too large".into()))?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        let artifact_id = self.put_artifact(bytes).await?;

        let template = self
            .templates
            .insert_active(NewContractTemplate {
                artifact_id,
                filename: filename.to_string(),
                size_bytes,
                checksum,
                note: Some(format!(
                    "Uploaded at {}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
                )),
            })
            .await?;

        info!(
            template_id = template.id,
            artifact_id = %template.artifact_id,
            filename = %template.filename,
            size_bytes = template.size_bytes,
            "template uploaded and activated"
        );
        Ok(template)
    }

    pub async fn list_templates(&self) -> ContractResult<Vec<TemplateRecord>> {
        Ok(self.templates.list_templates().await?)
    }

    pub async fn activate_template(&self, id: i64) -> ContractResult<TemplateRecord> {
        let template = self.templates.activate(id).await.map_err(|err| match err {
            StoreError::NotFound => ContractError::NotFound("template"),
            other => other.into(),
        })?;
        info!(template_id = template.id, "template activated");
        Ok(template)
    }

    pub async fn active_template(&self) -> ContractResult<TemplateRecord> {
        self.templates
            .active()
            .await?
            .ok_or(ContractError::NoActiveTemplate)
    }

    pub async fn template_bytes(&self, id: i64) -> ContractResult<DocumentFile> {
        let template = self
            .templates
            .find_template(id)
            .await?
            .ok_or(ContractError::NotFound("template"))?;
        let bytes = self
            .fetch_artifact(template.artifact_id, "template document")
            .await?;
        Ok(DocumentFile {
            filename: template.filename,
            bytes,
        })
    }

    /// Fills the active template with the recipient's name and address.
    ///
    /// Whichever template is active when it is read is used; a concurrent
    /// activation may land before the record is written.
    pub async fn personalize(
        &self,
        name: &str,
        address: &str,
    ) -> ContractResult<PersonalizedContract> {
        let template = self.active_template().await?;
        let template_bytes = self
            .fetch_artifact(template.artifact_id, "template document")
            .await?;

        let (name_owned, address_owned) = (name.to_string(), address.to_string());
        let generated = run_blocking(move || {
            pdf::personalize(&template_bytes, &name_owned, &address_owned)
        })
        .await?;

        let generated_artifact_id = self.put_artifact(generated).await?;
        let contract = self
            .contracts
            .insert_contract(NewPersonalizedContract {
                template_id: template.id,
                employee_name: name.to_string(),
                employee_address: address.to_string(),
                generated_artifact_id,
            })
            .await?;

        info!(
            contract_id = contract.id,
            template_id = template.id,
            artifact_id = %generated_artifact_id,
            "personalized contract generated"
        );
        Ok(contract)
    }

    pub async fn generated_bytes(&self, id: i64) -> ContractResult<DocumentFile> {
        let contract = self.find_contract(id).await?;
        let bytes = self
            .fetch_artifact(contract.generated_artifact_id, "generated document")
            .await?;
        Ok(DocumentFile {
            filename: format!("contract_{id}.pdf"),
            bytes,
        })
    }

    /// Stamps a signature image and timestamp onto the last page of the
    /// generated document.
    ///
    /// Signing again replaces the earlier signed document. The overlay is
    /// always applied to the generated bytes, so a signed document carries
    /// exactly one signature.
    pub async fn sign(&self, id: i64, data_uri: &str) -> ContractResult<PersonalizedContract> {
        let data_uri = data_uri.to_owned();
        let signature = tokio::task::spawn_blocking(move || signature::decode_data_uri(&data_uri))
            .await
            .map_err(|err| ContractError::Internal(format!("signature decode task failed: {err}")))?
            .map_err(|err| {
                warn!(contract_id = id, error = %err, "rejected signature payload");
                err
            })?;

        let contract = self.find_contract(id).await?;
        let generated = self
            .fetch_artifact(contract.generated_artifact_id, "generated document")
            .await?;

        let SignedDocument { bytes, signed_at } =
            run_blocking(move || pdf::sign(&generated, signature)).await?;

        let signed_artifact_id = self.put_artifact(bytes).await?;
        if let Some(previous) = contract.signed_artifact_id {
            info!(
                contract_id = id,
                previous_artifact_id = %previous,
                "replacing earlier signature"
            );
        }
        let contract = self
            .contracts
            .record_signature(id, signed_artifact_id, signed_at)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => ContractError::NotFound("personalized contract"),
                other => other.into(),
            })?;

        info!(
            contract_id = id,
            artifact_id = %signed_artifact_id,
            signed_at = %signed_at,
            "contract signed"
        );
        Ok(contract)
    }

    pub async fn signed_bytes(&self, id: i64) -> ContractResult<DocumentFile> {
        let contract = self.find_contract(id).await?;
        let signed_artifact_id = contract
            .signed_artifact_id
            .ok_or(ContractError::NotFound("signed document"))?;
        let bytes = self
            .fetch_artifact(signed_artifact_id, "signed document")
            .await?;
        Ok(DocumentFile {
            filename: format!("signed_contract_{id}.pdf"),
            bytes,
        })
    }

    pub async fn list_personalized(&self) -> ContractResult<Vec<PersonalizedContract>> {
        Ok(self.contracts.list_contracts().await?)
    }

    async fn find_contract(&self, id: i64) -> ContractResult<PersonalizedContract> {
        self.contracts
            .find_contract(id)
            .await?
            .ok_or(ContractError::NotFound("personalized contract"))
    }

    async fn put_artifact(&self, bytes: Vec<u8>) -> ContractResult<Uuid> {
        self.artifacts.put(bytes).await.map_err(|err| {
            warn!(error = %err, "failed to store artifact");
            ContractError::Artifact(err)
        })
    }

    async fn fetch_artifact(&self, id: Uuid, what: &'static str) -> ContractResult<Vec<u8>> {
        match self.artifacts.get(id).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => {
                warn!(artifact_id = %id, "record points at a missing artifact");
                Err(ContractError::NotFound(what))
            }
            Err(err) => {
                warn!(artifact_id = %id, error = %err, "failed to load artifact");
                Err(ContractError::Artifact(err))
            }
        }
    }
}

fn validate_template(bytes: &[u8], filename: &str) -> ContractResult<()> {
    if !filename.to_ascii_lowercase().ends_with(PDF_EXTENSION) {
        return Err(ContractError::InvalidFormat(
            "only PDF files are allowed".into(),
        ));
    }
    if bytes.is_empty() {
        return Err(ContractError::InvalidFormat("document is empty".into()));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ContractError::InvalidFormat(
            "document does not start with a PDF header".into(),
        ));
    }
    Ok(())
}

async fn run_blocking<F, T>(f: F) -> ContractResult<T>
where
    F: FnOnce() -> pdf::ComposeResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ContractError::Internal(format!("composition task failed: {err}")))?;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use lopdf::Document;

    use super::*;
    use crate::pdf::testing::{page_ids, page_images, page_text, sample_pdf};
    use crate::storage::MemoryArtifactStore;
    use crate::store::MemoryStore;

    struct Harness {
        service: ContractService,
        artifacts: Arc<MemoryArtifactStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        let service = ContractService::new(store.clone(), store, artifacts.clone());
        Harness { service, artifacts }
    }

    fn signature_uri() -> String {
        png_uri(20, 10)
    }

    fn png_uri(width: u32, height: u32) -> String {
        let pixels = RgbaImage::from_pixel(width, height, Rgba([0, 0, 128, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(pixels)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    #[tokio::test]
    async fn newest_upload_becomes_the_active_template() {
        let h = harness();
        let t1 = h
            .service
            .upload_template(sample_pdf(&["one"]), "t1.pdf")
            .await
            .unwrap();
        let t2 = h
            .service
            .upload_template(sample_pdf(&["two"]), "T2.PDF")
            .await
            .unwrap();

        assert_eq!(h.service.active_template().await.unwrap().id, t2.id);
        let listed = h.service.list_templates().await.unwrap();
        let t1_listed = listed.iter().find(|t| t.id == t1.id).unwrap();
        assert!(!t1_listed.is_active);
        assert_eq!(t2.checksum.len(), 64);
        assert!(t2.note.as_deref().unwrap().starts_with("Uploaded at "));
    }

    #[tokio::test]
    async fn rejects_non_pdf_uploads_without_writing() {
        let h = harness();
        for (bytes, name) in [
            (sample_pdf(&["x"]), "contract.docx"),
            (b"hello".to_vec(), "contract.pdf"),
            (Vec::new(), "contract.pdf"),
        ] {
            let err = h.service.upload_template(bytes, name).await.unwrap_err();
            assert!(matches!(err, ContractError::InvalidFormat(_)));
        }
        assert!(h.artifacts.is_empty().await);
        assert!(matches!(
            h.service.active_template().await.unwrap_err(),
            ContractError::NoActiveTemplate
        ));
    }

    #[tokio::test]
    async fn activating_a_missing_template_keeps_the_active_one() {
        let h = harness();
        let t1 = h
            .service
            .upload_template(sample_pdf(&["one"]), "t1.pdf")
            .await
            .unwrap();

        let err = h.service.activate_template(999_999).await.unwrap_err();

        assert!(matches!(err, ContractError::NotFound("template")));
        assert_eq!(h.service.active_template().await.unwrap().id, t1.id);
    }

    #[tokio::test]
    async fn personalizes_the_first_page_of_the_active_template() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["old"]), "t1.pdf")
            .await
            .unwrap();
        let t2 = h
            .service
            .upload_template(sample_pdf(&["cover", "terms"]), "t2.pdf")
            .await
            .unwrap();

        let contract = h
            .service
            .personalize("Jane Doe", "123 Main St")
            .await
            .unwrap();
        assert_eq!(contract.template_id, t2.id);

        let generated = h.service.generated_bytes(contract.id).await.unwrap();
        assert_eq!(generated.filename, format!("contract_{}.pdf", contract.id));
        let doc = Document::load_mem(&generated.bytes).unwrap();
        let pages = page_ids(&doc);
        assert_eq!(pages.len(), 2);
        assert_eq!(
            page_text(&doc, pages[0]),
            vec!["cover", "Name: Jane Doe", "Address: 123 Main St"]
        );
        assert_eq!(page_text(&doc, pages[1]), vec!["terms"]);
    }

    #[tokio::test]
    async fn personalizing_without_a_template_fails() {
        let h = harness();
        let err = h.service.personalize("Jane", "Somewhere").await.unwrap_err();
        assert!(matches!(err, ContractError::NoActiveTemplate));
    }

    #[tokio::test]
    async fn signs_the_last_page_of_the_generated_document() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["cover", "terms"]), "t.pdf")
            .await
            .unwrap();
        let contract = h.service.personalize("Jane Doe", "123 Main St").await.unwrap();

        let signed = h.service.sign(contract.id, &signature_uri()).await.unwrap();
        assert!(signed.is_signed());
        let signed_at = signed.signature_timestamp.unwrap();

        let file = h.service.signed_bytes(contract.id).await.unwrap();
        assert_eq!(file.filename, format!("signed_contract_{}.pdf", contract.id));
        let doc = Document::load_mem(&file.bytes).unwrap();
        let pages = page_ids(&doc);
        assert_eq!(pages.len(), 2);
        assert_eq!(
            page_text(&doc, pages[0]),
            vec!["cover", "Name: Jane Doe", "Address: 123 Main St"]
        );
        let expected = format!(
            "Signed on {}",
            signed_at.format(pdf::compose::SIGNED_ON_FORMAT)
        );
        assert_eq!(page_text(&doc, pages[1]), vec!["terms".to_string(), expected]);
        assert_eq!(page_images(&doc, pages[1]), 1);
        assert_eq!(page_images(&doc, pages[0]), 0);
    }

    #[tokio::test]
    async fn re_signing_replaces_the_signature() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["only"]), "t.pdf")
            .await
            .unwrap();
        let contract = h.service.personalize("Jane", "Main St").await.unwrap();

        let first = h.service.sign(contract.id, &signature_uri()).await.unwrap();
        let second = h.service.sign(contract.id, &signature_uri()).await.unwrap();
        assert_ne!(first.signed_artifact_id, second.signed_artifact_id);

        let file = h.service.signed_bytes(contract.id).await.unwrap();
        let doc = Document::load_mem(&file.bytes).unwrap();
        let page = page_ids(&doc)[0];
        assert_eq!(page_images(&doc, page), 1);
        let signed_lines = page_text(&doc, page)
            .into_iter()
            .filter(|line| line.starts_with("Signed on "))
            .count();
        assert_eq!(signed_lines, 1);
    }

    #[tokio::test]
    async fn bad_signature_writes_nothing() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["only"]), "t.pdf")
            .await
            .unwrap();
        let contract = h.service.personalize("Jane", "Main St").await.unwrap();
        let stored = h.artifacts.len().await;

        let err = h
            .service
            .sign(contract.id, "not-a-valid-data-uri")
            .await
            .unwrap_err();

        assert!(matches!(err, ContractError::InvalidSignatureData(_)));
        assert_eq!(h.artifacts.len().await, stored);
        assert!(matches!(
            h.service.signed_bytes(contract.id).await.unwrap_err(),
            ContractError::NotFound("signed document")
        ));
    }

    #[tokio::test]
    async fn oversized_signature_is_rejected_before_anything_is_written() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["only"]), "t.pdf")
            .await
            .unwrap();
        let contract = h.service.personalize("Jane", "Main St").await.unwrap();
        let stored = h.artifacts.len().await;

        let err = h
            .service
            .sign(contract.id, &png_uri(crate::signature::MAX_SIGNATURE_SIDE + 1, 4))
            .await
            .unwrap_err();

        assert!(matches!(err, ContractError::InvalidSignatureData(_)));
        assert_eq!(h.artifacts.len().await, stored);

        let signed = h.service.sign(contract.id, &png_uri(1000, 500)).await.unwrap();
        assert!(signed.is_signed());
    }

    #[tokio::test]
    async fn signing_an_unknown_contract_is_not_found() {
        let h = harness();
        let err = h.service.sign(41, &signature_uri()).await.unwrap_err();
        assert!(matches!(err, ContractError::NotFound("personalized contract")));
    }

    #[tokio::test]
    async fn corrupt_template_surfaces_as_corrupt_document() {
        let h = harness();
        h.service
            .upload_template(b"%PDF-1.4 but nothing else".to_vec(), "broken.pdf")
            .await
            .unwrap();
        let stored = h.artifacts.len().await;

        let err = h.service.personalize("Jane", "Main St").await.unwrap_err();

        assert!(matches!(err, ContractError::CorruptDocument(_)));
        assert_eq!(h.artifacts.len().await, stored);
        assert!(h.service.list_personalized().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_personalized_contracts_newest_first() {
        let h = harness();
        h.service
            .upload_template(sample_pdf(&["only"]), "t.pdf")
            .await
            .unwrap();
        let first = h.service.personalize("A", "1").await.unwrap();
        let second = h.service.personalize("B", "2").await.unwrap();

        let ids: Vec<i64> = h
            .service
            .list_personalized()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
