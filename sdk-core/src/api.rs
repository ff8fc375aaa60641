//! Functional interface consumed by plugin hosts and the CLI

use crate::{
    archive, attestation,
    config::{HpcrConfig, Platform},
    contract::{ContractOps, CsrInput, DecryptedContract},
    crypto::{self, pki, CertificateValidity, CryptoBackend, DEFAULT_RSA_BITS},
    download, encoding,
    envelope::operations::EnvelopeOps,
    error::{HpcrError, Result},
    fingerprint,
    version::{self, SelectedCertificate, SelectedImage},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

/// A rendered artifact with digests of its input and output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendered {
    pub rendered: String,
    pub sha256_in: String,
    pub sha256_out: String,
}

impl Rendered {
    fn new(input: impl AsRef<[u8]>, rendered: String) -> Self {
        Self {
            sha256_in: encoding::sha256_hex(input),
            sha256_out: encoding::sha256_hex(&rendered),
            rendered,
        }
    }
}

/// Entry point bundling a crypto backend with configuration.
#[derive(Clone)]
pub struct Hpcr {
    backend: Arc<dyn CryptoBackend>,
    config: HpcrConfig,
}

impl std::fmt::Debug for Hpcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hpcr")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Hpcr {
    pub fn new(config: HpcrConfig) -> Result<Self> {
        let backend = crypto::select_backend(&config)?;
        Ok(Self { backend, config })
    }

    /// Configuration from the environment over the process-wide backend,
    /// which is probed once and reused by every later call.
    pub fn from_env() -> Result<Self> {
        let config = HpcrConfig::from_env()?;
        let backend = crypto::default_backend()?;
        Ok(Self { backend, config })
    }

    pub fn with_backend(backend: Arc<dyn CryptoBackend>, config: HpcrConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &dyn CryptoBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &HpcrConfig {
        &self.config
    }

    fn recipient<'a>(&self, cert: Option<&'a str>, platform: Platform) -> Result<Cow<'a, str>> {
        match cert {
            Some(pem) => Ok(Cow::Borrowed(pem)),
            None => Ok(Cow::Owned(self.config.default_certificate(platform)?)),
        }
    }

    /// Caller's signing key, or a fresh RSA-4096 key for this call only
    fn signing_key(&self, key: Option<&str>) -> Result<Zeroizing<String>> {
        match key {
            Some(pem) => Ok(Zeroizing::new(pem.to_string())),
            None => {
                tracing::debug!(bits = DEFAULT_RSA_BITS, "generating ephemeral signing key");
                self.backend.generate_private_key(DEFAULT_RSA_BITS)
            }
        }
    }

    /// Base64 of `plain`
    pub fn text(&self, plain: &str) -> Rendered {
        Rendered::new(plain, encoding::base64_encode(plain))
    }

    /// Base64 of `plain_json`, which must parse as JSON
    pub fn json(&self, plain_json: &str) -> Result<Rendered> {
        serde_json::from_str::<serde_json::Value>(plain_json)
            .map_err(|e| HpcrError::InvalidInput(format!("json: {e}")))?;
        Ok(self.text(plain_json))
    }

    /// Base64 of the folder as `.tar.gz`
    pub fn tgz(&self, folder: impl AsRef<Path>) -> Result<Rendered> {
        let archive = encoding::base64_encode(archive::archive(folder)?);
        Ok(Rendered::new(&archive, archive.clone()))
    }

    pub fn text_encrypted(
        &self,
        plain: &str,
        recipient_cert: Option<&str>,
        platform: Platform,
    ) -> Result<Rendered> {
        let recipient = self.recipient(recipient_cert, platform)?;
        let token = EnvelopeOps::encrypt(self.backend(), &recipient, plain.as_bytes())?;
        Ok(Rendered::new(plain, token))
    }

    /// Token over the base64 `.tar.gz` of `folder`
    pub fn tgz_encrypted(
        &self,
        folder: impl AsRef<Path>,
        recipient_cert: Option<&str>,
        platform: Platform,
    ) -> Result<Rendered> {
        let archive = encoding::base64_encode(archive::archive(folder)?);
        let recipient = self.recipient(recipient_cert, platform)?;
        let token = EnvelopeOps::encrypt(self.backend(), &recipient, archive.as_bytes())?;
        Ok(Rendered::new(&archive, token))
    }

    pub fn contract_encrypted(
        &self,
        contract_yaml: &str,
        recipient_cert: Option<&str>,
        signing_key: Option<&str>,
        platform: Platform,
    ) -> Result<Rendered> {
        let recipient = self.recipient(recipient_cert, platform)?;
        let signing_key = self.signing_key(signing_key)?;
        let contract = ContractOps::encrypt_and_sign(
            self.backend(),
            contract_yaml,
            &recipient,
            &signing_key,
            None,
        )?;
        Ok(Rendered::new(contract_yaml, contract.to_yaml()?))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn contract_expiry(
        &self,
        contract_yaml: &str,
        recipient_cert: Option<&str>,
        signing_key: Option<&str>,
        platform: Platform,
        ca_cert: &str,
        ca_key: &str,
        csr: &CsrInput,
        validity_days: u32,
    ) -> Result<Rendered> {
        let recipient = self.recipient(recipient_cert, platform)?;
        let signing_key = self.signing_key(signing_key)?;
        let contract = ContractOps::contract_expiry(
            self.backend(),
            contract_yaml,
            &recipient,
            &signing_key,
            ca_cert,
            ca_key,
            csr,
            validity_days,
        )?;
        Ok(Rendered::new(contract_yaml, contract.to_yaml()?))
    }

    pub fn attestation(
        &self,
        blob: &str,
        private_key: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        attestation::parse_attestation(self.backend(), blob, private_key)
    }

    pub fn select_image(&self, catalog_json: &str, constraint: &str) -> Result<SelectedImage> {
        version::select_image(catalog_json, constraint)
    }

    pub fn select_certificate(
        &self,
        certificates: &BTreeMap<String, String>,
        constraint: &str,
    ) -> Result<SelectedCertificate> {
        version::select_certificate(certificates, constraint)
    }

    /// Download certificates for `versions`; `template` defaults to the
    /// configured one.
    pub async fn download_certificates(
        &self,
        template: Option<&str>,
        versions: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let client = download::build_client(&self.config)?;
        let template = template.unwrap_or(self.config.certificate_template.as_str());
        download::download_certificates(&client, template, versions).await
    }

    /// Validity window of `cert_pem`; fails unless it is valid right now.
    pub fn validate_encryption_cert(&self, cert_pem: &str) -> Result<CertificateValidity> {
        pki::check_validity_at(cert_pem, chrono::Utc::now())
    }

    pub fn decrypt_contract(
        &self,
        signed_yaml: &str,
        private_key: &str,
    ) -> Result<DecryptedContract> {
        ContractOps::decrypt_and_verify(self.backend(), signed_yaml, private_key)
    }

    pub fn content_hash(
        &self,
        payload: &[u8],
        recipient_cert: Option<&str>,
        signing_key: Option<&str>,
        platform: Platform,
    ) -> Result<String> {
        let recipient = self.recipient(recipient_cert, platform)?;
        fingerprint::content_hash(self.backend(), payload, &recipient, signing_key)
    }
}
