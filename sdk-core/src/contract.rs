//! Contract encryption, signing and verification
//!
//! `workload` and `env` are encrypted as separate tokens. Before `env` is
//! sealed, the signer's public key (or CA-issued leaf) is upserted as
//! `env.signingKey`; `envWorkloadSignature` then covers the two tokens
//! concatenated in that order.

use crate::{
    crypto::{CryptoBackend, CsrSubject},
    encoding,
    envelope::operations::EnvelopeOps,
    error::{HpcrError, Result},
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

pub const WORKLOAD: &str = "workload";
pub const ENV: &str = "env";
pub const SIGNING_KEY: &str = "signingKey";
pub const ENV_WORKLOAD_SIGNATURE: &str = "envWorkloadSignature";
pub const ATTESTATION_PUBLIC_KEY: &str = "attestationPublicKey";

/// Encrypted, signed contract as emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedContract {
    pub workload: String,
    pub env: String,
    #[serde(rename = "envWorkloadSignature")]
    pub env_workload_signature: String,
    #[serde(
        rename = "attestationPublicKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attestation_public_key: Option<Value>,
}

impl SignedContract {
    pub fn signed_message(&self) -> String {
        format!("{}{}", self.workload, self.env)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| HpcrError::InvalidInput(e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| HpcrError::InvalidInput(format!("signed contract: {e}")))
    }
}

/// Plaintext sections recovered from a signed contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecryptedContract {
    pub workload: Mapping,
    pub env: Mapping,
    /// PEM of the key or certificate that verified `envWorkloadSignature`
    pub signer: String,
}

/// Source of the CSR for contract-expiry mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrInput {
    Subject(CsrSubject),
    Pem(String),
}

impl CsrInput {
    /// Exactly one of `subject` or `pem`.
    pub fn from_options(subject: Option<CsrSubject>, pem: Option<String>) -> Result<Self> {
        match (subject, pem) {
            (Some(subject), None) => Ok(Self::Subject(subject)),
            (None, Some(pem)) => Ok(Self::Pem(pem)),
            _ => Err(HpcrError::CsrArgumentConflict),
        }
    }
}

/// Parsed pre-encryption contract
struct ContractSections {
    workload: Mapping,
    env: Mapping,
    attestation_public_key: Option<Value>,
}

impl ContractSections {
    fn parse(contract_yaml: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(contract_yaml)
            .map_err(|e| HpcrError::InvalidInput(format!("contract: {e}")))?;
        let Value::Mapping(root) = doc else {
            return Err(HpcrError::InvalidInput("contract is not a mapping".into()));
        };

        for key in root.keys() {
            match key.as_str() {
                Some(WORKLOAD | ENV | ATTESTATION_PUBLIC_KEY) => {}
                Some(other) => tracing::warn!(key = other, "ignoring unknown contract section"),
                None => tracing::warn!("ignoring non-string contract key"),
            }
        }

        Ok(Self {
            workload: section(&root, WORKLOAD)?,
            env: section(&root, ENV)?,
            attestation_public_key: root.get(ATTESTATION_PUBLIC_KEY).cloned(),
        })
    }
}

fn section(root: &Mapping, name: &'static str) -> Result<Mapping> {
    match root.get(name) {
        None | Some(Value::Null) => Err(HpcrError::MissingContractSection(name)),
        Some(Value::Mapping(m)) => Ok(m.clone()),
        Some(_) => Err(HpcrError::InvalidInput(format!("`{name}` must be a mapping"))),
    }
}

fn to_yaml(mapping: &Mapping) -> Result<String> {
    serde_yaml::to_string(mapping).map_err(|e| HpcrError::InvalidInput(e.to_string()))
}

fn parse_mapping(yaml: &str, name: &'static str) -> Result<Mapping> {
    match serde_yaml::from_str(yaml) {
        Ok(Value::Mapping(m)) => Ok(m),
        Ok(_) => Err(HpcrError::InvalidInput(format!("decrypted `{name}` is not a mapping"))),
        Err(e) => Err(HpcrError::InvalidInput(format!("decrypted `{name}`: {e}"))),
    }
}

/// Contract operations
pub struct ContractOps;

impl ContractOps {
    /// Encrypt both sections to `recipient_pem` and sign them with
    /// `signing_key_pem`. With `signing_cert_pem`, that certificate is embedded
    /// as `env.signingKey` instead of the bare public key.
    pub fn encrypt_and_sign(
        backend: &dyn CryptoBackend,
        contract_yaml: &str,
        recipient_pem: &str,
        signing_key_pem: &str,
        signing_cert_pem: Option<&str>,
    ) -> Result<SignedContract> {
        let mut sections = ContractSections::parse(contract_yaml)?;

        let workload =
            EnvelopeOps::encrypt(backend, recipient_pem, to_yaml(&sections.workload)?.as_bytes())?;

        let signer = match signing_cert_pem {
            Some(cert) => cert.to_string(),
            None => backend.public_key_of(signing_key_pem)?,
        };
        sections.env.insert(
            Value::String(SIGNING_KEY.into()),
            Value::String(encoding::base64_encode(signer.as_bytes())),
        );
        let env = EnvelopeOps::encrypt(backend, recipient_pem, to_yaml(&sections.env)?.as_bytes())?;

        let mut contract = SignedContract {
            workload,
            env,
            env_workload_signature: String::new(),
            attestation_public_key: sections.attestation_public_key,
        };
        let signature = backend.sign(signing_key_pem, contract.signed_message().as_bytes())?;
        contract.env_workload_signature = encoding::base64_encode(&signature);

        tracing::debug!(
            backend = backend.name(),
            with_certificate = signing_cert_pem.is_some(),
            "contract encrypted and signed"
        );
        Ok(contract)
    }

    /// Issue a leaf for the signing key from the caller's CA, then sign the
    /// contract with that leaf embedded.
    #[allow(clippy::too_many_arguments)]
    pub fn contract_expiry(
        backend: &dyn CryptoBackend,
        contract_yaml: &str,
        recipient_pem: &str,
        signing_key_pem: &str,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        csr: &CsrInput,
        validity_days: u32,
    ) -> Result<SignedContract> {
        let csr_pem = match csr {
            CsrInput::Subject(subject) => backend.csr_new(signing_key_pem, subject)?,
            CsrInput::Pem(pem) => pem.clone(),
        };
        let leaf = backend.cert_sign(&csr_pem, ca_cert_pem, ca_key_pem, validity_days)?;

        // The leaf must certify the signing key
        let leaf_key = backend.certificate_public_key(&leaf)?;
        if leaf_key.trim() != backend.public_key_of(signing_key_pem)?.trim() {
            return Err(HpcrError::InvalidInput(
                "CSR public key does not match the signing key".into(),
            ));
        }
        tracing::debug!(validity_days, "signing certificate issued");

        Self::encrypt_and_sign(
            backend,
            contract_yaml,
            recipient_pem,
            signing_key_pem,
            Some(leaf.as_str()),
        )
    }

    /// Decrypt both sections with the recipient key and verify
    /// `envWorkloadSignature` against the embedded `env.signingKey`.
    pub fn decrypt_and_verify(
        backend: &dyn CryptoBackend,
        signed_yaml: &str,
        private_key_pem: &str,
    ) -> Result<DecryptedContract> {
        let contract = SignedContract::from_yaml(signed_yaml)?;

        let workload =
            EnvelopeOps::decrypt_to_string(backend, private_key_pem, &contract.workload)?;
        let env = EnvelopeOps::decrypt_to_string(backend, private_key_pem, &contract.env)?;
        let workload = parse_mapping(&workload, WORKLOAD)?;
        let env = parse_mapping(&env, ENV)?;

        let signer = env
            .get(SIGNING_KEY)
            .and_then(Value::as_str)
            .ok_or(HpcrError::MissingContractSection("env.signingKey"))?;
        let signer = String::from_utf8(encoding::base64_decode(signer)?)
            .map_err(|_| HpcrError::InvalidPem("env.signingKey is not UTF-8".into()))?;

        let signature = encoding::base64_decode(&contract.env_workload_signature)
            .map_err(|_| HpcrError::SignatureMismatch)?;
        if !backend.verify(&signer, contract.signed_message().as_bytes(), &signature)? {
            return Err(HpcrError::SignatureMismatch);
        }

        Ok(DecryptedContract {
            workload,
            env,
            signer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keys, NativeBackend};
    use crate::test_support::{fixture_ca, fixture_cert, fixture_key, second_key};

    const CONTRACT: &str = "workload:\n  type: workload\nenv:\n  type: env\n";

    fn sign(contract: &str) -> SignedContract {
        ContractOps::encrypt_and_sign(
            &NativeBackend,
            contract,
            &fixture_cert().cert_pem,
            &fixture_key().private_pem,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_encrypt_and_sign_layout() {
        let contract = sign(CONTRACT);
        let yaml = contract.to_yaml().unwrap();
        let doc: Mapping = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc.len(), 3);
        for key in [WORKLOAD, ENV, ENV_WORKLOAD_SIGNATURE] {
            assert!(doc.contains_key(key), "{key}");
        }
        assert!(contract.workload.starts_with("hyper-protect-basic."));

        let signature = encoding::base64_decode(&contract.env_workload_signature).unwrap();
        let message = format!("{}{}", contract.workload, contract.env);
        assert!(NativeBackend
            .verify(&fixture_key().public_pem, message.as_bytes(), &signature)
            .unwrap());
    }

    #[test]
    fn test_env_carries_signing_key() {
        let contract = sign(CONTRACT);
        let env = EnvelopeOps::decrypt_to_string(
            &NativeBackend,
            &fixture_cert().key.private_pem,
            &contract.env,
        )
        .unwrap();
        let env: Mapping = serde_yaml::from_str(&env).unwrap();
        assert_eq!(env.get("type").and_then(Value::as_str), Some("env"));
        assert_eq!(
            env.get(SIGNING_KEY).and_then(Value::as_str),
            Some(encoding::base64_encode(&fixture_key().public_pem).as_str())
        );
    }

    #[test]
    fn test_round_trip() {
        let yaml = sign(CONTRACT).to_yaml().unwrap();
        let decrypted =
            ContractOps::decrypt_and_verify(&NativeBackend, &yaml, &fixture_cert().key.private_pem)
                .unwrap();
        assert_eq!(decrypted.workload.get("type").and_then(Value::as_str), Some("workload"));
        assert_eq!(decrypted.signer, fixture_key().public_pem);
    }

    #[test]
    fn test_swapped_env_fails_verification() {
        let mut first = sign(CONTRACT);
        let second = sign(CONTRACT);
        first.env = second.env;
        let err = ContractOps::decrypt_and_verify(
            &NativeBackend,
            &first.to_yaml().unwrap(),
            &fixture_cert().key.private_pem,
        )
        .unwrap_err();
        assert_eq!(err, HpcrError::SignatureMismatch);
    }

    #[test]
    fn test_missing_sections() {
        let err = ContractOps::encrypt_and_sign(
            &NativeBackend,
            "env:\n  type: env\n",
            &fixture_cert().cert_pem,
            &fixture_key().private_pem,
            None,
        )
        .unwrap_err();
        assert_eq!(err, HpcrError::MissingContractSection(WORKLOAD));

        let err = ContractOps::encrypt_and_sign(
            &NativeBackend,
            "workload:\n  type: workload\n",
            &fixture_cert().cert_pem,
            &fixture_key().private_pem,
            None,
        )
        .unwrap_err();
        assert_eq!(err, HpcrError::MissingContractSection(ENV));
    }

    #[test]
    fn test_rejects_non_mapping() {
        for bad in ["- a\n- b\n", "workload: [1]\nenv: {}\n", "workload: {"] {
            let err = ContractOps::encrypt_and_sign(
                &NativeBackend,
                bad,
                &fixture_cert().cert_pem,
                &fixture_key().private_pem,
                None,
            )
            .unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput, "{bad:?}");
        }
    }

    #[test]
    fn test_attestation_key_passthrough() {
        let contract = sign(&format!("{CONTRACT}attestationPublicKey: abc\nextra: 1\n"));
        assert_eq!(contract.attestation_public_key, Some(Value::String("abc".into())));
        let doc: Mapping = serde_yaml::from_str(&contract.to_yaml().unwrap()).unwrap();
        assert!(!doc.contains_key("extra"));
    }

    #[test]
    fn test_contract_expiry_embeds_leaf() {
        let ca = fixture_ca();
        let subject = CsrSubject {
            country: Some("US".into()),
            org: Some("HPCR".into()),
            domain: Some("signer.example.com".into()),
            ..Default::default()
        };
        let contract = ContractOps::contract_expiry(
            &NativeBackend,
            CONTRACT,
            &fixture_cert().cert_pem,
            &second_key().private_pem,
            &ca.cert_pem,
            &ca.key.private_pem,
            &CsrInput::Subject(subject),
            30,
        )
        .unwrap();

        let decrypted = ContractOps::decrypt_and_verify(
            &NativeBackend,
            &contract.to_yaml().unwrap(),
            &fixture_cert().key.private_pem,
        )
        .unwrap();
        assert_eq!(keys::pem_label(&decrypted.signer).unwrap(), keys::LABEL_CERTIFICATE);
        assert_eq!(
            NativeBackend.certificate_public_key(&decrypted.signer).unwrap(),
            second_key().public_pem
        );
    }

    #[test]
    fn test_contract_expiry_rejects_foreign_csr() {
        let ca = fixture_ca();
        let subject = CsrSubject {
            domain: Some("other.example.com".into()),
            ..Default::default()
        };
        let foreign_csr = NativeBackend.csr_new(&fixture_key().private_pem, &subject).unwrap();

        let err = ContractOps::contract_expiry(
            &NativeBackend,
            CONTRACT,
            &fixture_cert().cert_pem,
            &second_key().private_pem,
            &ca.cert_pem,
            &ca.key.private_pem,
            &CsrInput::Pem(foreign_csr),
            7,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_contract_expiry_accepts_matching_csr() {
        let ca = fixture_ca();
        let subject = CsrSubject {
            domain: Some("signer.example.com".into()),
            ..Default::default()
        };
        let csr = NativeBackend.csr_new(&second_key().private_pem, &subject).unwrap();

        let contract = ContractOps::contract_expiry(
            &NativeBackend,
            CONTRACT,
            &fixture_cert().cert_pem,
            &second_key().private_pem,
            &ca.cert_pem,
            &ca.key.private_pem,
            &CsrInput::Pem(csr),
            7,
        )
        .unwrap();
        ContractOps::decrypt_and_verify(
            &NativeBackend,
            &contract.to_yaml().unwrap(),
            &fixture_cert().key.private_pem,
        )
        .unwrap();
    }

    #[test]
    fn test_csr_input_conflict() {
        assert_eq!(
            CsrInput::from_options(None, None),
            Err(HpcrError::CsrArgumentConflict)
        );
        assert_eq!(
            CsrInput::from_options(Some(CsrSubject::default()), Some("pem".into())),
            Err(HpcrError::CsrArgumentConflict)
        );
    }
}
