//! End-to-end contract pipeline through the public API, across backends.

use hpcr_sdk_core::{
    attestation, contract::SIGNING_KEY, encoding, CryptoBackend, CsrInput, CsrSubject,
    EnvelopeOps, ErrorKind, Hpcr, HpcrConfig, HpcrError, NativeBackend, OpensslBackend, Platform,
};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use std::sync::{Arc, LazyLock};

const CONTRACT: &str = "\
workload:
  type: workload
  compose:
    archive: H4sIAAAAAAAA
env:
  type: env
  logging:
    logRouter:
      hostname: logs.example.com
      iamApiKey: redacted
";

struct Party {
    key: String,
    cert: String,
}

fn party(common_name: &str, ca: bool) -> Party {
    let key = NativeBackend.generate_private_key(2048).unwrap().to_string();
    let key_pair = KeyPair::from_pem(&key).unwrap();
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    let cert = params.self_signed(&key_pair).unwrap().pem();
    Party { key, cert }
}

static RUNTIME: LazyLock<Party> = LazyLock::new(|| party("HPCR Runtime", false));
static SIGNER: LazyLock<Party> = LazyLock::new(|| party("Contract Signer", false));
static CA: LazyLock<Party> = LazyLock::new(|| party("Contract CA", true));

fn native() -> Hpcr {
    Hpcr::with_backend(Arc::new(NativeBackend), HpcrConfig::default())
}

fn openssl() -> Option<Hpcr> {
    let bin = std::env::var("OPENSSL_BIN").unwrap_or_else(|_| "openssl".to_string());
    OpensslBackend::probe(bin).map(|b| Hpcr::with_backend(Arc::new(b), HpcrConfig::default()))
}

#[test]
fn test_contract_round_trip_native() {
    let hpcr = native();
    let rendered = hpcr
        .contract_encrypted(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();

    let decrypted = hpcr.decrypt_contract(&rendered.rendered, &RUNTIME.key).unwrap();
    let original: serde_yaml::Mapping = serde_yaml::from_str(CONTRACT).unwrap();
    assert_eq!(Some(&serde_yaml::Value::Mapping(decrypted.workload)), original.get("workload"));

    let mut env = decrypted.env;
    let signing_key = env.remove(SIGNING_KEY).unwrap();
    assert_eq!(
        signing_key.as_str().unwrap(),
        encoding::base64_encode(NativeBackend.public_key_of(&SIGNER.key).unwrap())
    );
    assert_eq!(Some(&serde_yaml::Value::Mapping(env)), original.get("env"));
}

#[test]
fn test_ephemeral_signing_key() {
    let hpcr = native();
    let rendered = hpcr
        .contract_encrypted(CONTRACT, Some(RUNTIME.cert.as_str()), None, Platform::Hpvs)
        .unwrap();
    let decrypted = hpcr.decrypt_contract(&rendered.rendered, &RUNTIME.key).unwrap();
    assert!(decrypted.signer.starts_with("-----BEGIN PUBLIC KEY-----"));
    assert_ne!(decrypted.signer, NativeBackend.public_key_of(&SIGNER.key).unwrap());
}

#[test]
fn test_contract_expiry_with_csr_pem() {
    let hpcr = native();
    let subject = CsrSubject {
        domain: Some("signer.example.com".into()),
        ..Default::default()
    };
    let csr = NativeBackend.csr_new(&SIGNER.key, &subject).unwrap();
    let rendered = hpcr
        .contract_expiry(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
            &CA.cert,
            &CA.key,
            &CsrInput::Pem(csr),
            7,
        )
        .unwrap();

    let decrypted = hpcr.decrypt_contract(&rendered.rendered, &RUNTIME.key).unwrap();
    let validity = hpcr.validate_encryption_cert(&decrypted.signer).unwrap();
    assert!(validity.days_left <= 7);
}

#[test]
fn test_contract_expiry_csr_pem_requires_its_key() {
    let hpcr = native();
    let subject = CsrSubject {
        domain: Some("signer.example.com".into()),
        ..Default::default()
    };
    let csr = NativeBackend.csr_new(&SIGNER.key, &subject).unwrap();

    // No signing key: an ephemeral one is generated and cannot match the CSR
    let err = hpcr
        .contract_expiry(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            None,
            Platform::Hpvs,
            &CA.cert,
            &CA.key,
            &CsrInput::Pem(csr),
            7,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_wrong_recipient_key() {
    let hpcr = native();
    let rendered = hpcr
        .contract_encrypted(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    let err = hpcr.decrypt_contract(&rendered.rendered, &SIGNER.key).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CryptoFailure);
}

#[test]
fn test_tampered_signature() {
    let hpcr = native();
    let rendered = hpcr
        .contract_encrypted(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    let mut doc: serde_yaml::Mapping = serde_yaml::from_str(&rendered.rendered).unwrap();
    let forged = encoding::base64_encode(NativeBackend.sign(&CA.key, b"something else").unwrap());
    doc.insert("envWorkloadSignature".into(), forged.into());

    let err = hpcr
        .decrypt_contract(&serde_yaml::to_string(&doc).unwrap(), &RUNTIME.key)
        .unwrap_err();
    assert_eq!(err, HpcrError::SignatureMismatch);
}

#[test]
fn test_backends_interoperate() {
    let Some(external) = openssl() else {
        eprintln!("openssl not available, skipping");
        return;
    };
    let native = native();

    let sealed = native
        .contract_encrypted(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    external.decrypt_contract(&sealed.rendered, &RUNTIME.key).unwrap();

    let sealed = external
        .contract_encrypted(
            CONTRACT,
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    native.decrypt_contract(&sealed.rendered, &RUNTIME.key).unwrap();

    let record = EnvelopeOps::encrypt(
        external.backend(),
        &RUNTIME.cert,
        b"a6f6228bbf820e766ebe43c51e97332dda92e9744e719a646f611fe0681d2458  cidata/user-data\n",
    )
    .unwrap();
    let map =
        attestation::parse_attestation(native.backend(), &record, Some(RUNTIME.key.as_str()))
            .unwrap();
    assert!(map.contains_key("cidata/user-data"));
}

#[test]
fn test_content_hash_is_backend_independent() {
    let Some(external) = openssl() else {
        return;
    };
    let a = native()
        .content_hash(
            b"payload",
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    let b = external
        .content_hash(
            b"payload",
            Some(RUNTIME.cert.as_str()),
            Some(SIGNER.key.as_str()),
            Platform::Hpvs,
        )
        .unwrap();
    assert_eq!(a, b);
}
