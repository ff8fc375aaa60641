//! Shared fixtures for unit tests; RSA key generation is slow, so each
//! fixture is generated once per test binary.

use crate::crypto::keys::{parse_private_key, private_key_pkcs8_pem, public_key_pem};
use crate::crypto::OpensslBackend;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use rsa::RsaPrivateKey;
use std::sync::LazyLock;

pub struct KeyFixture {
    pub private_pem: String,
    pub public_pem: String,
}

pub struct CertFixture {
    pub key: KeyFixture,
    pub cert_pem: String,
}

pub fn generate_key(bits: usize) -> KeyFixture {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits).unwrap();
    let private_pem = private_key_pkcs8_pem(&key).unwrap().to_string();
    let public_pem =
        public_key_pem(&parse_private_key(&private_pem).unwrap().to_public_key()).unwrap();
    KeyFixture {
        private_pem,
        public_pem,
    }
}

fn issue(common_name: &str, ca: bool) -> CertFixture {
    let key = generate_key(2048);
    let key_pair = KeyPair::from_pem(&key.private_pem).unwrap();

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = now + time::Duration::days(365);
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }

    let cert = params.self_signed(&key_pair).unwrap();
    CertFixture {
        key,
        cert_pem: cert.pem(),
    }
}

pub fn fixture_key() -> &'static KeyFixture {
    static KEY: LazyLock<KeyFixture> = LazyLock::new(|| generate_key(2048));
    &KEY
}

pub fn second_key() -> &'static KeyFixture {
    static KEY: LazyLock<KeyFixture> = LazyLock::new(|| generate_key(2048));
    &KEY
}

/// Self-signed recipient certificate
pub fn fixture_cert() -> &'static CertFixture {
    static CERT: LazyLock<CertFixture> = LazyLock::new(|| issue("HPCR Test Encryption", false));
    &CERT
}

pub fn fixture_ca() -> &'static CertFixture {
    static CA: LazyLock<CertFixture> = LazyLock::new(|| issue("HPCR Test CA", true));
    &CA
}

/// OpenSSL backend when a binary is available; tests skip otherwise.
pub fn openssl_backend() -> Option<OpensslBackend> {
    let bin = std::env::var("OPENSSL_BIN").unwrap_or_else(|_| "openssl".to_string());
    OpensslBackend::probe(bin)
}
