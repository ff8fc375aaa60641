//! Cryptographic operations for HPCR contracts
//!
//! Two interchangeable backends implement [`CryptoBackend`]: [`NativeBackend`]
//! (pure Rust) and [`OpensslBackend`] (spawns the `openssl` binary). Both
//! produce identical wire output.

pub mod kdf;
pub mod keys;
pub mod native;
pub mod openssl;
pub mod pki;
pub mod sig;
pub mod symmetric;

pub use native::NativeBackend;
pub use openssl::OpensslBackend;
pub use pki::{CertificateValidity, CsrSubject};

use crate::config::{BackendChoice, HpcrConfig};
use crate::error::Result;
use std::sync::{Arc, OnceLock};
use zeroize::Zeroizing;

/// RSA modulus used when a signing key has to be generated on the fly
pub const DEFAULT_RSA_BITS: usize = 4096;

/// Operations every crypto backend provides.
pub trait CryptoBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fresh RSA private key, PKCS#8 PEM
    fn generate_private_key(&self, bits: usize) -> Result<Zeroizing<String>>;

    /// PKIX public key PEM for a PKCS#1 or PKCS#8 private key
    fn public_key_of(&self, private_key_pem: &str) -> Result<String>;

    /// PKIX public key PEM embedded in an X.509 certificate
    fn certificate_public_key(&self, cert_pem: &str) -> Result<String>;

    /// SHA-256 over the certificate DER
    fn cert_fingerprint(&self, cert_pem: &str) -> Result<[u8; 32]>;

    /// SHA-256 over the PKIX DER of the key's public half
    fn private_key_fingerprint(&self, private_key_pem: &str) -> Result<[u8; 32]>;

    /// PKCS#1 v1.5 encryption to a public key or certificate
    fn rsa_wrap(&self, recipient_pem: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn rsa_unwrap(&self, private_key_pem: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// `Salted__`-framed AES-256-CBC
    fn symm_encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    fn symm_decrypt(&self, password: &[u8], framed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// RSASSA-PKCS1-v1_5 over SHA-256
    fn sign(&self, private_key_pem: &str, message: &[u8]) -> Result<Vec<u8>>;

    /// Verify against a public key or certificate
    fn verify(&self, public_pem: &str, message: &[u8], signature: &[u8]) -> Result<bool>;

    fn csr_new(&self, private_key_pem: &str, subject: &CsrSubject) -> Result<String>;

    fn cert_sign(
        &self,
        csr_pem: &str,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        validity_days: u32,
    ) -> Result<String>;
}

/// Choose a backend for `config`.
///
/// `auto` prefers OpenSSL when the configured binary reports an `OpenSSL`
/// version string and falls back to the native backend otherwise.
pub fn select_backend(config: &HpcrConfig) -> Result<Arc<dyn CryptoBackend>> {
    let backend: Arc<dyn CryptoBackend> = match config.backend {
        BackendChoice::Native => Arc::new(NativeBackend),
        BackendChoice::Openssl => Arc::new(OpensslBackend::new(&config.openssl_bin)?),
        BackendChoice::Auto => match OpensslBackend::probe(&config.openssl_bin) {
            Some(backend) => Arc::new(backend),
            None => Arc::new(NativeBackend),
        },
    };
    tracing::info!(backend = backend.name(), "crypto backend selected");
    Ok(backend)
}

/// Process-wide backend, probed once from the environment.
pub fn default_backend() -> Result<Arc<dyn CryptoBackend>> {
    static BACKEND: OnceLock<Arc<dyn CryptoBackend>> = OnceLock::new();
    if let Some(backend) = BACKEND.get() {
        return Ok(Arc::clone(backend));
    }
    let backend = select_backend(&HpcrConfig::from_env()?)?;
    Ok(Arc::clone(BACKEND.get_or_init(|| backend)))
}
