//! Pure-Rust backend

use super::{keys, pki, sig, symmetric, CryptoBackend, CsrSubject};
use crate::error::{HpcrError, Result};
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

/// RustCrypto `rsa`/`aes`/`cbc`/`pbkdf2`, `x509-parser` and `rcgen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl CryptoBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn generate_private_key(&self, bits: usize) -> Result<Zeroizing<String>> {
        if bits < keys::MIN_RSA_BITS {
            return Err(HpcrError::UnsupportedKeyType(format!("{bits}-bit RSA")));
        }
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| HpcrError::CryptoFailure(e.to_string()))?;
        keys::private_key_pkcs8_pem(&key)
    }

    fn public_key_of(&self, private_key_pem: &str) -> Result<String> {
        let key = keys::parse_private_key(private_key_pem)?;
        keys::public_key_pem(&key.to_public_key())
    }

    fn certificate_public_key(&self, cert_pem: &str) -> Result<String> {
        keys::public_key_pem(&keys::certificate_public_key(cert_pem)?)
    }

    fn cert_fingerprint(&self, cert_pem: &str) -> Result<[u8; 32]> {
        keys::cert_fingerprint(cert_pem)
    }

    fn private_key_fingerprint(&self, private_key_pem: &str) -> Result<[u8; 32]> {
        keys::private_key_fingerprint(private_key_pem)
    }

    fn rsa_wrap(&self, recipient_pem: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        sig::rsa_wrap(&keys::parse_public_key(recipient_pem)?, plaintext)
    }

    fn rsa_unwrap(&self, private_key_pem: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        sig::rsa_unwrap(&keys::parse_private_key(private_key_pem)?, ciphertext)
    }

    fn symm_encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        symmetric::encrypt(password, plaintext)
    }

    fn symm_decrypt(&self, password: &[u8], framed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        symmetric::decrypt(password, framed)
    }

    fn sign(&self, private_key_pem: &str, message: &[u8]) -> Result<Vec<u8>> {
        sig::rsa_sha256_sign(&keys::parse_private_key(private_key_pem)?, message)
    }

    fn verify(&self, public_pem: &str, message: &[u8], signature: &[u8]) -> Result<bool> {
        sig::rsa_sha256_verify(&keys::parse_public_key(public_pem)?, message, signature)
    }

    fn csr_new(&self, private_key_pem: &str, subject: &CsrSubject) -> Result<String> {
        pki::csr_new(private_key_pem, subject)
    }

    fn cert_sign(
        &self,
        csr_pem: &str,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        validity_days: u32,
    ) -> Result<String> {
        pki::cert_sign(csr_pem, ca_cert_pem, ca_key_pem, validity_days)
    }
}
