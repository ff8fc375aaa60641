//! High-level envelope operations

use crate::{
    crypto::CryptoBackend,
    encoding,
    envelope::Token,
    error::{HpcrError, Result},
};
use zeroize::Zeroizing;

/// Length of the ASCII workload password
pub const WORKLOAD_KEY_LEN: usize = 32;

/// Envelope operations
pub struct EnvelopeOps;

impl EnvelopeOps {
    /// Fresh workload password: the first 32 characters of base64 over 32
    /// random bytes. Consumers expect exactly this alphabet and length.
    pub fn workload_key() -> Result<Zeroizing<String>> {
        let random = Zeroizing::new(encoding::random_bytes(WORKLOAD_KEY_LEN)?);
        let mut key = Zeroizing::new(encoding::base64_encode(&random[..]));
        key.truncate(WORKLOAD_KEY_LEN);
        Ok(key)
    }

    /// Seal `plaintext` to a recipient public key or certificate
    pub fn encrypt(
        backend: &dyn CryptoBackend,
        recipient_pem: &str,
        plaintext: &[u8],
    ) -> Result<String> {
        let key = Self::workload_key()?;
        let wrapped = backend.rsa_wrap(recipient_pem, key.as_bytes())?;
        let ciphertext = backend.symm_encrypt(key.as_bytes(), plaintext)?;

        tracing::debug!(
            plaintext_len = plaintext.len(),
            wrapped_len = wrapped.len(),
            ciphertext_len = ciphertext.len(),
            "envelope sealed"
        );
        Ok(Token::from_parts(&wrapped, &ciphertext).to_string())
    }

    /// Open a token with the recipient private key
    pub fn decrypt(
        backend: &dyn CryptoBackend,
        private_key_pem: &str,
        token: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let token: Token = token.parse()?;
        let wrapped = token.wrapped_key_bytes()?;
        let ciphertext = token.ciphertext_bytes()?;

        let key = backend.rsa_unwrap(private_key_pem, &wrapped)?;
        backend.symm_decrypt(&key, &ciphertext)
    }

    /// [`Self::decrypt`] for payloads that must be UTF-8
    pub fn decrypt_to_string(
        backend: &dyn CryptoBackend,
        private_key_pem: &str,
        token: &str,
    ) -> Result<Zeroizing<String>> {
        let plain = Self::decrypt(backend, private_key_pem, token)?;
        let text = std::str::from_utf8(&plain)
            .map_err(|_| HpcrError::InvalidInput("decrypted payload is not UTF-8".into()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
