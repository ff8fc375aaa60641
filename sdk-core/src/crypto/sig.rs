//! RSASSA-PKCS1-v1_5 / SHA-256 signatures and PKCS#1 v1.5 key wrapping

use crate::crypto::keys::max_wrap_len;
use crate::error::{HpcrError, Result};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// RSA-SHA256 sign (PKCS#1 v1.5, not PSS)
pub fn rsa_sha256_sign(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let sig = signing_key
        .try_sign(message)
        .map_err(|e| HpcrError::CryptoFailure(e.to_string()))?;
    Ok(sig.to_vec())
}

/// RSA-SHA256 verify
pub fn rsa_sha256_verify(
    public_key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let sig = match Signature::try_from(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    Ok(verifying_key.verify(message, &sig).is_ok())
}

/// PKCS#1 v1.5 encryption of a short secret
pub fn rsa_wrap(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let max = max_wrap_len(public_key);
    if plaintext.len() > max {
        return Err(HpcrError::RsaSizeExceeded {
            len: plaintext.len(),
            max,
        });
    }
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| HpcrError::CryptoFailure(e.to_string()))
}

pub fn rsa_unwrap(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    private_key
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| HpcrError::DecryptAuthenticity("RSA unwrap failed".into()))
}
