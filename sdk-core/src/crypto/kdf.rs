//! Key Derivation Functions

use crate::error::{HpcrError, Result};
use hmac::Hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Fixed OpenSSL `enc -pbkdf2` parameters; never negotiated
pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;

/// AES-256 key and CBC IV derived from a password and salt
pub struct DerivedKey {
    pub key: Zeroizing<[u8; AES_KEY_LEN]>,
    pub iv: [u8; AES_IV_LEN],
}

/// PBKDF2-HMAC-SHA256 producing 48 bytes, split 32 | 16
pub fn derive_key_iv(password: &[u8], salt: &[u8]) -> Result<DerivedKey> {
    let mut output = Zeroizing::new([0u8; AES_KEY_LEN + AES_IV_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, PBKDF2_ITERATIONS, output.as_mut_slice())
        .map_err(|_| HpcrError::InternalError)?;

    let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
    key.copy_from_slice(&output[..AES_KEY_LEN]);
    let mut iv = [0u8; AES_IV_LEN];
    iv.copy_from_slice(&output[AES_KEY_LEN..]);

    Ok(DerivedKey { key, iv })
}
