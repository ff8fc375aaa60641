//! OpenSSL-compatible `Salted__` framing over AES-256-CBC
//!
//! Layout, bit-for-bit what `openssl enc -aes-256-cbc -pbkdf2 -md sha256
//! -iter 10000` writes:
//!
//! ```text
//! [ "Salted__" (8) ][ salt (8) ][ AES-256-CBC(PKCS#7(plaintext)) ]
//! ```

use crate::crypto::kdf::derive_key_iv;
use crate::encoding::secure_random;
use crate::error::{HpcrError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const SALTED_MAGIC: &[u8; 8] = b"Salted__";
pub const SALT_LEN: usize = 8;
pub const HEADER_LEN: usize = SALTED_MAGIC.len() + SALT_LEN;
pub const BLOCK_LEN: usize = 16;

/// Split a framed buffer into `(salt, ciphertext)`, rejecting a wrong magic.
pub fn split_frame(framed: &[u8]) -> Result<(&[u8], &[u8])> {
    if framed.len() < HEADER_LEN || &framed[..SALTED_MAGIC.len()] != SALTED_MAGIC {
        return Err(HpcrError::DecryptAuthenticity("missing Salted__ header".into()));
    }
    let body = &framed[HEADER_LEN..];
    if body.is_empty() || body.len() % BLOCK_LEN != 0 {
        return Err(HpcrError::DecryptAuthenticity(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
            body.len()
        )));
    }
    Ok((&framed[SALTED_MAGIC.len()..HEADER_LEN], body))
}

pub fn frame(salt: &[u8; SALT_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(SALTED_MAGIC);
    out.extend_from_slice(salt);
    out.extend_from_slice(ciphertext);
    out
}

/// Encrypt with a fresh random salt
pub fn encrypt(password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    encrypt_with_salt(password, &salt, plaintext)
}

pub fn encrypt_with_salt(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let derived = derive_key_iv(password, salt)?;
    let cipher = Aes256CbcEnc::new_from_slices(&derived.key[..], &derived.iv)
        .map_err(|_| HpcrError::InternalError)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok(frame(salt, &ciphertext))
}

pub fn decrypt(password: &[u8], framed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let (salt, ciphertext) = split_frame(framed)?;
    let derived = derive_key_iv(password, salt)?;
    let cipher = Aes256CbcDec::new_from_slices(&derived.key[..], &derived.iv)
        .map_err(|_| HpcrError::InternalError)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| HpcrError::DecryptAuthenticity("bad padding".into()))
}
