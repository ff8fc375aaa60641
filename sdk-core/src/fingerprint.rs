//! Resource identifiers and content-change hashes

use crate::crypto::CryptoBackend;
use crate::encoding;
use crate::error::Result;

/// Random UUIDv4
pub fn id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `hex(sha256(cert_fp || key_fp || payload))`, where `key_fp` is empty when
/// no signing key is given. Stable for identical inputs; the rendered
/// artifacts themselves are not.
pub fn content_hash(
    backend: &dyn CryptoBackend,
    payload: &[u8],
    recipient_cert_pem: &str,
    signing_key_pem: Option<&str>,
) -> Result<String> {
    let cert_fp = backend.cert_fingerprint(recipient_cert_pem)?;
    let key_fp = signing_key_pem
        .map(|key| backend.private_key_fingerprint(key))
        .transpose()?;
    let key_fp = key_fp.as_ref().map(|fp| fp.as_slice()).unwrap_or_default();

    Ok(encoding::sha256_hex(encoding::concat(&[&cert_fp[..], key_fp, payload])))
}
