//! PEM parsing for RSA keys and X.509 certificates

use crate::encoding::sha256;
use crate::error::{HpcrError, Result};
use pkcs8::der::pem;
use pkcs8::spki;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::X509Certificate;
use zeroize::Zeroizing;

pub const LABEL_CERTIFICATE: &str = "CERTIFICATE";
pub const LABEL_PUBLIC_KEY: &str = "PUBLIC KEY";
pub const LABEL_RSA_PUBLIC_KEY: &str = "RSA PUBLIC KEY";
pub const LABEL_PRIVATE_KEY: &str = "PRIVATE KEY";
pub const LABEL_RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";

/// Smallest modulus accepted for wrapping or signing
pub const MIN_RSA_BITS: usize = 2048;

/// PKCS#1 v1.5 encryption overhead in bytes
pub const PKCS1_V15_OVERHEAD: usize = 11;

/// Return the label of the first PEM block in `input`.
pub fn pem_label(input: &str) -> Result<String> {
    let trimmed = input.trim();
    pem::decode_label(trimmed.as_bytes())
        .map(str::to_owned)
        .map_err(|e| HpcrError::InvalidPem(e.to_string()))
}

/// Parse a PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) RSA key.
pub fn parse_private_key(input: &str) -> Result<RsaPrivateKey> {
    let trimmed = input.trim();
    let key = match pem_label(trimmed)?.as_str() {
        LABEL_RSA_PRIVATE_KEY => RsaPrivateKey::from_pkcs1_pem(trimmed)
            .map_err(|e| HpcrError::InvalidPem(e.to_string()))?,
        LABEL_PRIVATE_KEY => RsaPrivateKey::from_pkcs8_pem(trimmed).map_err(pkcs8_error)?,
        other => {
            return Err(HpcrError::UnsupportedKeyType(format!(
                "expected an RSA private key, found `{other}`"
            )))
        }
    };
    check_size(key.size())?;
    Ok(key)
}

/// Parse the first certificate in a PEM bundle.
pub fn parse_certificate_der(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let (_, block) =
        parse_x509_pem(trimmed.as_bytes()).map_err(|e| HpcrError::InvalidPem(e.to_string()))?;
    if block.label != LABEL_CERTIFICATE {
        return Err(HpcrError::InvalidPem(format!(
            "expected CERTIFICATE, found `{}`",
            block.label
        )));
    }
    block
        .parse_x509()
        .map_err(|e| HpcrError::InvalidPem(e.to_string()))?;
    Ok(block.contents)
}

pub fn with_certificate<T>(
    input: &str,
    f: impl FnOnce(&X509Certificate<'_>) -> Result<T>,
) -> Result<T> {
    let der = parse_certificate_der(input)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| HpcrError::InvalidPem(e.to_string()))?;
    f(&cert)
}

/// Public key embedded in an X.509 certificate.
pub fn certificate_public_key(input: &str) -> Result<RsaPublicKey> {
    with_certificate(input, |cert| {
        let key = RsaPublicKey::from_public_key_der(cert.public_key().raw).map_err(spki_error)?;
        check_size(key.size())?;
        Ok(key)
    })
}

/// Accepts a certificate, a PKIX public key or a PKCS#1 public key.
pub fn parse_public_key(input: &str) -> Result<RsaPublicKey> {
    let trimmed = input.trim();
    let key = match pem_label(trimmed)?.as_str() {
        LABEL_CERTIFICATE => return certificate_public_key(trimmed),
        LABEL_PUBLIC_KEY => RsaPublicKey::from_public_key_pem(trimmed).map_err(spki_error)?,
        LABEL_RSA_PUBLIC_KEY => RsaPublicKey::from_pkcs1_pem(trimmed)
            .map_err(|e| HpcrError::InvalidPem(e.to_string()))?,
        other => {
            return Err(HpcrError::InvalidPem(format!(
                "expected a certificate or public key, found `{other}`"
            )))
        }
    };
    check_size(key.size())?;
    Ok(key)
}

pub fn public_key_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|_| HpcrError::InternalError)
}

pub fn public_key_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| HpcrError::InternalError)
}

pub fn private_key_pkcs8_pem(key: &RsaPrivateKey) -> Result<Zeroizing<String>> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| HpcrError::InternalError)
}

/// SHA-256 over the certificate DER.
pub fn cert_fingerprint(input: &str) -> Result<[u8; 32]> {
    Ok(sha256(parse_certificate_der(input)?))
}

/// SHA-256 over the PKIX DER of the public half of a private key.
pub fn private_key_fingerprint(input: &str) -> Result<[u8; 32]> {
    let key = parse_private_key(input)?;
    Ok(sha256(public_key_der(&key.to_public_key())?))
}

/// Largest plaintext that PKCS#1 v1.5 encryption accepts under `key`
pub fn max_wrap_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(PKCS1_V15_OVERHEAD)
}

/// Only a non-RSA algorithm identifier is an unsupported key; anything
/// else failed to decode.
fn spki_error(e: spki::Error) -> HpcrError {
    match e {
        spki::Error::OidUnknown { .. } => HpcrError::UnsupportedKeyType(e.to_string()),
        other => HpcrError::InvalidPem(other.to_string()),
    }
}

fn pkcs8_error(e: pkcs8::Error) -> HpcrError {
    match e {
        pkcs8::Error::PublicKey(inner) => spki_error(inner),
        other => HpcrError::InvalidPem(other.to_string()),
    }
}

fn check_size(bytes: usize) -> Result<()> {
    if bytes * 8 < MIN_RSA_BITS {
        return Err(HpcrError::UnsupportedKeyType(format!(
            "RSA modulus of {} bits is below {MIN_RSA_BITS}",
            bytes * 8
        )));
    }
    Ok(())
}
