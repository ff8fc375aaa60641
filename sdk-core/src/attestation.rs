//! Attestation record parsing
//!
//! The runtime emits either a plain checksum file or base64 of a gzip'd tar
//! whose `se-checksums.txt.enc` entry is another token wrapping the checksum
//! file.

use crate::{
    crypto::CryptoBackend,
    encoding,
    envelope::{operations::EnvelopeOps, Token},
    error::{HpcrError, Result},
};
use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::LazyLock;

/// Tar entry holding the encrypted checksum file
pub const CHECKSUMS_ENTRY: &str = "se-checksums.txt.enc";

const MAX_DEPTH: usize = 4;

static CHECKSUM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9a-f]+)\s+(\S+)\s*$").expect("checksum line regex is valid")
});

/// Map of path to hex checksum from an attestation record.
///
/// With `private_key_pem` the blob is decrypted first; it may be a token or
/// base64 of a token.
pub fn parse_attestation(
    backend: &dyn CryptoBackend,
    blob: &str,
    private_key_pem: Option<&str>,
) -> Result<BTreeMap<String, String>> {
    parse_at_depth(backend, blob, private_key_pem, 0)
}

fn parse_at_depth(
    backend: &dyn CryptoBackend,
    blob: &str,
    private_key_pem: Option<&str>,
    depth: usize,
) -> Result<BTreeMap<String, String>> {
    if depth >= MAX_DEPTH {
        return Err(HpcrError::UnrecognizedAttestation);
    }

    let payload = match private_key_pem {
        Some(key) => {
            let token = locate_token(blob)?;
            let plain = EnvelopeOps::decrypt(backend, key, &token)?;
            String::from_utf8(plain.to_vec()).map_err(|_| HpcrError::UnrecognizedAttestation)?
        }
        None => blob.to_string(),
    };
    let payload = payload.trim();

    let checksums = parse_checksums(payload);
    if !checksums.is_empty() {
        tracing::debug!(entries = checksums.len(), depth, "attestation checksums parsed");
        return Ok(checksums);
    }

    let entries = untar(payload)?;
    tracing::debug!(entries = entries.len(), depth, "attestation archive unpacked");
    match entries.get(CHECKSUMS_ENTRY) {
        Some(inner) => parse_at_depth(backend, inner, private_key_pem, depth + 1),
        None => Err(HpcrError::UnrecognizedAttestation),
    }
}

/// The blob itself when it is a token, otherwise its base64 decoding.
fn locate_token(blob: &str) -> Result<String> {
    let blob = blob.trim();
    if Token::is_token(blob) {
        return Ok(blob.to_string());
    }
    let decoded = encoding::base64_decode(blob).map_err(|_| HpcrError::MalformedToken)?;
    let decoded = String::from_utf8(decoded).map_err(|_| HpcrError::MalformedToken)?;
    let decoded = decoded.trim();
    if Token::is_token(decoded) {
        Ok(decoded.to_string())
    } else {
        Err(HpcrError::MalformedToken)
    }
}

/// `<hex> <path>` lines; anything else is skipped.
pub fn parse_checksums(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| CHECKSUM_LINE.captures(line))
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Regular-file entries of base64 tar.gz, keyed by file name.
fn untar(payload: &str) -> Result<BTreeMap<String, String>> {
    let bytes = encoding::base64_decode(payload).map_err(|_| HpcrError::UnrecognizedAttestation)?;
    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let mut entries = BTreeMap::new();

    let unrecognized = |_| HpcrError::UnrecognizedAttestation;
    for entry in archive.entries().map_err(unrecognized)? {
        let mut entry = entry.map_err(unrecognized)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(unrecognized)?
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let mut content = String::new();
        entry.read_to_string(&mut content).map_err(unrecognized)?;
        if let Some(name) = name {
            entries.insert(name, content);
        }
    }
    Ok(entries)
}
