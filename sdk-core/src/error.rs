//! HPCR error types

use thiserror::Error;

/// Coarse classification of an [`HpcrError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidPem,
    UnsupportedKeyType,
    MalformedToken,
    CryptoFailure,
    CsrArgumentConflict,
    IoFailure,
    NetworkFailure,
    NoMatch,
    UnrecognizedAttestation,
    Internal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HpcrError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Contract is missing the `{0}` section")]
    MissingContractSection(&'static str),

    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Plaintext of {len} bytes exceeds RSA limit of {max} bytes")]
    RsaSizeExceeded { len: usize, max: usize },

    #[error("Malformed token")]
    MalformedToken,

    #[error("Decryption failed: {0}")]
    DecryptAuthenticity(String),

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    #[error("Exactly one of CSR subject or CSR PEM must be supplied")]
    CsrArgumentConflict,

    #[error("Certificate is not valid at the current time: {0}")]
    CertificateNotValid(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("OpenSSL subprocess failed: {0}")]
    SubprocessFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No version matches constraint `{0}`")]
    NoMatch(String),

    #[error("Unrecognized attestation record")]
    UnrecognizedAttestation,

    #[error("Entropy unavailable")]
    EntropyUnavailable,

    #[error("Internal error")]
    InternalError,
}

impl HpcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::MissingContractSection(_) => ErrorKind::InvalidInput,
            Self::CertificateNotValid(_) => ErrorKind::InvalidInput,
            Self::InvalidPem(_) => ErrorKind::InvalidPem,
            Self::UnsupportedKeyType(_) => ErrorKind::UnsupportedKeyType,
            Self::MalformedToken => ErrorKind::MalformedToken,
            Self::RsaSizeExceeded { .. }
            | Self::DecryptAuthenticity(_)
            | Self::SignatureMismatch
            | Self::CryptoFailure(_) => ErrorKind::CryptoFailure,
            Self::CsrArgumentConflict => ErrorKind::CsrArgumentConflict,
            Self::Io(_) | Self::SubprocessFailed(_) => ErrorKind::IoFailure,
            Self::Network(_) => ErrorKind::NetworkFailure,
            Self::NoMatch(_) => ErrorKind::NoMatch,
            Self::UnrecognizedAttestation => ErrorKind::UnrecognizedAttestation,
            Self::EntropyUnavailable | Self::InternalError => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for HpcrError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HpcrError>;
