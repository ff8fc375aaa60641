//! HPCR Contract SDK Core Library
//!
//! Builds and consumes Hyper Protect contract artifacts: encrypted tokens,
//! signed contracts and attestation records, plus version selection over
//! image and certificate catalogs.

pub mod api;
pub mod archive;
pub mod attestation;
pub mod config;
pub mod contract;
pub mod crypto;
pub mod download;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod version;

#[cfg(test)]
mod test_support;

// Re-exports
pub use api::{Hpcr, Rendered};
pub use config::{BackendChoice, HpcrConfig, Platform};
pub use contract::{ContractOps, CsrInput, DecryptedContract, SignedContract};
pub use crypto::{CertificateValidity, CryptoBackend, CsrSubject, NativeBackend, OpensslBackend};
pub use envelope::{operations::EnvelopeOps, Token};
pub use error::{ErrorKind, HpcrError, Result};
pub use version::{SelectedCertificate, SelectedImage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
