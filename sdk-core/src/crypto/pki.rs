//! CSR creation, CA-signed leaf issuance and certificate validity

use crate::crypto::keys::{parse_private_key, private_key_pkcs8_pem, with_certificate};
use crate::encoding::random_bytes;
use crate::error::{HpcrError, Result};
use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType, IsCa, KeyPair,
    SerialNumber,
};
use serde::{Deserialize, Serialize};

/// OID 1.2.840.113549.1.9.1 (PKCS#9 emailAddress)
const OID_EMAIL_ADDRESS: [u64; 7] = [1, 2, 840, 113549, 1, 9, 1];

/// Subject fields of a certificate signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrSubject {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

impl CsrSubject {
    /// `(openssl short name, value)` pairs in subject order
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("C", &self.country),
            ("ST", &self.state),
            ("L", &self.location),
            ("O", &self.org),
            ("OU", &self.unit),
            ("CN", &self.domain),
            ("emailAddress", &self.mail),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }

    /// `/C=US/ST=NY/...` form accepted by `openssl req -subj`
    pub fn to_openssl_subject(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.fields() {
            out.push('/');
            out.push_str(name);
            out.push('=');
            for ch in value.chars() {
                if matches!(ch, '/' | '+' | '\\') {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for (name, value) in self.fields() {
            let ty = match name {
                "C" => DnType::CountryName,
                "ST" => DnType::StateOrProvinceName,
                "L" => DnType::LocalityName,
                "O" => DnType::OrganizationName,
                "OU" => DnType::OrganizationalUnitName,
                "CN" => DnType::CommonName,
                _ => DnType::CustomDnType(OID_EMAIL_ADDRESS.to_vec()),
            };
            dn.push(ty, value);
        }
        dn
    }
}

/// Validity window of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_left: i64,
}

/// Read the validity window of a PEM certificate.
pub fn certificate_validity(cert_pem: &str) -> Result<CertificateValidity> {
    let (not_before, not_after) = with_certificate(cert_pem, |cert| {
        let validity = cert.validity();
        Ok((validity.not_before.timestamp(), validity.not_after.timestamp()))
    })?;
    let not_before = DateTime::from_timestamp(not_before, 0)
        .ok_or_else(|| HpcrError::InvalidPem("not-before out of range".into()))?;
    let not_after = DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| HpcrError::InvalidPem("not-after out of range".into()))?;
    Ok(CertificateValidity {
        not_before,
        not_after,
        days_left: (not_after - Utc::now()).num_days(),
    })
}

/// Fail unless `now` lies inside the certificate's validity window.
pub fn check_validity_at(cert_pem: &str, now: DateTime<Utc>) -> Result<CertificateValidity> {
    let mut validity = certificate_validity(cert_pem)?;
    if now < validity.not_before {
        return Err(HpcrError::CertificateNotValid(format!(
            "not valid before {}",
            validity.not_before
        )));
    }
    if now > validity.not_after {
        return Err(HpcrError::CertificateNotValid(format!(
            "expired at {}",
            validity.not_after
        )));
    }
    validity.days_left = (validity.not_after - now).num_days();
    Ok(validity)
}

fn key_pair(private_key_pem: &str) -> Result<KeyPair> {
    // ring only loads RSA keys from PKCS#8
    let key = parse_private_key(private_key_pem)?;
    let pkcs8 = private_key_pkcs8_pem(&key)?;
    KeyPair::from_pem(&pkcs8).map_err(|e| HpcrError::UnsupportedKeyType(e.to_string()))
}

/// PEM CSR for `subject`, signed with `private_key_pem`.
pub fn csr_new(private_key_pem: &str, subject: &CsrSubject) -> Result<String> {
    let key = key_pair(private_key_pem)?;
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params
        .serialize_request(&key)
        .and_then(|csr| csr.pem())
        .map_err(|e| HpcrError::CryptoFailure(e.to_string()))
}

/// Issue a non-CA leaf for `csr_pem`, valid for `validity_days` from now.
pub fn cert_sign(
    csr_pem: &str,
    ca_cert_pem: &str,
    ca_key_pem: &str,
    validity_days: u32,
) -> Result<String> {
    if validity_days == 0 {
        return Err(HpcrError::InvalidInput("validity must be at least one day".into()));
    }
    let ca_key = key_pair(ca_key_pem)?;
    let ca_params = CertificateParams::from_ca_cert_pem(ca_cert_pem.trim())
        .map_err(|e| HpcrError::InvalidPem(e.to_string()))?;
    let issuer = ca_params
        .self_signed(&ca_key)
        .map_err(|e| HpcrError::CryptoFailure(e.to_string()))?;

    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem.trim())
        .map_err(|e| HpcrError::InvalidPem(e.to_string()))?;
    let now = time::OffsetDateTime::now_utc();
    let mut serial = random_bytes(16)?;
    serial[0] &= 0x7f;
    csr.params.is_ca = IsCa::ExplicitNoCa;
    csr.params.not_before = now;
    csr.params.not_after = now + time::Duration::days(i64::from(validity_days));
    csr.params.serial_number = Some(SerialNumber::from_slice(&serial));

    let leaf = csr
        .signed_by(&issuer, &ca_key)
        .map_err(|e| HpcrError::CryptoFailure(e.to_string()))?;
    Ok(leaf.pem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{certificate_public_key, parse_private_key};
    use crate::test_support::{fixture_ca, fixture_cert, fixture_key};
    use chrono::Duration;
    use x509_parser::prelude::*;

    fn subject() -> CsrSubject {
        CsrSubject {
            country: Some("DE".into()),
            state: Some("Baden-Wurttemberg".into()),
            location: Some("Boeblingen".into()),
            org: Some("Example".into()),
            unit: Some("Confidential".into()),
            domain: Some("contract.example.com".into()),
            mail: Some("ops@example.com".into()),
        }
    }

    #[test]
    fn test_openssl_subject_escapes() {
        let s = CsrSubject {
            org: Some("A/B".into()),
            domain: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(s.to_openssl_subject(), "/O=A\\/B/CN=x");
        assert_eq!(CsrSubject::default().to_openssl_subject(), "/");
    }

    #[test]
    fn test_csr_carries_subject() {
        let csr_pem = csr_new(&fixture_key().private_pem, &subject()).unwrap();
        assert!(csr_pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

        let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes()).unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&pem.contents).unwrap();
        let subject = csr.certification_request_info.subject.to_string();
        assert!(subject.contains("CN=contract.example.com"), "{subject}");
        assert!(subject.contains("C=DE"), "{subject}");
    }

    #[test]
    fn test_cert_sign_issues_leaf() {
        let ca = fixture_ca();
        let csr_pem = csr_new(&fixture_key().private_pem, &subject()).unwrap();
        let leaf_pem = cert_sign(&csr_pem, &ca.cert_pem, &ca.key.private_pem, 30).unwrap();

        let leaf_key = certificate_public_key(&leaf_pem).unwrap();
        let signer = parse_private_key(&fixture_key().private_pem).unwrap().to_public_key();
        assert_eq!(leaf_key, signer);

        let validity = certificate_validity(&leaf_pem).unwrap();
        assert!((29..=30).contains(&validity.days_left));

        crate::crypto::keys::with_certificate(&leaf_pem, |cert| {
            assert!(!cert.is_ca());
            assert!(cert.issuer().to_string().contains("CN=HPCR Test CA"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cert_sign_rejects_zero_days() {
        let ca = fixture_ca();
        let csr_pem = csr_new(&fixture_key().private_pem, &subject()).unwrap();
        assert!(cert_sign(&csr_pem, &ca.cert_pem, &ca.key.private_pem, 0).is_err());
    }

    #[test]
    fn test_validity_window() {
        let cert = &fixture_cert().cert_pem;
        assert!(check_validity_at(cert, Utc::now()).is_ok());
        let err = check_validity_at(cert, Utc::now() + Duration::days(365 * 50)).unwrap_err();
        assert!(matches!(err, HpcrError::CertificateNotValid(_)));
        let err = check_validity_at(cert, Utc::now() - Duration::days(10)).unwrap_err();
        assert!(matches!(err, HpcrError::CertificateNotValid(_)));
    }
}
