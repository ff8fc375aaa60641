//! Semantic-version selection over certificate maps and image catalogs

use crate::error::{HpcrError, Result};
use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const CANDIDATE_ARCHITECTURE: &str = "s390x";
pub const CANDIDATE_STATUS: &str = "available";
pub const CANDIDATE_VISIBILITY: &str = "public";

static IMAGE_OS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^hyper-protect-[\w-]+-s390x(-hpcr)?$").expect("image os regex is valid")
});

static IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ibm-hyper-protect-container-runtime-(\d+)-(\d+)-s390x-(\d+)$")
        .expect("image name regex is valid")
});

/// A version constraint: alternatives separated by `||`, each a
/// comma-separated comparator list. A bare version means an exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        let source = if source.is_empty() { "*" } else { source };

        let alternatives = source
            .split("||")
            .map(|alt| parse_alternative(alt.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn parse_alternative(alt: &str) -> Result<VersionReq> {
    let invalid = |e: semver::Error| HpcrError::InvalidInput(format!("constraint `{alt}`: {e}"));
    if alt.is_empty() {
        return Err(HpcrError::InvalidInput("empty constraint alternative".into()));
    }
    let comparators = alt
        .split(',')
        .map(|c| pin_bare(c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    VersionReq::parse(&comparators).map_err(invalid)
}

/// Give an operator-less comparator `=` so `1.0` means `1.0.x`, not caret.
/// Explicit wildcards (`1.x`, `*`) are left alone.
fn pin_bare(comparator: &str) -> String {
    let starts_with_digit = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
    let bare = comparator
        .strip_prefix('v')
        .filter(|rest| starts_with_digit(rest))
        .unwrap_or(comparator);
    let core = bare.split(['-', '+']).next().unwrap_or(bare);
    if starts_with_digit(bare) && !core.contains(['*', 'x', 'X']) {
        format!("={bare}")
    } else {
        bare.to_string()
    }
}

/// Semver with an optional leading `v`
pub fn parse_version(text: &str) -> std::result::Result<Version, semver::Error> {
    let text = text.trim();
    Version::parse(text.strip_prefix('v').unwrap_or(text))
}

/// Highest-versioned match; ties keep input order.
fn pick_latest<T>(
    mut candidates: Vec<(Version, T)>,
    constraint: &Constraint,
) -> Result<(Version, T)> {
    candidates.retain(|(version, _)| constraint.matches(version));
    candidates.sort_by(|(a, _), (b, _)| b.cmp(a));
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| HpcrError::NoMatch(constraint.as_str().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCertificate {
    pub version: String,
    pub certificate: String,
}

/// Pick the newest certificate whose version satisfies `constraint`.
///
/// Keys that are not valid semver are skipped with a warning.
pub fn select_certificate(
    certificates: &BTreeMap<String, String>,
    constraint: &str,
) -> Result<SelectedCertificate> {
    let constraint = Constraint::parse(constraint)?;
    let candidates = certificates
        .iter()
        .filter_map(|(key, pem)| match parse_version(key) {
            Ok(version) => Some((version, (key, pem))),
            Err(e) => {
                tracing::warn!(
                    version = %key,
                    error = %e,
                    "skipping certificate with invalid version"
                );
                None
            }
        })
        .collect();

    let (_, (version, certificate)) = pick_latest(candidates, &constraint)?;
    tracing::debug!(%version, constraint = constraint.as_str(), "certificate selected");
    Ok(SelectedCertificate {
        version: version.clone(),
        certificate: certificate.clone(),
    })
}

/// One entry of an image catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    pub architecture: String,
    pub id: String,
    pub name: String,
    pub os: String,
    pub status: String,
    pub visibility: String,
    pub checksum: String,
}

impl ImageRecord {
    /// Version encoded in the name, for HPCR images that may be deployed.
    pub fn candidate_version(&self) -> Option<Version> {
        if self.architecture != CANDIDATE_ARCHITECTURE
            || self.status != CANDIDATE_STATUS
            || self.visibility != CANDIDATE_VISIBILITY
            || !IMAGE_OS.is_match(&self.os)
        {
            return None;
        }
        let caps = IMAGE_NAME.captures(&self.name)?;
        let part = |i: usize| caps[i].parse::<u64>().ok();
        Some(Version::new(part(1)?, part(2)?, part(3)?))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Catalog {
    Bare(Vec<ImageRecord>),
    Listing { images: Vec<ImageRecord> },
}

pub fn parse_catalog(catalog_json: &str) -> Result<Vec<ImageRecord>> {
    let catalog: Catalog = serde_json::from_str(catalog_json)
        .map_err(|e| HpcrError::InvalidInput(format!("image catalog: {e}")))?;
    Ok(match catalog {
        Catalog::Bare(images) | Catalog::Listing { images } => images,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedImage {
    pub id: String,
    pub name: String,
    pub checksum: String,
    pub version: String,
}

/// Pick the newest HPCR image in the catalog satisfying `constraint`.
pub fn select_image(catalog_json: &str, constraint: &str) -> Result<SelectedImage> {
    let constraint = Constraint::parse(constraint)?;
    let candidates = parse_catalog(catalog_json)?
        .into_iter()
        .filter_map(|image| image.candidate_version().map(|v| (v, image)))
        .collect::<Vec<_>>();
    tracing::debug!(candidates = candidates.len(), "image candidates found");

    let (version, image) = pick_latest(candidates, &constraint)?;
    Ok(SelectedImage {
        id: image.id,
        name: image.name,
        checksum: image.checksum,
        version: version.to_string(),
    })
}
