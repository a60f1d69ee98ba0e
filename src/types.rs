//! Core data model: `Certificate`, revocation status records, and the
//! visualization projection. Mirrors the field set the teacher crate
//! carries on `ParsedCertificate` (`tls/types.rs`), trimmed and renamed to
//! the entity names the specification uses.

use std::time::SystemTime;

/// An immutable, already-decoded X.509 certificate.
///
/// Constructed once by the codec and never mutated afterwards; every
/// field here is read-only from the caller's perspective.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub subject_cn: String,
    pub issuer_cn: String,
    /// Arbitrary-precision serial number, big-endian, no leading sign byte
    /// stripped.
    pub serial: Vec<u8>,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub key_size: Option<u32>,
    pub is_ca: bool,
    pub der: Vec<u8>,
    pub aia_urls: Vec<String>,
    pub ocsp_urls: Vec<String>,
    pub crl_urls: Vec<String>,
}

impl Certificate {
    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    /// First AIA (CA Issuers) URL, if any — what the chain builder follows.
    #[must_use]
    pub fn first_aia_url(&self) -> Option<&str> {
        self.aia_urls.first().map(String::as_str)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}
impl Eq for Certificate {}

/// Role of a certificate within a resolved chain, used by the
/// visualization formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRole {
    SelfSigned,
    EndEntity,
    Intermediate,
    Root,
}

impl CertificateRole {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CertificateRole::SelfSigned => "Self-Signed Certificate",
            CertificateRole::EndEntity => "End-Entity (Server/Leaf) Certificate",
            CertificateRole::Intermediate => "Intermediate CA Certificate",
            CertificateRole::Root => "Root CA Certificate",
        }
    }
}

/// Revocation status of a single check (OCSP or CRL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Good,
    Revoked,
    Unknown,
    NotAvailable,
    Error(String),
}

impl CheckStatus {
    #[must_use]
    pub fn as_label(&self) -> String {
        match self {
            CheckStatus::Good => "Good".to_string(),
            CheckStatus::Revoked => "Revoked".to_string(),
            CheckStatus::Unknown => "Unknown".to_string(),
            CheckStatus::NotAvailable => "Not Available".to_string(),
            CheckStatus::Error(e) => e.clone(),
        }
    }
}

/// Per-certificate revocation record aggregated from the text report.
#[derive(Debug, Clone)]
pub struct RevocationStatus {
    pub ocsp_status: CheckStatus,
    pub crl_status: CheckStatus,
    pub serial_hex: String,
}

impl RevocationStatus {
    /// Collapse OCSP+CRL into the single-icon status visualization needs:
    /// revoked beats unknown beats good.
    #[must_use]
    pub fn aggregate(&self) -> CheckStatus {
        if matches!(self.ocsp_status, CheckStatus::Revoked)
            || matches!(self.crl_status, CheckStatus::Revoked)
        {
            CheckStatus::Revoked
        } else if matches!(self.ocsp_status, CheckStatus::Good)
            || matches!(self.crl_status, CheckStatus::Good)
        {
            CheckStatus::Good
        } else {
            CheckStatus::Unknown
        }
    }
}

/// Per-certificate projection consumed by the visualization formatters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VisualizationRecord {
    pub index: usize,
    pub role: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub key_size: Option<u32>,
    pub not_before: String,
    pub not_after: String,
    pub is_ca: bool,
    pub revocation_status: String,
}
