//! Visualization Formatters — specification §4.8.
//!
//! Grounded in the teacher's `tls/builder/responses.rs`, which already
//! demonstrates the house taste for a rich, enum-tagged structured report
//! type living alongside a human-readable string renderer.

use std::collections::HashMap;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::revocation::aggregate_report;
use crate::types::{Certificate, CertificateRole, CheckStatus, VisualizationRecord};

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

fn role_for(index: usize, chain_len: usize) -> CertificateRole {
    if chain_len == 1 {
        CertificateRole::SelfSigned
    } else if index == 0 {
        CertificateRole::EndEntity
    } else if index == chain_len - 1 {
        CertificateRole::Root
    } else {
        CertificateRole::Intermediate
    }
}

fn icon_for(status: &CheckStatus) -> &'static str {
    match status {
        CheckStatus::Good => "good",
        CheckStatus::Revoked => "revoked",
        CheckStatus::Unknown | CheckStatus::NotAvailable | CheckStatus::Error(_) => "warning",
    }
}

fn statuses_for(chain: &[Certificate], revocation: &Result<String>) -> (HashMap<String, CheckStatus>, Option<String>) {
    match revocation {
        Ok(report) => (aggregate_report(report, chain), None),
        Err(e) => (HashMap::new(), Some(e.to_string())),
    }
}

fn format_date(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format("%Y-%m-%d").to_string()
}

fn format_key_size(public_key_algorithm: &str, key_size: Option<u32>) -> String {
    match (public_key_algorithm, key_size) {
        (alg, Some(size)) if alg == OID_RSA_ENCRYPTION => format!("RSA-{size}"),
        (alg, Some(size)) if alg == OID_EC_PUBLIC_KEY => format!("ECDSA-{size}"),
        (_, Some(size)) => format!("{size}-bit"),
        (_, None) => "Unknown".to_string(),
    }
}

/// Renders the chain as an ASCII tree, one line per certificate. If
/// `revocation` is an error, the first line is a warning and every
/// status renders as "warning" instead of aborting the render.
#[must_use]
pub fn render_ascii_tree(chain: &[Certificate], revocation: &Result<String>) -> String {
    let (statuses, warning) = statuses_for(chain, revocation);
    let mut out = String::new();

    if let Some(warning) = warning {
        out.push_str(&format!("Warning: Revocation status check failed: {warning}\n"));
    }

    let len = chain.len();
    for (i, cert) in chain.iter().enumerate() {
        let branch = if i == len - 1 { "└── " } else { "├── " };
        let status = statuses.get(&cert.serial_hex()).cloned().unwrap_or(CheckStatus::Unknown);
        let role = role_for(i, len);
        out.push_str(&format!(
            "{branch}[{}] {} ({})\n",
            icon_for(&status),
            cert.subject_cn,
            role.label()
        ));
    }
    out
}

/// Renders a Markdown table: `#, Role, Subject, Issuer, Valid Until, Key Size, Status`.
#[must_use]
pub fn render_table(chain: &[Certificate], revocation: &Result<String>) -> String {
    let (statuses, _warning) = statuses_for(chain, revocation);
    let len = chain.len();

    let mut out = String::new();
    out.push_str("| # | Role | Subject | Issuer | Valid Until | Key Size | Status |\n");
    out.push_str("|---|------|---------|--------|-------------|----------|--------|\n");

    for (i, cert) in chain.iter().enumerate() {
        let role = role_for(i, len);
        let status = statuses.get(&cert.serial_hex()).cloned().unwrap_or(CheckStatus::Unknown);
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            role.label(),
            cert.subject_cn,
            cert.issuer_cn,
            format_date(cert.not_after),
            format_key_size(&cert.public_key_algorithm, cert.key_size),
            status.as_label(),
        ));
    }
    out
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Relationship {
    pub from_index: usize,
    pub to_index: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationDocument {
    pub timestamp: String,
    pub chain_length: usize,
    pub certificates: Vec<VisualizationRecord>,
    pub relationships: Vec<Relationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_warning: Option<String>,
}

/// Builds the structured visualization record: `certificates.len() ==
/// chainLength` and `relationships.len() == chainLength - 1` (P11).
#[must_use]
pub fn to_visualization_document(chain: &[Certificate], revocation: &Result<String>) -> VisualizationDocument {
    let (statuses, warning) = statuses_for(chain, revocation);
    let len = chain.len();

    let certificates = chain
        .iter()
        .enumerate()
        .map(|(i, cert)| VisualizationRecord {
            index: i,
            role: role_for(i, len).label().to_string(),
            subject: cert.subject_cn.clone(),
            issuer: cert.issuer_cn.clone(),
            serial: cert.serial_hex(),
            signature_algorithm: cert.signature_algorithm.clone(),
            public_key_algorithm: cert.public_key_algorithm.clone(),
            key_size: cert.key_size,
            not_before: format_date(cert.not_before),
            not_after: format_date(cert.not_after),
            is_ca: cert.is_ca,
            revocation_status: statuses
                .get(&cert.serial_hex())
                .cloned()
                .unwrap_or(CheckStatus::Unknown)
                .as_label(),
        })
        .collect();

    let relationships = (0..len.saturating_sub(1))
        .map(|i| Relationship {
            from_index: i,
            to_index: i + 1,
            kind: "signed_by",
        })
        .collect();

    VisualizationDocument {
        timestamp: Utc::now().to_rfc3339(),
        chain_length: len,
        certificates,
        relationships,
        revocation_warning: warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cert(subject: &str, is_ca: bool) -> Certificate {
        Certificate {
            subject_cn: subject.to_string(),
            issuer_cn: "issuer".to_string(),
            serial: vec![1, 2, 3],
            not_before: SystemTime::now(),
            not_after: SystemTime::now(),
            signature_algorithm: "sha256WithRSAEncryption".to_string(),
            public_key_algorithm: OID_RSA_ENCRYPTION.to_string(),
            key_size: Some(2048),
            is_ca,
            der: subject.as_bytes().to_vec(),
            aia_urls: Vec::new(),
            ocsp_urls: Vec::new(),
            crl_urls: Vec::new(),
        }
    }

    #[test]
    fn ascii_tree_uses_corner_marker_for_last_entry() {
        let chain = vec![sample_cert("leaf", false), sample_cert("root", true)];
        let tree = render_ascii_tree(&chain, &Ok("Revocation Status Check:\n".to_string()));
        assert!(tree.contains("├── "));
        assert!(tree.contains("└── "));
    }

    #[test]
    fn failed_revocation_report_adds_warning_line() {
        let chain = vec![sample_cert("leaf", false)];
        let err = Err(crate::error::ChainError::RevocationLookup("timed out".to_string()));
        let tree = render_ascii_tree(&chain, &err);
        assert!(tree.starts_with("Warning: Revocation status check failed:"));
    }

    #[test]
    fn visualization_document_satisfies_p11() {
        let chain = vec![sample_cert("leaf", false), sample_cert("mid", true), sample_cert("root", true)];
        let doc = to_visualization_document(&chain, &Ok("Revocation Status Check:\n".to_string()));
        assert_eq!(doc.certificates.len(), doc.chain_length);
        assert_eq!(doc.relationships.len(), doc.chain_length - 1);
    }

    #[test]
    fn table_has_seven_columns() {
        let chain = vec![sample_cert("leaf", false)];
        let table = render_table(&chain, &Ok("Revocation Status Check:\n".to_string()));
        let header = table.lines().next().unwrap();
        assert_eq!(header.matches('|').count(), 8);
    }
}
