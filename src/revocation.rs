//! Revocation Engine — specification §4.7.
//!
//! OCSP is GET-only with a heuristic response classifier: the teacher's
//! `tls/ocsp.rs` builds and POSTs full ASN.1-encoded, nonce-bearing OCSP
//! requests and parses responses with `x509_ocsp`, but the GET-only,
//! signed-POST-free contract this engine implements answers a different,
//! explicitly narrower question. The heuristic (substring match plus the
//! `{00 01}`/`{00 02}`/`{00 03}` sentinel byte pairs) is kept and
//! documented as advisory rather than replaced with real ASN.1 decoding.
//!
//! CRL parsing keeps the teacher's real `x509-parser`-based
//! `parse_x509_crl` decode, grounded directly in
//! `tls/crl_cache.rs::parse_crl_data`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::buffer_pool::BufferPool;
use crate::config::HttpConfig;
use crate::crl_cache::CrlCache;
use crate::error::{ChainError, Result};
use crate::types::{Certificate, CheckStatus};

const MAX_CRL_BODY_BYTES: usize = 50 * 1024 * 1024;

/// For each non-root certificate in `chain`, looks up OCSP and CRL
/// status and renders the stable, substring-tested text report.
///
/// `cancel` is checked before each certificate's lookups; a cancelled
/// token returns `ChainError::Cancelled` immediately rather than
/// finishing the remaining OCSP/CRL requests.
pub async fn check_revocation_status(
    chain: &[Certificate],
    http: &HttpConfig,
    crl_cache: &CrlCache,
    buffer_pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut report = String::from("Revocation Status Check:\n");

    if chain.len() <= 1 {
        return Ok(report); // only a root (or single-cert chain): nothing to check
    }

    for (i, cert) in chain[..chain.len() - 1].iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        let issuer = chain.get(i + 1);
        let _ = writeln!(report, "Certificate {}: {}", i + 1, cert.subject_cn);

        match check_ocsp(cert, http, buffer_pool, cancel).await {
            Ok(CheckStatus::NotAvailable) => {
                report.push_str("  OCSP Status: Not Available\n");
            }
            Ok(status) => {
                let _ = writeln!(report, "  OCSP Status: {}", status.as_label());
            }
            Err(ChainError::Cancelled) => return Err(ChainError::Cancelled),
            Err(e) => {
                let _ = writeln!(report, "  OCSP Error: {e}");
            }
        }

        match check_crl(cert, issuer, http, crl_cache, buffer_pool, cancel).await {
            Ok(CheckStatus::NotAvailable) => {
                report.push_str("  CRL Status:  Not Available\n");
            }
            Ok(status) => {
                let _ = writeln!(report, "  CRL Status:  {}", status.as_label());
            }
            Err(ChainError::Cancelled) => return Err(ChainError::Cancelled),
            Err(e) => {
                let _ = writeln!(report, "  CRL Error: {e}");
            }
        }
    }

    Ok(report)
}

async fn check_ocsp(
    cert: &Certificate,
    http: &HttpConfig,
    buffer_pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<CheckStatus> {
    let Some(url) = cert.ocsp_urls.first() else {
        return Ok(CheckStatus::NotAvailable);
    };

    let client = http.client()?;
    let request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, http.get_user_agent())
        .send();

    let response = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ChainError::Cancelled),
        result = request => result,
    };

    let response = match response {
        Ok(r) => r,
        Err(e) => return Ok(CheckStatus::Error(format!("OCSP request to {url} failed: {e}"))),
    };

    if !response.status().is_success() {
        return Ok(CheckStatus::Error(format!(
            "OCSP responder {url} returned status {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| crate::error::ChainError::Network(format!("reading OCSP response: {e}")))?;

    let owned = {
        let mut buf = buffer_pool.get();
        buf.write(&body);
        let owned = buf.bytes().to_vec();
        buf.reset();
        owned
    };

    Ok(parse_ocsp_response(&owned))
}

/// Heuristic OCSP response classifier (see module docs): lowercase
/// substring match on the body, falling back to the `{00 01}` /
/// `{00 02}` / `{00 03}` sentinel byte pairs. Advisory only — not a
/// substitute for ASN.1-level OCSP response parsing.
#[must_use]
pub fn parse_ocsp_response(bytes: &[u8]) -> CheckStatus {
    let lowered = String::from_utf8_lossy(bytes).to_lowercase();
    if lowered.contains("good") {
        return CheckStatus::Good;
    }
    if lowered.contains("revoked") {
        return CheckStatus::Revoked;
    }
    if lowered.contains("unknown") {
        return CheckStatus::Unknown;
    }

    for window in bytes.windows(2) {
        match window {
            [0x00, 0x01] => return CheckStatus::Good,
            [0x00, 0x02] => return CheckStatus::Revoked,
            [0x00, 0x03] => return CheckStatus::Unknown,
            _ => {}
        }
    }

    CheckStatus::Unknown
}

async fn check_crl(
    cert: &Certificate,
    issuer: Option<&Certificate>,
    http: &HttpConfig,
    crl_cache: &CrlCache,
    buffer_pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<CheckStatus> {
    let Some(url) = cert.crl_urls.first() else {
        return Ok(CheckStatus::NotAvailable);
    };

    let bytes = if let Some(cached) = crl_cache.get(url) {
        cached
    } else {
        let client = http.client()?;
        let request = client
            .get(url)
            .header(reqwest::header::USER_AGENT, http.get_user_agent())
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ChainError::Cancelled),
            result = request => result,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return Ok(CheckStatus::Error(format!("CRL request to {url} failed: {e}"))),
        };
        if !response.status().is_success() {
            return Ok(CheckStatus::Error(format!(
                "CRL distribution point {url} returned status {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| crate::error::ChainError::Network(format!("reading CRL body from {url}: {e}")))?;
        if body.len() > MAX_CRL_BODY_BYTES {
            return Ok(CheckStatus::Error(format!("CRL body from {url} exceeded size limit")));
        }
        let mut pooled = buffer_pool.get();
        pooled.write(&body);
        let owned = pooled.bytes().to_vec();
        pooled.reset();
        owned
    };

    match parse_crl_response(&bytes, &cert.serial, issuer) {
        Ok(status) => {
            if let Some(next_update) = crl_next_update(&bytes) {
                let _ = crl_cache.set(url, bytes.clone(), next_update);
            }
            Ok(status)
        }
        Err(e) => Ok(CheckStatus::Error(e.to_string())),
    }
}

/// Best-effort extraction of a CRL's `next_update` field, used to
/// populate the CRL cache's TTL after a fresh fetch. Tries each "CRL"
/// PEM block, then the raw blob as DER; returns `None` rather than
/// failing the revocation check if no block parses.
fn crl_next_update(bytes: &[u8]) -> Option<std::time::SystemTime> {
    for pem in x509_parser::pem::Pem::iter_from_buffer(bytes) {
        let Ok(pem) = pem else { continue };
        if !pem.label.contains("CRL") {
            continue;
        }
        if let Ok((_, crl)) = x509_parser::prelude::parse_x509_crl(&pem.contents) {
            if let Some(next_update) = crl.next_update() {
                return Some(std::time::UNIX_EPOCH + Duration::from_secs(next_update.timestamp().max(0) as u64));
            }
        }
    }
    if let Ok((_, crl)) = x509_parser::prelude::parse_x509_crl(bytes) {
        if let Some(next_update) = crl.next_update() {
            return Some(std::time::UNIX_EPOCH + Duration::from_secs(next_update.timestamp().max(0) as u64));
        }
    }
    None
}

/// Walks PEM blocks whose type contains "CRL"; for each, decodes the DER
/// body and scans revoked-entries for a matching serial. Falls back to
/// treating the whole blob as raw DER if no PEM block matches or parses.
pub fn parse_crl_response(
    bytes: &[u8],
    serial: &[u8],
    issuer: Option<&Certificate>,
) -> Result<CheckStatus> {
    if bytes.is_empty() {
        return Err(crate::error::ChainError::RevocationLookup("empty CRL bytes".to_string()));
    }
    if serial.is_empty() {
        return Err(crate::error::ChainError::RevocationLookup("empty certificate serial".to_string()));
    }
    if issuer.is_none() {
        return Err(crate::error::ChainError::RevocationLookup("missing issuer certificate".to_string()));
    }

    let mut last_error = None;

    for pem in x509_parser::pem::Pem::iter_from_buffer(bytes) {
        let Ok(pem) = pem else { continue };
        if !pem.label.contains("CRL") {
            continue;
        }
        match scan_crl_der(&pem.contents, serial) {
            Ok(found) => return Ok(if found { CheckStatus::Revoked } else { CheckStatus::Good }),
            Err(e) => last_error = Some(e),
        }
    }

    match scan_crl_der(bytes, serial) {
        Ok(found) => Ok(if found { CheckStatus::Revoked } else { CheckStatus::Good }),
        Err(e) => Ok(CheckStatus::Error(last_error.unwrap_or(e).to_string())),
    }
}

fn scan_crl_der(der: &[u8], serial: &[u8]) -> Result<bool> {
    let (_, crl) = x509_parser::prelude::parse_x509_crl(der)
        .map_err(|e| crate::error::ChainError::RevocationLookup(format!("CRL parse failed: {e}")))?;
    Ok(crl
        .iter_revoked_certificates()
        .any(|entry| entry.user_certificate.to_bytes_be() == serial))
}

/// Parses the stable text report back into a per-serial structured
/// status map, so downstream formatters never re-parse free text
/// themselves. Serials absent from the report default to "unknown".
#[must_use]
pub fn aggregate_report(report: &str, chain: &[Certificate]) -> HashMap<String, CheckStatus> {
    let mut statuses = HashMap::new();

    for (i, cert) in chain.iter().enumerate().take(chain.len().saturating_sub(1)) {
        let marker = format!("Certificate {}:", i + 1);
        let Some(block_start) = report.find(&marker) else {
            statuses.insert(cert.serial_hex(), CheckStatus::Unknown);
            continue;
        };
        let block_end = report[block_start..]
            .find("\nCertificate")
            .map(|rel| block_start + rel)
            .unwrap_or(report.len());
        let block = &report[block_start..block_end];

        let status = classify_block(block);
        statuses.insert(cert.serial_hex(), status);
    }

    statuses
}

fn classify_block(block: &str) -> CheckStatus {
    let revoked = block.contains("Revoked");
    let good = block.contains("Good");
    if revoked {
        CheckStatus::Revoked
    } else if good {
        CheckStatus::Good
    } else {
        CheckStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_matches_substring_good() {
        assert_eq!(parse_ocsp_response(b"status: good"), CheckStatus::Good);
    }

    #[test]
    fn heuristic_matches_substring_revoked() {
        assert_eq!(parse_ocsp_response(b"CERT REVOKED"), CheckStatus::Revoked);
    }

    #[test]
    fn heuristic_falls_back_to_magic_bytes() {
        assert_eq!(parse_ocsp_response(&[0xAA, 0x00, 0x02, 0xBB]), CheckStatus::Revoked);
    }

    #[test]
    fn heuristic_defaults_to_unknown() {
        assert_eq!(parse_ocsp_response(b"\xFF\xFF\xFF"), CheckStatus::Unknown);
    }

    #[test]
    fn crl_response_rejects_empty_bytes() {
        assert!(parse_crl_response(&[], &[1], None).is_err());
    }

    #[test]
    fn crl_response_rejects_missing_issuer() {
        assert!(parse_crl_response(&[1, 2, 3], &[1], None).is_err());
    }

    #[test]
    fn aggregate_report_defaults_absent_serial_to_unknown() {
        let report = "Revocation Status Check:\n".to_string();
        let cert = Certificate {
            subject_cn: "leaf".to_string(),
            issuer_cn: "ca".to_string(),
            serial: vec![0x01],
            not_before: std::time::SystemTime::now(),
            not_after: std::time::SystemTime::now(),
            signature_algorithm: "x".to_string(),
            public_key_algorithm: "x".to_string(),
            key_size: None,
            is_ca: false,
            der: vec![1, 2, 3],
            aia_urls: Vec::new(),
            ocsp_urls: Vec::new(),
            crl_urls: Vec::new(),
        };
        let root = Certificate { is_ca: true, der: vec![9, 9], ..cert.clone() };
        let statuses = aggregate_report(&report, &[cert.clone(), root]);
        assert_eq!(statuses.get(&cert.serial_hex()), Some(&CheckStatus::Unknown));
    }

    #[tokio::test]
    async fn cancelled_token_returns_promptly_without_network_calls() {
        let cert = Certificate {
            subject_cn: "leaf".to_string(),
            issuer_cn: "ca".to_string(),
            serial: vec![0x01],
            not_before: std::time::SystemTime::now(),
            not_after: std::time::SystemTime::now(),
            signature_algorithm: "x".to_string(),
            public_key_algorithm: "x".to_string(),
            key_size: None,
            is_ca: false,
            der: vec![1, 2, 3],
            aia_urls: Vec::new(),
            ocsp_urls: vec!["http://ocsp.example.invalid".to_string()],
            crl_urls: Vec::new(),
        };
        let root = Certificate { is_ca: true, der: vec![9, 9], ..cert.clone() };

        let http = HttpConfig::new();
        let crl_cache = CrlCache::default();
        let buffer_pool = BufferPool::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = check_revocation_status(&[cert, root], &http, &crl_cache, &buffer_pool, &cancel).await;
        assert!(matches!(result, Err(ChainError::Cancelled)));
    }
}
