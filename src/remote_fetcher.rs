//! Remote Chain Fetcher — specification §4.6.
//!
//! Grounded directly in the teacher's `tls/tls_manager.rs::create_connection`:
//! `TcpStream::connect` under `tokio::time::timeout`, a
//! `tokio_rustls::TlsConnector`, SNI set from the hostname. The
//! peer-verification-disabled dangerous verifier mirrors the same file's
//! `EnterpriseServerCertVerifier` construction
//! (`ClientConfig::builder().dangerous().with_custom_certificate_verifier(...)`),
//! here replaced with a verifier that always succeeds, since the purpose
//! is certificate collection, not validation.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::codec;
use crate::error::{ChainError, Result};
use crate::types::Certificate;

/// Minimum TLS protocol version to offer during the harvest handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    V12,
    V13,
}

impl TlsVersion {
    fn supported(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        match self {
            TlsVersion::V12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::V13 => &[&rustls::version::TLS13],
        }
    }
}

/// Accepts any server certificate chain: the handshake is performed only
/// to harvest the peer's certificates, never to validate them.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Opens a TLS connection to `hostname:port`, harvests the peer's
/// certificate chain, and returns a `Chain` initialized with it (leaf
/// first, in the order presented by the server) alongside the raw peer
/// certificate list.
///
/// `cancel` is raced against both the TCP connect and the TLS handshake;
/// a cancelled token returns `ChainError::Cancelled` instead of waiting
/// out either one.
pub async fn fetch_remote_chain(
    hostname: &str,
    port: u16,
    timeout: Duration,
    version: TlsVersion,
    cancel: &CancellationToken,
) -> Result<(Chain, Vec<Certificate>)> {
    let addr = format!("{hostname}:{port}");

    let tcp = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ChainError::Cancelled),
        result = tokio::time::timeout(timeout, TcpStream::connect(&addr)) => result,
    }
    .map_err(|_| ChainError::Network(format!("failed to connect to {addr}: timed out")))?
    .map_err(|e| ChainError::Network(format!("failed to connect to {addr}: {e}")))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(version.supported())
        .map_err(|e| ChainError::Internal(format!("invalid TLS protocol version set: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| ChainError::Network(format!("invalid server name {hostname}: {e}")))?;

    let tls_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ChainError::Cancelled),
        result = tokio::time::timeout(timeout, connector.connect(server_name, tcp)) => result,
    }
    .map_err(|_| ChainError::Network(format!("TLS handshake with {addr} timed out")))?
    .map_err(|e| ChainError::Network(format!("TLS handshake with {addr} failed: {e}")))?;

    let (_, session) = tls_stream.get_ref();
    let peer_certs: Vec<CertificateDer<'static>> = session
        .peer_certificates()
        .map(<[CertificateDer<'static>]>::to_vec)
        .unwrap_or_default();

    // Connection is dropped (and closed) here on every exit path,
    // whether this check below succeeds or fails.
    drop(tls_stream);

    if peer_certs.is_empty() {
        return Err(ChainError::Network(format!(
            "{addr} presented no peer certificates"
        )));
    }

    let peers: Vec<Certificate> = peer_certs
        .iter()
        .map(|der| codec::decode(der.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let leaf = peers[0].clone();
    let chain = Chain::with_defaults(leaf);
    for cert in &peers[1..] {
        chain.append_harvested(cert.clone());
    }

    Ok((chain, peers))
}
