//! TLS X.509 certificate chain resolution, verification, and revocation
//! checking.
//!
//! Module layout mirrors the teacher's `tls/mod.rs`: one module per
//! component, with the public surface re-exported at the crate root so a
//! collaborator (CLI, MCP tool server, or test harness) never needs to
//! reach into a submodule path directly.

pub mod buffer_pool;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crl_cache;
mod der_walk;
pub mod error;
pub mod remote_fetcher;
pub mod revocation;
pub mod types;
pub mod visualization;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use chain::Chain;
pub use codec::{decode, decode_multiple, encode_der, encode_multiple_der, encode_multiple_pem, encode_pem};
pub use config::HttpConfig;
pub use crl_cache::{CrlCache, CrlCacheConfig, CrlCacheEntry, CrlCacheMetrics};
pub use error::{ChainError, Result};
pub use remote_fetcher::{fetch_remote_chain, TlsVersion};
pub use revocation::{check_revocation_status, parse_crl_response, parse_ocsp_response};
pub use types::{Certificate, CertificateRole, CheckStatus, RevocationStatus, VisualizationRecord};
pub use visualization::{render_ascii_tree, render_table, to_visualization_document, Relationship, VisualizationDocument};
