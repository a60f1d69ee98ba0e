//! Error kinds for the certificate chain engine.

/// Errors surfaced by every public operation in this crate.
///
/// Variants map 1:1 onto the semantic error kinds named in the
/// specification's error-handling design: decode failures, network
/// failures, chain-integrity failures, the non-fatal "unknown authority"
/// case, revocation lookup failures, cache validation failures, and
/// cancellation.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("could not decode certificate: {0}")]
    InputDecode(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("chain integrity check failed: {0}")]
    ChainIntegrity(String),

    #[error("unknown authority: {0}")]
    UnknownAuthority(String),

    #[error("revocation lookup failed: {0}")]
    RevocationLookup(String),

    #[error("cache validation failed: {0}")]
    CacheValidation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
