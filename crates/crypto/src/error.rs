use thiserror::Error;

/// Narrow failure shape for the crypto crate's own operations. Callers
/// in the relay/node layer convert these into
/// `meshphone_core::MeshError::CryptoFailure` or `StoreError` at the
/// component boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed public key")]
    InvalidPublicKey,

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("padding is malformed")]
    InvalidPadding,

    #[error("aead encryption failed")]
    AeadEncrypt,

    #[error("aead decryption failed")]
    AeadDecrypt,

    #[error("hop number {actual} does not match route position {expected}")]
    HopNumberMismatch { expected: u32, actual: u32 },

    #[error("no ratchet session established for this peer")]
    NoSession,

    #[error("skipped message key not found and beyond cache capacity")]
    SkippedKeyUnavailable,

    #[error("key store load failed: {0}")]
    LoadFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
