use thiserror::Error;

/// Error kinds the mesh core distinguishes and surfaces to callers.
///
/// User-initiated operations return a typed outcome built from these
/// variants; background operations (relay queue draining, rebalancing)
/// log and count the variant instead of propagating it, and never abort
/// the tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("insufficient energy balance for this send")]
    InsufficientEnergy,

    #[error("no known route to destination")]
    NoRoute,

    #[error("link unavailable, retry later")]
    LinkUnavailable,

    #[error("payload exceeds the configured per-message size cap")]
    TooLarge,

    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    #[error("message replayed or looped back to an existing hop")]
    ReplayOrLoop,

    #[error("relay queue at capacity")]
    QueueFull,

    #[error("message expired (ttl or wall-clock age exceeded)")]
    Expired,

    #[error("store error: {0}")]
    StoreError(String),
}

pub type Result<T> = std::result::Result<T, MeshError>;
