//! Cryptographic primitives for the mesh messaging core: the key
//! store, the Double-Ratchet-style session, the onion wrapper and
//! signing helpers.

mod error;
mod kdf;
mod keys;
mod onion;
mod ratchet;
mod sign;

pub use error::{CryptoError, Result};
pub use kdf::{hkdf_expand, hmac_sha256, kdf_enc_mac, verify_hmac_sha256};
pub use keys::{AgreementKeypair, KeyBundle, KeyStore, SigningKeypair};
pub use onion::{peel, wrap};
pub use ratchet::{RatchetMessage, RatchetSession};
pub use sign::{sign_data, verify_signature};
