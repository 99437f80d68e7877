//! Shared key-derivation helpers used by the key store, the ratchet
//! session and the onion wrapper. Centralized here so the three
//! components don't each reinvent the HKDF/HMAC plumbing.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256 with a 64-byte output, split into a 32-byte encryption
/// key and a 32-byte MAC key. Used by the Key Store's `kdf` operation
/// and anywhere else a single DH output needs to become a (cipher,
/// mac) pair.
pub fn kdf_enc_mac(shared: &[u8], info: &[u8], salt: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut okm = [0u8; 64];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&okm[0..32]);
    mac_key.copy_from_slice(&okm[32..64]);
    Ok((enc_key, mac_key))
}

/// HKDF-SHA256 with an arbitrary fixed-size output, used by the
/// ratchet's root KDF (`salt = root key`, 64-byte output split into new
/// root + new chain).
pub fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))
}

/// HMAC-SHA256(key, data), used throughout the chain KDF and the onion
/// layer MAC.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify an HMAC-SHA256 tag in constant time (via the `hmac` crate's
/// own comparison), returning whether it matched.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
