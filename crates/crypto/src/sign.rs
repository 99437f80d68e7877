use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};

use crate::keys::SigningKeypair;

/// Sign data with a signing keypair. Used to populate the optional
/// `Message::signature` field — an end-to-end authenticity check
/// independent of the ratchet's own per-message MAC.
pub fn sign_data(keypair: &SigningKeypair, data: &[u8]) -> [u8; 64] {
    let signature: Signature = keypair.signing_key.sign(data);
    signature.to_bytes()
}

/// Verify a signature produced by `sign_data`.
pub fn verify_signature(pubkey: &[u8; 32], data: &[u8], signature: &[u8; 64]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(pubkey) {
        Ok(vk) => vk,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(signature);

    verifying_key.verify(data, &signature).is_ok()
}
