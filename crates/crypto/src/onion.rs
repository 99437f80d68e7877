//! Onion Wrapper: layered symmetric encryption of per-hop routing
//! headers, peeled one layer at a time by intermediaries.

use std::collections::HashMap;

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use meshphone_core::{Identity, OnionLayer};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::kdf::{hmac_sha256, kdf_enc_mac, verify_hmac_sha256};
use crate::keys::AgreementKeypair;

const ONION_INFO: &[u8] = b"meshphone_onion_layer";

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// The plaintext sealed inside each onion layer. Only the next hop and
/// this layer's position in the route are revealed to the relay that
/// peels it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OnionHeader {
    next_hop: Identity,
    hop_number: u32,
}

fn derive_layer_keys(shared: &[u8], relay_identity: &str) -> Result<([u8; 32], [u8; 32])> {
    kdf_enc_mac(shared, ONION_INFO, relay_identity.as_bytes())
        .map_err(|_| CryptoError::DerivationFailed("onion layer kdf".to_string()))
}

fn encrypt_layer(enc_key: &[u8; 32], mac_key: &[u8; 32], plaintext: &[u8]) -> OnionLayer {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(enc_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut mac_input = Vec::with_capacity(iv.len() + ciphertext.len());
    mac_input.extend_from_slice(&iv);
    mac_input.extend_from_slice(&ciphertext);
    let tag = hmac_sha256(mac_key, &mac_input);
    OnionLayer { ciphertext, iv, tag }
}

fn decrypt_layer(enc_key: &[u8; 32], mac_key: &[u8; 32], layer: &OnionLayer) -> Result<Vec<u8>> {
    let mut mac_input = Vec::with_capacity(layer.iv.len() + layer.ciphertext.len());
    mac_input.extend_from_slice(&layer.iv);
    mac_input.extend_from_slice(&layer.ciphertext);
    if !verify_hmac_sha256(mac_key, &mac_input, &layer.tag) {
        return Err(CryptoError::TagMismatch);
    }
    Aes256CbcDec::new(enc_key.into(), &layer.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&layer.ciphertext)
        .map_err(|_| CryptoError::InvalidPadding)
}

/// Build one onion layer per intermediate relay in `route`
/// (`[sender, relay_1, .., relay_k, recipient]`). The sender's current
/// ephemeral key is used for ECDH with each relay's identity public
/// key; per-layer keys derive via HKDF-SHA256 with salt = relay
/// identity bytes. Layers are emitted in forward order: `layers[0]` is
/// for the first relay.
pub fn wrap(
    route: &[Identity],
    relay_keys: &HashMap<Identity, [u8; 32]>,
    sender_ephemeral: &AgreementKeypair,
) -> Result<Vec<OnionLayer>> {
    if route.len() < 2 {
        return Ok(Vec::new());
    }
    let relays = &route[1..route.len() - 1];
    let mut layers = Vec::with_capacity(relays.len());

    for (hop_number, relay_id) in relays.iter().enumerate() {
        let relay_public = relay_keys
            .get(relay_id)
            .ok_or(CryptoError::InvalidPublicKey)?;
        let shared = sender_ephemeral.diffie_hellman(relay_public);
        let (enc_key, mac_key) = derive_layer_keys(&shared, relay_id)?;

        let next_hop = relays
            .get(hop_number + 1)
            .cloned()
            .unwrap_or_else(|| route[route.len() - 1].clone());
        let header = OnionHeader {
            next_hop,
            hop_number: hop_number as u32,
        };
        let plaintext = serde_json::to_vec(&header)
            .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;

        layers.push(encrypt_layer(&enc_key, &mac_key, &plaintext));
    }

    Ok(layers)
}

/// A relay re-does ECDH with the sender's ephemeral public (carried
/// out-of-band in the outer message header), derives its layer keys
/// with its own identity, verifies the MAC of the leading layer,
/// decrypts, and returns the next hop. `expected_hop_number` is the
/// relay's position in the route — the message core passes
/// `hops_taken.len()` at the point of peeling, since a relay's position
/// equals the number of hops already recorded ahead of it.
pub fn peel(
    own_identity: &str,
    own_agreement: &AgreementKeypair,
    sender_ephemeral_public: [u8; 32],
    layer: &OnionLayer,
    expected_hop_number: u32,
) -> Result<Identity> {
    let shared = own_agreement.diffie_hellman(&sender_ephemeral_public);
    let (enc_key, mac_key) = derive_layer_keys(&shared, own_identity)?;
    let plaintext = decrypt_layer(&enc_key, &mac_key, layer)?;
    let header: OnionHeader = serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    if header.hop_number != expected_hop_number {
        return Err(CryptoError::HopNumberMismatch {
            expected: expected_hop_number,
            actual: header.hop_number,
        });
    }
    Ok(header.next_hop)
}
