//! Key Store: long-term identity keys, ephemeral keys, the prekey pool
//! and the peer public-key cache.

use std::collections::HashMap;

use ed25519_dalek::{SigningKey, VerifyingKey};
use meshphone_core::{Identity, MeshError, Store};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, Result};
use crate::kdf::kdf_enc_mac;

const STORE_NAMESPACE: &str = "keys";

/// Ed25519 keypair used for message signatures.
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl SigningKeypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }
}

/// X25519 keypair used for key agreement (the ratchet and the onion
/// wrapper both derive from `ecdh` results produced through this type).
pub struct AgreementKeypair {
    pub secret: StaticSecret,
    pub public: X25519PublicKey,
}

impl Clone for AgreementKeypair {
    fn clone(&self) -> Self {
        let secret = StaticSecret::from(*self.secret.as_bytes());
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }
}

impl AgreementKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        *self.secret.as_bytes()
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// `ecdh(our_private, their_public) -> 32 bytes`.
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        *shared.as_bytes()
    }
}

/// The export surface of a node's key material: everything a peer needs
/// to start a ratchet session with this node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeyBundle {
    pub identity_public: [u8; 32],
    pub signing_public: [u8; 32],
    pub ephemeral_public: [u8; 32],
    pub prekeys: HashMap<u32, [u8; 32]>,
}

/// Long-term identity keys, the rotating ephemeral key, a prekey pool,
/// and the peer public-key cache for one node.
///
/// Invariant: exactly one identity (agreement) key and one signing key
/// exist once `generate_identity` has been called; the ephemeral key
/// may rotate freely; the peer cache is authoritative for outbound
/// encryption targets.
pub struct KeyStore {
    identity_key: Option<AgreementKeypair>,
    signing_key: Option<SigningKeypair>,
    ephemeral_key: Option<AgreementKeypair>,
    prekeys: HashMap<u32, AgreementKeypair>,
    peer_cache: HashMap<Identity, [u8; 32]>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            identity_key: None,
            signing_key: None,
            ephemeral_key: None,
            prekeys: HashMap::new(),
            peer_cache: HashMap::new(),
        }
    }

    /// Create the node's long-term identity and signing keys. Called
    /// once at node first-start; the resulting private bytes never
    /// leave the node and are destroyed only on explicit reset.
    pub fn generate_identity(&mut self) {
        self.identity_key = Some(AgreementKeypair::generate());
        self.signing_key = Some(SigningKeypair::generate());
    }

    /// Rotate the ephemeral agreement key. Superseded keys are dropped
    /// (and thus destroyed) immediately.
    pub fn generate_ephemeral(&mut self) {
        self.ephemeral_key = Some(AgreementKeypair::generate());
    }

    /// Fill the prekey pool with `n` fresh keys indexed 0..n.
    pub fn generate_prekeys(&mut self, n: u32) {
        self.prekeys.clear();
        for i in 0..n {
            self.prekeys.insert(i, AgreementKeypair::generate());
        }
    }

    pub fn ecdh(our_private: &AgreementKeypair, their_public: &[u8; 32]) -> [u8; 32] {
        our_private.diffie_hellman(their_public)
    }

    /// HKDF-SHA256 with a 64-byte output split into an encryption key
    /// and a MAC key.
    pub fn kdf(shared: &[u8], info: &[u8], salt: &[u8]) -> Result<([u8; 32], [u8; 32])> {
        kdf_enc_mac(shared, info, salt)
    }

    pub fn put_peer(&mut self, id: Identity, public: [u8; 32]) {
        // Overwrites silently, per the component's documented failure
        // mode: there is no versioning of peer keys at this layer.
        self.peer_cache.insert(id, public);
    }

    pub fn get_peer(&self, id: &str) -> Option<[u8; 32]> {
        self.peer_cache.get(id).copied()
    }

    pub fn identity_keypair(&self) -> Option<&AgreementKeypair> {
        self.identity_key.as_ref()
    }

    pub fn signing_keypair(&self) -> Option<&SigningKeypair> {
        self.signing_key.as_ref()
    }

    pub fn ephemeral_keypair(&self) -> Option<&AgreementKeypair> {
        self.ephemeral_key.as_ref()
    }

    pub fn prekey(&self, index: u32) -> Option<&AgreementKeypair> {
        self.prekeys.get(&index)
    }

    pub fn export_bundle(&self) -> Result<KeyBundle> {
        let identity = self
            .identity_key
            .as_ref()
            .ok_or(CryptoError::NoSession)?;
        let signing = self.signing_key.as_ref().ok_or(CryptoError::NoSession)?;
        let ephemeral = self
            .ephemeral_key
            .as_ref()
            .ok_or(CryptoError::NoSession)?;
        Ok(KeyBundle {
            identity_public: identity.public_key_bytes(),
            signing_public: signing.public_key_bytes(),
            ephemeral_public: ephemeral.public_key_bytes(),
            prekeys: self
                .prekeys
                .iter()
                .map(|(i, kp)| (*i, kp.public_key_bytes()))
                .collect(),
        })
    }

    /// Persist identity, signing, ephemeral and prekey secrets plus the
    /// peer cache, one namespace key per item, per the store's
    /// no-atomic-multi-key-write contract.
    pub fn save(&self, store: &mut dyn Store) -> Result<()> {
        if let Some(identity) = &self.identity_key {
            store
                .put(STORE_NAMESPACE, "identity", &identity.secret_key_bytes())
                .map_err(map_store_err)?;
        }
        if let Some(signing) = &self.signing_key {
            store
                .put(STORE_NAMESPACE, "signing", &signing.secret_key_bytes())
                .map_err(map_store_err)?;
        }
        if let Some(ephemeral) = &self.ephemeral_key {
            store
                .put(STORE_NAMESPACE, "ephemeral", &ephemeral.secret_key_bytes())
                .map_err(map_store_err)?;
        }
        for (i, prekey) in &self.prekeys {
            store
                .put(
                    STORE_NAMESPACE,
                    &format!("prekey-{i}"),
                    &prekey.secret_key_bytes(),
                )
                .map_err(map_store_err)?;
        }
        for (peer_id, public) in &self.peer_cache {
            store
                .put(STORE_NAMESPACE, &format!("peer-{peer_id}"), public)
                .map_err(map_store_err)?;
        }
        Ok(())
    }

    /// Rebuild a `KeyStore` from a store's `keys` namespace. Fails if
    /// the identity or signing secret is missing or the wrong length —
    /// a corrupted identity key on load is the one fatal error the
    /// core recognizes (§7).
    pub fn load(store: &dyn Store) -> Result<Self> {
        let identity_bytes = store
            .get(STORE_NAMESPACE, "identity")
            .map_err(map_store_err)?
            .ok_or_else(|| CryptoError::LoadFailed("missing identity key".to_string()))?;
        let signing_bytes = store
            .get(STORE_NAMESPACE, "signing")
            .map_err(map_store_err)?
            .ok_or_else(|| CryptoError::LoadFailed("missing signing key".to_string()))?;
        let identity_key = Some(AgreementKeypair::from_secret_bytes(&to_array(
            &identity_bytes,
        )?));
        let signing_key = Some(SigningKeypair::from_secret_bytes(&to_array(
            &signing_bytes,
        )?));

        let ephemeral_key = store
            .get(STORE_NAMESPACE, "ephemeral")
            .map_err(map_store_err)?
            .map(|bytes| to_array(&bytes).map(|a| AgreementKeypair::from_secret_bytes(&a)))
            .transpose()?;

        let mut prekeys = HashMap::new();
        let mut peer_cache = HashMap::new();
        for key in store.list(STORE_NAMESPACE).map_err(map_store_err)? {
            if let Some(index) = key.strip_prefix("prekey-") {
                if let Ok(index) = index.parse::<u32>() {
                    if let Some(bytes) = store.get(STORE_NAMESPACE, &key).map_err(map_store_err)? {
                        prekeys.insert(index, AgreementKeypair::from_secret_bytes(&to_array(&bytes)?));
                    }
                }
            } else if let Some(peer_id) = key.strip_prefix("peer-") {
                if let Some(bytes) = store.get(STORE_NAMESPACE, &key).map_err(map_store_err)? {
                    peer_cache.insert(peer_id.to_string(), to_array(&bytes)?);
                }
            }
        }

        Ok(Self {
            identity_key,
            signing_key,
            ephemeral_key,
            prekeys,
            peer_cache,
        })
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn to_array(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::LoadFailed("key material has the wrong length".to_string()))
}

fn map_store_err(e: MeshError) -> CryptoError {
    CryptoError::LoadFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct MemStore(StdHashMap<(String, String), Vec<u8>>);

    impl Store for MemStore {
        fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> std::result::Result<(), MeshError> {
            self.0.insert((namespace.to_string(), key.to_string()), bytes.to_vec());
            Ok(())
        }
        fn get(&self, namespace: &str, key: &str) -> std::result::Result<Option<Vec<u8>>, MeshError> {
            Ok(self.0.get(&(namespace.to_string(), key.to_string())).cloned())
        }
        fn delete(&mut self, namespace: &str, key: &str) -> std::result::Result<(), MeshError> {
            self.0.remove(&(namespace.to_string(), key.to_string()));
            Ok(())
        }
        fn list(&self, namespace: &str) -> std::result::Result<Vec<String>, MeshError> {
            Ok(self
                .0
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, k)| k.clone())
                .collect())
        }
    }

    #[test]
    fn test_generate_identity_then_export_bundle() {
        let mut store = KeyStore::new();
        store.generate_identity();
        store.generate_ephemeral();
        store.generate_prekeys(3);
        let bundle = store.export_bundle().unwrap();
        assert_eq!(bundle.prekeys.len(), 3);
    }

    #[test]
    fn test_export_bundle_fails_before_init() {
        let store = KeyStore::new();
        assert!(store.export_bundle().is_err());
    }

    #[test]
    fn test_put_get_peer() {
        let mut store = KeyStore::new();
        store.put_peer("bob".to_string(), [9u8; 32]);
        assert_eq!(store.get_peer("bob"), Some([9u8; 32]));
        assert_eq!(store.get_peer("carol"), None);
    }

    #[test]
    fn test_put_peer_overwrites_silently() {
        let mut store = KeyStore::new();
        store.put_peer("bob".to_string(), [1u8; 32]);
        store.put_peer("bob".to_string(), [2u8; 32]);
        assert_eq!(store.get_peer("bob"), Some([2u8; 32]));
    }

    #[test]
    fn test_ecdh_agrees_both_directions() {
        let alice = AgreementKeypair::generate();
        let bob = AgreementKeypair::generate();
        let a = KeyStore::ecdh(&alice, &bob.public_key_bytes());
        let b = KeyStore::ecdh(&bob, &alice.public_key_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut store = KeyStore::new();
        store.generate_identity();
        store.generate_ephemeral();
        store.generate_prekeys(2);
        store.put_peer("bob".to_string(), [5u8; 32]);

        let mut mem = MemStore(StdHashMap::new());
        store.save(&mut mem).unwrap();

        let loaded = KeyStore::load(&mem).unwrap();
        assert_eq!(
            loaded.identity_keypair().unwrap().public_key_bytes(),
            store.identity_keypair().unwrap().public_key_bytes()
        );
        assert_eq!(loaded.get_peer("bob"), Some([5u8; 32]));
        assert_eq!(loaded.prekeys.len(), 2);
    }

    #[test]
    fn test_load_fails_on_missing_identity() {
        let mem = MemStore(StdHashMap::new());
        assert!(KeyStore::load(&mem).is_err());
    }
}
