//! Node Coordinator: composes the Key Store, Ratchet Session, Onion
//! Wrapper, Energy Ledger, Routing Table and Message Core into one
//! running node, owns the `Link` and `Store` collaborators, and drives
//! the periodic tick described in §5.
//!
//! Per §9's design notes, all cross-subsystem references pass through
//! here: the coordinator is the only thing that holds a `Box<dyn Link>`
//! / `Box<dyn Store>` pair, and it is a value — nothing here is global,
//! so tests and the simulator can run many coordinators in one process.

use meshphone_core::{EmitOutcome, Identity, Link, MeshError, MessagePriority, Store};
use meshphone_core::{MessageHeader, MessagePayload, MessageType};
use meshphone_crypto::{KeyBundle, KeyStore};
use meshphone_relay::{Counters, DropReason, MessageCore, ReceiveOutcome, SendOutcome};
use tracing::{debug, info, warn};

use crate::options::NodeOptions;

const KEYS_NAMESPACE: &str = "keys";
const HEARTBEAT_IDLE_SECS: u64 = 30;
const REBALANCE_INTERVAL_SECS: u64 = 3600;

/// Outcome of an application-initiated `send`, mirroring §6's
/// `{ok(message_id) | insufficient_energy | no_route | too_large}`.
pub type SendResult = Result<String, MeshError>;

type MessageCallback = Box<dyn FnMut(&str, &[u8], u64) + Send>;
type DeliveryCallback = Box<dyn FnMut(&str) + Send>;

/// One running node: the composed core plus its `Link` and `Store`
/// collaborators, application-facing callbacks, and the bookkeeping
/// needed to drive heartbeats and the slow energy rebalance on its own
/// cadence rather than every tick.
pub struct NodeCoordinator {
    core: MessageCore,
    link: Box<dyn Link>,
    store: Box<dyn Store>,
    on_message: Option<MessageCallback>,
    on_delivery: Option<DeliveryCallback>,
    last_activity: u64,
    last_rebalance: u64,
}

impl NodeCoordinator {
    /// `init(identity, options)` from §6. Loads the node's key material
    /// from `store`'s `keys` namespace if present, generating a fresh
    /// identity on genuinely first start. A `keys` namespace that is
    /// non-empty but fails to parse is the one fatal condition the core
    /// recognizes (§7): corruption of the node's own identity key
    /// refuses to start rather than silently generating a new one.
    pub fn init(
        self_id: Identity,
        options: NodeOptions,
        link: Box<dyn Link>,
        mut store: Box<dyn Store>,
    ) -> Result<Self, MeshError> {
        let existing = store.list(KEYS_NAMESPACE)?;
        let key_store = if existing.is_empty() {
            let mut ks = KeyStore::new();
            ks.generate_identity();
            ks.generate_ephemeral();
            ks.save(store.as_mut())
                .map_err(|e| MeshError::StoreError(e.to_string()))?;
            info!(identity = %self_id, "generated fresh identity key material");
            ks
        } else {
            KeyStore::load(store.as_ref()).map_err(|e| {
                MeshError::StoreError(format!("identity key store corrupted: {e}"))
            })?
        };

        let config = options.into();
        let core = MessageCore::with_key_store(self_id, config, key_store);
        Ok(Self {
            core,
            link,
            store,
            on_message: None,
            on_delivery: None,
            last_activity: 0,
            last_rebalance: 0,
        })
    }

    pub fn self_id(&self) -> &str {
        self.core.self_id()
    }

    pub fn key_bundle(&self) -> Result<KeyBundle, MeshError> {
        self.core.key_bundle()
    }

    pub fn register_peer(&mut self, identity: Identity, agreement_public: [u8; 32]) {
        self.core.register_peer(identity, agreement_public);
    }

    /// Merge a node's reported adjacency into the routing view, as
    /// supplied by whatever topology source the host wires up (gossip,
    /// a route-reply, or a static simulation view).
    pub fn merge_view(&mut self, node: Identity, neighbors: Vec<Identity>) {
        self.core.merge_view(node, neighbors);
    }

    pub fn counters(&self) -> &Counters {
        self.core.counters()
    }

    pub fn ledger(&self) -> &meshphone_energy::EnergyLedger {
        self.core.ledger()
    }

    pub fn on_message(&mut self, callback: MessageCallback) {
        self.on_message = Some(callback);
    }

    pub fn on_delivery(&mut self, callback: DeliveryCallback) {
        self.on_delivery = Some(callback);
    }

    /// `send(recipient, content, priority) -> {ok(message_id) |
    /// insufficient_energy | no_route | too_large}`. Emits the framed
    /// message to the first hop via `Link` when the route has a next
    /// hop; for `recipient == self` nothing is emitted and the content
    /// is handed straight to the `on_message` callback.
    pub fn send(&mut self, recipient: &str, content: &[u8], priority: MessagePriority, now: u64) -> SendResult {
        let outcome = self.core.send(recipient, content, priority, now)?;
        self.last_activity = now;
        self.apply_send_outcome(outcome, content, now)
    }

    fn apply_send_outcome(&mut self, outcome: SendOutcome, content: &[u8], now: u64) -> SendResult {
        match outcome {
            SendOutcome::DeliveredLocally { message_id } => {
                if let Some(cb) = self.on_message.as_mut() {
                    cb(self.core.self_id(), content, now);
                }
                Ok(message_id)
            }
            SendOutcome::Emit { message_id, next_hop, frame } => {
                self.emit(&next_hop, &frame);
                Ok(message_id)
            }
        }
    }

    fn emit(&mut self, next_hop: &str, frame: &[u8]) {
        match self.link.emit(&next_hop.to_string(), frame) {
            EmitOutcome::Ok => {}
            EmitOutcome::NoLink => warn!(next_hop, "link reported no route to next hop"),
            EmitOutcome::LinkError => warn!(next_hop, "link emission failed"),
        }
    }

    /// Drive one tick: drain neighbor changes and inbound frames from
    /// the `Link`, process the relay queue, and — on a slower
    /// cadence — send idle-link heartbeats and run the energy
    /// rebalance. `now` is epoch seconds supplied by the host, per §5's
    /// "nothing else may block on external I/O" — the coordinator never
    /// reads the system clock itself.
    pub fn tick(&mut self, now: u64) {
        for (added, removed) in self.link.drain_neighbor_changes() {
            self.core.update_neighbors(&added, &removed);
        }

        for (from, bytes) in self.link.drain_frames() {
            self.handle_frame(&from, &bytes, now);
        }

        for (next_hop, frame) in self.core.process_relay_queue(now) {
            self.emit(&next_hop, &frame);
        }

        self.maybe_send_heartbeats(now);

        if now.saturating_sub(self.last_rebalance) >= REBALANCE_INTERVAL_SECS {
            self.core.rebalance_energy();
            self.last_rebalance = now;
        }
    }

    fn handle_frame(&mut self, from: &str, bytes: &[u8], now: u64) {
        let outcome = match self.core.receive(bytes, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(from, error = %e, "receive failed");
                return;
            }
        };

        match outcome {
            ReceiveOutcome::DeliveredToApp { from, content, timestamp, ack } => {
                if let Some(cb) = self.on_message.as_mut() {
                    cb(&from, &content, timestamp);
                }
                if let Some(ack) = ack {
                    let _ = self.apply_send_outcome(ack, &[], now);
                }
            }
            ReceiveOutcome::AckReceived { message_id } => {
                if let Some(cb) = self.on_delivery.as_mut() {
                    cb(&message_id);
                }
            }
            ReceiveOutcome::Enqueued => {
                debug!(from, "accepted for relay");
            }
            ReceiveOutcome::HeartbeatObserved { from } => {
                debug!(%from, "heartbeat observed");
            }
            ReceiveOutcome::Dropped(reason) => {
                log_drop(from, reason);
            }
        }
    }

    /// Emit a heartbeat to each neighbor when the node has gone quiet
    /// for `HEARTBEAT_IDLE_SECS`, so idle links still refresh neighbor
    /// liveness even with no application traffic (§3 of `SPEC_FULL.md`).
    /// Heartbeats bypass the Message Core's routed send path entirely:
    /// they are a one-hop liveness ping, not charged against the energy
    /// ledger and carrying no onion layers.
    fn maybe_send_heartbeats(&mut self, now: u64) {
        if now.saturating_sub(self.last_activity) < HEARTBEAT_IDLE_SECS {
            return;
        }
        let neighbors = self.core.neighbors_snapshot();
        if neighbors.is_empty() {
            return;
        }
        for neighbor in neighbors {
            let header = MessageHeader::new(
                self.core.self_id().to_string(),
                neighbor.clone(),
                MessageType::Heartbeat,
                MessagePriority::Low,
                0,
                now,
            );
            let message = meshphone_core::Message {
                header,
                payload: MessagePayload::new(Vec::new(), "application/x-meshphone-heartbeat"),
                onion_layers: Vec::new(),
                hops_taken: Vec::new(),
                energy_cost: 0.0,
                is_encrypted: false,
                signature: None,
                onion_ephemeral_public: None,
            };
            match meshphone_core::encode(&message) {
                Ok(frame) => self.emit(&neighbor, &frame),
                Err(e) => warn!(error = %e, "failed to encode heartbeat"),
            }
        }
        self.last_activity = now;
    }

    /// Persist key material to the `Store`. Ledger, sessions and
    /// seen-set persistence are left to the host per §6's namespace
    /// layout note that sessions "may be rebuilt on demand" — nothing
    /// here assumes an atomic multi-namespace write.
    pub fn save_keys(&mut self) -> Result<(), MeshError> {
        self.core.save_keys(self.store.as_mut())
    }
}

fn log_drop(from: &str, reason: DropReason) {
    match reason {
        DropReason::ChecksumMismatch | DropReason::Malformed => {
            debug!(from, ?reason, "dropped malformed frame");
        }
        DropReason::Duplicate => debug!(from, "dropped duplicate"),
        DropReason::Expired => debug!(from, "dropped expired"),
        DropReason::Loop => debug!(from, "dropped loop"),
        DropReason::RelayDisabled => debug!(from, "dropped, relay disabled"),
        DropReason::QueueFull => debug!(from, "dropped, queue full"),
        DropReason::NoRoute => debug!(from, "dropped, no route"),
        DropReason::CryptoFailure => debug!(from, "dropped, crypto failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// An in-memory `Store` over a shared backing map, so a test can
    /// hand the same persisted bytes to a second coordinator and
    /// exercise a real reload rather than a fresh generation.
    #[derive(Clone, Default)]
    struct MemStore(Arc<Mutex<HashMap<(String, String), Vec<u8>>>>);

    impl Store for MemStore {
        fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MeshError> {
            self.0
                .lock()
                .unwrap()
                .insert((namespace.to_string(), key.to_string()), bytes.to_vec());
            Ok(())
        }
        fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MeshError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), key.to_string()))
                .cloned())
        }
        fn delete(&mut self, namespace: &str, key: &str) -> Result<(), MeshError> {
            self.0.lock().unwrap().remove(&(namespace.to_string(), key.to_string()));
            Ok(())
        }
        fn list(&self, namespace: &str) -> Result<Vec<String>, MeshError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, k)| k.clone())
                .collect())
        }
    }

    /// A shared in-memory mailbox Link: `emit` deposits into the
    /// target's inbox (keyed by identity), `drain_frames` reads this
    /// node's own inbox. Good enough to exercise the coordinator
    /// without a real radio.
    #[derive(Clone, Default)]
    struct SharedLink {
        id: Identity,
        neighbors: Vec<Identity>,
        inboxes: Arc<Mutex<HashMap<Identity, Vec<(Identity, Vec<u8>)>>>>,
    }

    impl Link for SharedLink {
        fn emit(&mut self, to: &Identity, bytes: &[u8]) -> EmitOutcome {
            let mut inboxes = self.inboxes.lock().unwrap();
            inboxes
                .entry(to.clone())
                .or_default()
                .push((self.id.clone(), bytes.to_vec()));
            EmitOutcome::Ok
        }
        fn neighbors(&self) -> Vec<Identity> {
            self.neighbors.clone()
        }
        fn drain_frames(&mut self) -> Vec<(Identity, Vec<u8>)> {
            self.inboxes
                .lock()
                .unwrap()
                .get_mut(&self.id)
                .map(std::mem::take)
                .unwrap_or_default()
        }
        fn drain_neighbor_changes(&mut self) -> Vec<(Vec<Identity>, Vec<Identity>)> {
            Vec::new()
        }
    }

    fn linked_pair() -> (NodeCoordinator, NodeCoordinator) {
        let inboxes = Arc::new(Mutex::new(HashMap::new()));
        let link_a = SharedLink {
            id: "a".to_string(),
            neighbors: vec!["b".to_string()],
            inboxes: inboxes.clone(),
        };
        let link_b = SharedLink {
            id: "b".to_string(),
            neighbors: vec!["a".to_string()],
            inboxes,
        };

        let mut a = NodeCoordinator::init(
            "a".to_string(),
            NodeOptions::default(),
            Box::new(link_a),
            Box::new(MemStore::default()),
        )
        .unwrap();
        let mut b = NodeCoordinator::init(
            "b".to_string(),
            NodeOptions::default(),
            Box::new(link_b),
            Box::new(MemStore::default()),
        )
        .unwrap();

        let a_bundle = a.key_bundle().unwrap();
        let b_bundle = b.key_bundle().unwrap();
        a.register_peer("b".to_string(), b_bundle.identity_public);
        b.register_peer("a".to_string(), a_bundle.identity_public);

        a.core.update_neighbors(&["b".to_string()], &[]);
        b.core.update_neighbors(&["a".to_string()], &[]);
        a.merge_view("a".to_string(), vec!["b".to_string()]);
        a.merge_view("b".to_string(), vec!["a".to_string()]);
        b.merge_view("a".to_string(), vec!["b".to_string()]);
        b.merge_view("b".to_string(), vec!["a".to_string()]);

        (a, b)
    }

    #[test]
    fn test_send_then_tick_delivers_and_acks() {
        let (mut a, mut b) = linked_pair();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = delivered.clone();
        b.on_message(Box::new(move |from, content, _ts| {
            delivered_clone
                .lock()
                .unwrap()
                .push((from.to_string(), content.to_vec()));
        }));

        let acked = Arc::new(Mutex::new(false));
        let acked_clone = acked.clone();
        a.on_delivery(Box::new(move |_id| {
            *acked_clone.lock().unwrap() = true;
        }));

        let message_id = a.send("b", b"hello there", MessagePriority::Normal, 1000).unwrap();
        b.tick(1000);
        assert_eq!(delivered.lock().unwrap().as_slice(), &[("a".to_string(), b"hello there".to_vec())]);

        a.tick(1001);
        assert!(*acked.lock().unwrap());
        let _ = message_id;
    }

    #[test]
    fn test_send_to_self_invokes_on_message_with_no_emission() {
        let inboxes = Arc::new(Mutex::new(HashMap::new()));
        let link = SharedLink {
            id: "solo".to_string(),
            neighbors: Vec::new(),
            inboxes,
        };
        let mut node = NodeCoordinator::init(
            "solo".to_string(),
            NodeOptions::default(),
            Box::new(link),
            Box::new(MemStore::default()),
        )
        .unwrap();

        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        node.on_message(Box::new(move |from, content, _ts| {
            *received_clone.lock().unwrap() = Some((from.to_string(), content.to_vec()));
        }));

        let before = node.ledger().account("solo").unwrap().balance;
        node.send("solo", b"note to self", MessagePriority::Normal, 1000).unwrap();
        assert_eq!(node.ledger().account("solo").unwrap().balance, before);
        assert_eq!(
            received.lock().unwrap().clone(),
            Some(("solo".to_string(), b"note to self".to_vec()))
        );
    }

    #[test]
    fn test_init_reloads_same_identity_key_from_store() {
        let store = MemStore::default();

        let link = SharedLink {
            id: "n".to_string(),
            neighbors: Vec::new(),
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        };
        let mut first = NodeCoordinator::init(
            "n".to_string(),
            NodeOptions::default(),
            Box::new(link),
            Box::new(store.clone()),
        )
        .unwrap();
        first.save_keys().unwrap();
        let original_bundle = first.key_bundle().unwrap();

        let link = SharedLink {
            id: "n".to_string(),
            neighbors: Vec::new(),
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        };
        let reloaded = NodeCoordinator::init(
            "n".to_string(),
            NodeOptions::default(),
            Box::new(link),
            Box::new(store),
        )
        .unwrap();
        assert_eq!(reloaded.self_id(), "n");
        assert_eq!(
            reloaded.key_bundle().unwrap().identity_public,
            original_bundle.identity_public
        );
    }

    #[test]
    fn test_init_refuses_to_start_on_corrupted_identity_key() {
        let mut store = MemStore::default();
        store.put(KEYS_NAMESPACE, "identity", b"too short").unwrap();
        store.put(KEYS_NAMESPACE, "signing", &[0u8; 32]).unwrap();

        let link = SharedLink {
            id: "n".to_string(),
            neighbors: Vec::new(),
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        };
        let result = NodeCoordinator::init(
            "n".to_string(),
            NodeOptions::default(),
            Box::new(link),
            Box::new(store),
        );
        assert!(matches!(result, Err(MeshError::StoreError(_))));
    }
}
