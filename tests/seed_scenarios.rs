//! Full-stack integration tests over `NodeCoordinator`, covering the
//! direct-neighbor send/ack round trip, the three-hop onion route with
//! and without a plugged-in relay bonus, and a refused send when the
//! sender lacks sufficient energy.

mod common;

use std::sync::{Arc, Mutex};

use meshphone_core::MessagePriority;
use meshphone_node::NodeOptions;

use common::{introduce, spawn_node, spawn_node_with_energy, SimNetwork};

#[test]
fn direct_neighbors_deliver_and_ack() {
    let network = SimNetwork::new();
    network.connect("alice", "bob");

    let mut alice = spawn_node(&network, "alice", false);
    let mut bob = spawn_node(&network, "bob", false);
    introduce(&mut alice, &mut bob);

    let delivered = Arc::new(Mutex::new(None));
    let delivered_clone = delivered.clone();
    bob.on_message(Box::new(move |from, content, _ts| {
        *delivered_clone.lock().unwrap() = Some((from.to_string(), content.to_vec()));
    }));

    let acked = Arc::new(Mutex::new(false));
    let acked_clone = acked.clone();
    alice.on_delivery(Box::new(move |_id| {
        *acked_clone.lock().unwrap() = true;
    }));

    // Quiet tick so each side's routing table learns its own neighbor
    // set before a route is requested.
    alice.tick(999);
    bob.tick(999);

    let before = alice.ledger().account("alice").unwrap().balance;
    alice
        .send("bob", b"hello", MessagePriority::Normal, 1_000)
        .expect("direct neighbors should have a route");

    bob.tick(1_000);
    alice.tick(1_001);

    assert_eq!(
        delivered.lock().unwrap().clone(),
        Some(("alice".to_string(), b"hello".to_vec()))
    );
    assert!(*acked.lock().unwrap(), "sender should have observed an ack");

    let after = alice.ledger().account("alice").unwrap().balance;
    assert!(after < before, "a one-hop send must be charged");
    assert_eq!(bob.ledger().account("bob").unwrap().received_count, 1);
}

fn onion_chain(plugged_in_relay: Option<&str>) -> (
    meshphone_node::NodeCoordinator,
    meshphone_node::NodeCoordinator,
    meshphone_node::NodeCoordinator,
    meshphone_node::NodeCoordinator,
) {
    let network = SimNetwork::new();
    network.connect("a", "b");
    network.connect("b", "c");
    network.connect("c", "d");

    let mut a = spawn_node(&network, "a", false);
    let mut b = spawn_node(&network, "b", plugged_in_relay == Some("b"));
    let mut c = spawn_node(&network, "c", plugged_in_relay == Some("c"));
    let mut d = spawn_node(&network, "d", false);

    introduce(&mut a, &mut b);
    introduce(&mut a, &mut c);
    introduce(&mut a, &mut d);
    introduce(&mut b, &mut c);
    introduce(&mut c, &mut d);

    let adjacency: [(&str, &[&str]); 4] = [
        ("a", &["b"]),
        ("b", &["a", "c"]),
        ("c", &["b", "d"]),
        ("d", &["c"]),
    ];
    for (node, neighbors) in adjacency {
        let neighbors: Vec<String> = neighbors.iter().map(|s| s.to_string()).collect();
        a.merge_view(node.to_string(), neighbors.clone());
        b.merge_view(node.to_string(), neighbors.clone());
        c.merge_view(node.to_string(), neighbors.clone());
        d.merge_view(node.to_string(), neighbors);
    }

    for node in [&mut a, &mut b, &mut c, &mut d] {
        node.tick(1_999);
    }

    (a, b, c, d)
}

#[test]
fn three_hop_onion_relay_without_plugged_in_bonus() {
    let (mut a, mut b, mut c, mut d) = onion_chain(None);

    let delivered = Arc::new(Mutex::new(None));
    let delivered_clone = delivered.clone();
    d.on_message(Box::new(move |from, content, _ts| {
        *delivered_clone.lock().unwrap() = Some((from.to_string(), content.to_vec()));
    }));

    let before_b = b.ledger().account("b").unwrap().balance;
    let before_c = c.ledger().account("c").unwrap().balance;

    a.send("d", b"secret", MessagePriority::Normal, 2_000)
        .expect("a chain route to d should exist");

    b.tick(2_000);
    c.tick(2_000);
    d.tick(2_000);
    c.tick(2_001);
    b.tick(2_001);
    a.tick(2_002);

    assert_eq!(
        delivered.lock().unwrap().clone(),
        Some(("a".to_string(), b"secret".to_vec()))
    );
    assert_eq!(b.counters().relayed, 1);
    assert_eq!(c.counters().relayed, 1);

    let b_reward = b.ledger().account("b").unwrap().balance - before_b;
    let c_reward = c.ledger().account("c").unwrap().balance - before_c;
    assert!(b_reward > 0.0);
    assert!((b_reward - c_reward).abs() < 1e-9, "neither relay is plugged in, rewards should match");
}

#[test]
fn three_hop_onion_relay_with_plugged_in_bonus() {
    let (mut a, mut b, mut c, mut d) = onion_chain(Some("b"));

    d.on_message(Box::new(move |_from, _content, _ts| {}));

    let before_b = b.ledger().account("b").unwrap().balance;
    let before_c = c.ledger().account("c").unwrap().balance;

    a.send("d", b"secret", MessagePriority::Normal, 2_000)
        .expect("a chain route to d should exist");

    b.tick(2_000);
    c.tick(2_000);
    d.tick(2_000);
    c.tick(2_001);
    b.tick(2_001);
    a.tick(2_002);

    let b_reward = b.ledger().account("b").unwrap().balance - before_b;
    let c_reward = c.ledger().account("c").unwrap().balance - before_c;
    assert!(b_reward > c_reward, "the plugged-in relay should earn the 1.5x bonus");
    assert!((b_reward - c_reward * 1.5).abs() < 1e-6);
}

#[test]
fn insufficient_energy_refuses_send_and_leaves_balance_unchanged() {
    let network = SimNetwork::new();
    network.connect("alice", "bob");

    let mut alice = spawn_node_with_energy(&network, "alice", 50.0);
    let mut bob = spawn_node(&network, "bob", false);
    introduce(&mut alice, &mut bob);
    alice.tick(999);
    bob.tick(999);

    let before = alice.ledger().account("alice").unwrap().balance;
    let result = alice.send("bob", b"hello", MessagePriority::Normal, 1_000);
    let after = alice.ledger().account("alice").unwrap().balance;

    assert!(result.is_err(), "a send costing more than the balance must be refused");
    assert_eq!(before, after);
}

#[test]
fn key_material_survives_a_coordinator_restart() {
    use meshphone_core::Store;

    #[derive(Clone, Default)]
    struct PersistentStore(std::sync::Arc<std::sync::Mutex<std::collections::HashMap<(String, String), Vec<u8>>>>);
    impl Store for PersistentStore {
        fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), meshphone_core::MeshError> {
            self.0.lock().unwrap().insert((namespace.to_string(), key.to_string()), bytes.to_vec());
            Ok(())
        }
        fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, meshphone_core::MeshError> {
            Ok(self.0.lock().unwrap().get(&(namespace.to_string(), key.to_string())).cloned())
        }
        fn delete(&mut self, namespace: &str, key: &str) -> Result<(), meshphone_core::MeshError> {
            self.0.lock().unwrap().remove(&(namespace.to_string(), key.to_string()));
            Ok(())
        }
        fn list(&self, namespace: &str) -> Result<Vec<String>, meshphone_core::MeshError> {
            Ok(self.0.lock().unwrap().keys().filter(|(ns, _)| ns == namespace).map(|(_, k)| k.clone()).collect())
        }
    }

    let network = SimNetwork::new();
    let store = PersistentStore::default();

    let mut first = meshphone_node::NodeCoordinator::init(
        "n".to_string(),
        NodeOptions::default(),
        Box::new(network.link_for("n")),
        Box::new(store.clone()),
    )
    .unwrap();
    first.save_keys().unwrap();
    let original_bundle = first.key_bundle().unwrap();

    let reloaded = meshphone_node::NodeCoordinator::init(
        "n".to_string(),
        NodeOptions::default(),
        Box::new(network.link_for("n")),
        Box::new(store),
    )
    .unwrap();

    assert_eq!(
        reloaded.key_bundle().unwrap().identity_public,
        original_bundle.identity_public
    );
}
