//! The seed scenarios of the specification's §8, wired up over
//! `SimNetwork`/`SimStore` instead of real radios and disk.

use std::sync::{Arc, Mutex};

use meshphone_core::MessagePriority;
use meshphone_node::{NodeCoordinator, NodeOptions};
use tracing::info;

use crate::sim_link::SimNetwork;
use crate::sim_store::SimStore;

fn spawn_node(network: &SimNetwork, id: &str, plugged_in: bool) -> NodeCoordinator {
    let options = NodeOptions {
        plugged_in,
        ..NodeOptions::default()
    };
    NodeCoordinator::init(
        id.to_string(),
        options,
        Box::new(network.link_for(id)),
        Box::new(SimStore::default()),
    )
    .expect("fresh in-memory store never fails to initialize")
}

/// Exchange identity public keys between two already-spawned nodes, so
/// each can address the other as a ratchet-session or onion-wrap
/// target. Stands in for the out-of-band contact exchange the
/// graphical shell would normally perform.
fn introduce(a: &mut NodeCoordinator, b: &mut NodeCoordinator) {
    let a_bundle = a.key_bundle().expect("node has identity keys");
    let b_bundle = b.key_bundle().expect("node has identity keys");
    a.register_peer(b.self_id().to_string(), b_bundle.identity_public);
    b.register_peer(a.self_id().to_string(), a_bundle.identity_public);
}

/// Seed scenario 1: direct neighbors. A sends "hello" to B over a
/// single hop; expects delivery, an ACK back to A, and the energy
/// charge the pricing formula predicts for a short text message at
/// normal priority and one hop.
pub fn scenario_direct_neighbors() {
    info!("scenario: direct neighbors");
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

    // One quiet tick each so the routing table learns its own neighbor
    // set from the link before the first send.
    alice.tick(999);
    bob.tick(999);

    let before = alice.ledger().account("alice").unwrap().balance;
    alice
        .send("bob", b"hello", MessagePriority::Normal, 1_000)
        .expect("direct send should succeed");

    bob.tick(1_000);
    alice.tick(1_001);

    let after = alice.ledger().account("alice").unwrap().balance;
    info!(
        delivered = ?delivered.lock().unwrap(),
        acked = *acked.lock().unwrap(),
        charged = before - after,
        "direct neighbors scenario complete"
    );
}

/// Seed scenarios 2 and 3: a three-hop onion route A -> B -> C -> D,
/// with `plugged_in_relay` selecting which of the two intermediate
/// relays (if any) gets the 1.5x reward multiplier.
pub fn scenario_three_hop_onion(plugged_in_relay: Option<&str>) {
    info!(?plugged_in_relay, "scenario: three-hop onion");
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

    // Let each node learn its own neighbor set from the link before a
    // route is requested.
    for node in [&mut a, &mut b, &mut c, &mut d] {
        node.tick(1_999);
    }

    let delivered = Arc::new(Mutex::new(None));
    let delivered_clone = delivered.clone();
    d.on_message(Box::new(move |from, content, _ts| {
        *delivered_clone.lock().unwrap() = Some((from.to_string(), content.to_vec()));
    }));

    a.send("d", b"secret", MessagePriority::Normal, 2_000)
        .expect("a route to d should exist");

    // One tick per hop: b peels and enqueues, c peels and enqueues, d decrypts.
    b.tick(2_000);
    c.tick(2_000);
    d.tick(2_000);
    c.tick(2_001);
    b.tick(2_001);
    a.tick(2_002);

    info!(
        delivered = ?delivered.lock().unwrap(),
        b_relayed = b.counters().relayed,
        c_relayed = c.counters().relayed,
        b_balance = b.ledger().account("b").unwrap().balance,
        c_balance = c.ledger().account("c").unwrap().balance,
        "three-hop onion scenario complete"
    );
}

/// Seed scenario 6: insufficient energy. Alice starts with a balance
/// below the cost of the send; `send` must be refused and the balance
/// must be untouched.
pub fn scenario_insufficient_energy() {
    info!("scenario: insufficient energy");
    let network = SimNetwork::new();
    network.connect("alice", "bob");

    let options = NodeOptions {
        initial_energy: 50.0,
        ..NodeOptions::default()
    };
    let mut alice = NodeCoordinator::init(
        "alice".to_string(),
        options,
        Box::new(network.link_for("alice")),
        Box::new(SimStore::default()),
    )
    .unwrap();
    let mut bob = spawn_node(&network, "bob", false);
    introduce(&mut alice, &mut bob);

    let before = alice.ledger().account("alice").unwrap().balance;
    let result = alice.send("bob", b"hello", MessagePriority::Normal, 1_000);
    let after = alice.ledger().account("alice").unwrap().balance;

    info!(?result, before, after, "insufficient energy scenario complete");
    assert!(result.is_err(), "send should have been refused");
    assert_eq!(before, after, "balance must be unchanged on refusal");
}
