//! Shared integration-test harness: an in-memory `Link` (a shared
//! mailbox keyed by identity) and `Store`, plus helpers to spawn and
//! introduce a handful of `NodeCoordinator`s without a real radio or
//! disk. Mirrors `demos/simulator`'s harness but kept independent, the
//! same way the teacher's top-level `tests/` crate never depends on
//! its `apps/cli` binary.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use meshphone_core::{EmitOutcome, Identity, Link, MeshError, Store};
use meshphone_node::{NodeCoordinator, NodeOptions};

type Inboxes = Arc<Mutex<HashMap<Identity, VecDeque<(Identity, Vec<u8>)>>>>;

#[derive(Clone, Default)]
pub struct SimNetwork {
    inboxes: Inboxes,
    neighbor_sets: Arc<Mutex<HashMap<Identity, HashSet<Identity>>>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, a: &str, b: &str) {
        self.neighbor_sets
            .lock()
            .unwrap()
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.neighbor_sets
            .lock()
            .unwrap()
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn link_for(&self, id: &str) -> SimLink {
        SimLink {
            id: id.to_string(),
            network: self.clone(),
            known_neighbors: HashSet::new(),
        }
    }
}

pub struct SimLink {
    id: Identity,
    network: SimNetwork,
    known_neighbors: HashSet<Identity>,
}

impl Link for SimLink {
    fn emit(&mut self, to: &Identity, bytes: &[u8]) -> EmitOutcome {
        let has_link = self
            .network
            .neighbor_sets
            .lock()
            .unwrap()
            .get(&self.id)
            .is_some_and(|set| set.contains(to));
        if !has_link {
            return EmitOutcome::NoLink;
        }
        self.network
            .inboxes
            .lock()
            .unwrap()
            .entry(to.clone())
            .or_default()
            .push_back((self.id.clone(), bytes.to_vec()));
        EmitOutcome::Ok
    }

    fn neighbors(&self) -> Vec<Identity> {
        self.network
            .neighbor_sets
            .lock()
            .unwrap()
            .get(&self.id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn drain_frames(&mut self) -> Vec<(Identity, Vec<u8>)> {
        self.network
            .inboxes
            .lock()
            .unwrap()
            .get_mut(&self.id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn drain_neighbor_changes(&mut self) -> Vec<(Vec<Identity>, Vec<Identity>)> {
        let current: HashSet<Identity> = self.neighbors().into_iter().collect();
        let added: Vec<Identity> = current.difference(&self.known_neighbors).cloned().collect();
        let removed: Vec<Identity> = self.known_neighbors.difference(&current).cloned().collect();
        self.known_neighbors = current;
        if added.is_empty() && removed.is_empty() {
            Vec::new()
        } else {
            vec![(added, removed)]
        }
    }
}

#[derive(Clone, Default)]
pub struct SimStore {
    data: HashMap<(String, String), Vec<u8>>,
}

impl Store for SimStore {
    fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MeshError> {
        self.data
            .insert((namespace.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MeshError> {
        Ok(self
            .data
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), MeshError> {
        self.data.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, MeshError> {
        Ok(self
            .data
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }
}

pub fn spawn_node(network: &SimNetwork, id: &str, plugged_in: bool) -> NodeCoordinator {
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

pub fn spawn_node_with_energy(network: &SimNetwork, id: &str, initial_energy: f64) -> NodeCoordinator {
    let options = NodeOptions {
        initial_energy,
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

/// Exchange identity public keys, standing in for the out-of-band
/// contact exchange the graphical shell would normally perform.
pub fn introduce(a: &mut NodeCoordinator, b: &mut NodeCoordinator) {
    let a_bundle = a.key_bundle().expect("node has identity keys");
    let b_bundle = b.key_bundle().expect("node has identity keys");
    a.register_peer(b.self_id().to_string(), b_bundle.identity_public);
    b.register_peer(a.self_id().to_string(), a_bundle.identity_public);
}
