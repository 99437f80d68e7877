//! An in-memory `Link` used only by this simulator: a shared mailbox
//! keyed by identity, standing in for a radio driver. Every simulated
//! node holds one `SimLink` pointed at the same `inboxes` map, so
//! `emit` on one node's link deposits directly into the target
//! identity's inbox rather than crossing a real transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use meshphone_core::{EmitOutcome, Identity, Link};

type Inboxes = Arc<Mutex<HashMap<Identity, VecDeque<(Identity, Vec<u8>)>>>>;

/// Shared topology every `SimLink` instance reads and writes through.
/// Held by the scenario driver so it can reconfigure neighbor sets
/// between ticks (the simulator's stand-in for nodes moving in and out
/// of radio range).
#[derive(Clone, Default)]
pub struct SimNetwork {
    inboxes: Inboxes,
    neighbor_sets: Arc<Mutex<HashMap<Identity, HashSet<Identity>>>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a bidirectional radio link between two identities.
    pub fn connect(&self, a: &str, b: &str) {
        self.add_neighbor(a, b);
        self.add_neighbor(b, a);
    }

    /// Drop a previously declared bidirectional link.
    pub fn disconnect(&self, a: &str, b: &str) {
        self.remove_neighbor(a, b);
        self.remove_neighbor(b, a);
    }

    fn add_neighbor(&self, id: &str, neighbor: &str) {
        self.neighbor_sets
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .insert(neighbor.to_string());
    }

    fn remove_neighbor(&self, id: &str, neighbor: &str) {
        if let Some(set) = self.neighbor_sets.lock().unwrap().get_mut(id) {
            set.remove(neighbor);
        }
    }

    pub fn link_for(&self, id: &str) -> SimLink {
        SimLink {
            id: id.to_string(),
            network: self.clone(),
            known_neighbors: HashSet::new(),
        }
    }
}

/// Per-node handle onto a `SimNetwork`. Implements `meshphone_core::Link`
/// by reading/writing the shared inbox map and diffing this node's
/// neighbor set against what it last reported.
pub struct SimLink {
    id: Identity,
    network: SimNetwork,
    known_neighbors: HashSet<Identity>,
}

impl Link for SimLink {
    fn emit(&mut self, to: &Identity, bytes: &[u8]) -> EmitOutcome {
        let neighbors = self.network.neighbor_sets.lock().unwrap();
        if !neighbors.get(&self.id).is_some_and(|set| set.contains(to)) {
            return EmitOutcome::NoLink;
        }
        drop(neighbors);
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
