//! Neighbor set, merged network view, BFS shortest-path discovery and
//! cached next-hop lookups.

use std::collections::{HashMap, HashSet, VecDeque};

use meshphone_core::{Identity, RouteEntry};
use tracing::debug;

/// A snapshot of who-knows-whom across the mesh: identity -> the
/// identities it is directly adjacent to. Adjacency lists preserve
/// discovery order so that BFS ties resolve deterministically to
/// "first-found wins", per §4.5.
pub type NetworkView = HashMap<Identity, Vec<Identity>>;

fn push_unique(list: &mut Vec<Identity>, id: Identity) {
    if !list.contains(&id) {
        list.push(id);
    }
}

/// BFS shortest path from `self_id` to `destination` over `view`. Ties
/// are broken by discovery order (the order neighbors appear in each
/// adjacency list). Returns the singleton `[self_id]` when
/// `destination == self_id`, and `None` when `destination` is unknown
/// to `view` or unreachable.
pub fn find_route(self_id: &str, destination: &str, view: &NetworkView) -> Option<Vec<Identity>> {
    if destination == self_id {
        return Some(vec![self_id.to_string()]);
    }

    let mut visited: HashSet<Identity> = HashSet::new();
    let mut predecessor: HashMap<Identity, Identity> = HashMap::new();
    let mut queue: VecDeque<Identity> = VecDeque::new();

    visited.insert(self_id.to_string());
    queue.push_back(self_id.to_string());

    while let Some(node) = queue.pop_front() {
        let Some(neighbors) = view.get(&node) else {
            continue;
        };
        for neighbor in neighbors {
            if visited.contains(neighbor) {
                continue;
            }
            visited.insert(neighbor.clone());
            predecessor.insert(neighbor.clone(), node.clone());
            if neighbor == destination {
                return Some(reconstruct_path(&predecessor, self_id, destination));
            }
            queue.push_back(neighbor.clone());
        }
    }

    None
}

fn reconstruct_path(
    predecessor: &HashMap<Identity, Identity>,
    self_id: &str,
    destination: &str,
) -> Vec<Identity> {
    let mut path = vec![destination.to_string()];
    let mut current = destination.to_string();
    while current != self_id {
        let prev = predecessor
            .get(&current)
            .expect("every visited node has a predecessor until self");
        path.push(prev.clone());
        current = prev.clone();
    }
    path.reverse();
    path
}

/// Owns one node's view of the mesh: its directly observed neighbors,
/// everything else it has learned about who-is-adjacent-to-whom, and
/// the routes it has cached for destinations it has looked up before.
pub struct RoutingTable {
    self_id: Identity,
    neighbors: Vec<Identity>,
    external_view: NetworkView,
    cached_routes: HashMap<Identity, RouteEntry>,
    next_sequence: u64,
}

impl RoutingTable {
    pub fn new(self_id: Identity) -> Self {
        Self {
            self_id,
            neighbors: Vec::new(),
            external_view: HashMap::new(),
            cached_routes: HashMap::new(),
            next_sequence: 1,
        }
    }

    pub fn neighbors(&self) -> &[Identity] {
        &self.neighbors
    }

    pub fn is_neighbor(&self, id: &str) -> bool {
        self.neighbors.iter().any(|n| n == id)
    }

    /// Apply a link-level neighbor change: identities added and removed.
    /// Routes whose next hop just left the neighbor set are marked
    /// inactive rather than deleted, per §4.5's staleness rule.
    pub fn update_neighbors(&mut self, added: &[Identity], removed: &[Identity]) {
        for id in added {
            push_unique(&mut self.neighbors, id.clone());
        }
        for id in removed {
            self.neighbors.retain(|n| n != id);
        }
        for entry in self.cached_routes.values_mut() {
            if removed.contains(&entry.next_hop) {
                entry.is_active = false;
                debug!(destination = %entry.destination, next_hop = %entry.next_hop, "route marked stale");
            }
        }
    }

    /// Merge in a node's reported adjacency, as relayed by some
    /// out-of-band topology exchange. The core itself never originates
    /// this data; it is supplied by the caller (the Node Coordinator),
    /// which may source it from gossip, a route-reply, or a static
    /// simulation view.
    pub fn merge_view_entry(&mut self, node: Identity, neighbors: Vec<Identity>) {
        self.external_view.insert(node, neighbors);
    }

    /// The view used for routing decisions: the externally learned
    /// view plus this node's own directly observed neighbors merged in,
    /// per §2's data-flow description ("the node merges its own
    /// directly observed neighbors into it").
    pub fn effective_view(&self) -> NetworkView {
        let mut view = self.external_view.clone();
        view.insert(self.self_id.clone(), self.neighbors.clone());
        view
    }

    /// BFS shortest path to `destination` over the current effective
    /// view.
    pub fn find_route(&self, destination: &str) -> Option<Vec<Identity>> {
        find_route(&self.self_id, destination, &self.effective_view())
    }

    /// Record a discovered path as the cached route to its destination.
    /// `path` must start with `self_id`. Sequence numbers increase
    /// monotonically across calls regardless of destination.
    pub fn cache_route(&mut self, path: &[Identity]) -> Option<&RouteEntry> {
        if path.len() < 2 || path[0] != self.self_id {
            return None;
        }
        let destination = path[path.len() - 1].clone();
        let next_hop = path[1].clone();
        let hop_count = (path.len() - 1) as u32;
        let sequence_number = self.next_sequence;
        self.next_sequence += 1;
        self.cached_routes.insert(
            destination.clone(),
            RouteEntry {
                destination: destination.clone(),
                next_hop,
                hop_count,
                sequence_number,
                is_active: true,
            },
        );
        self.cached_routes.get(&destination)
    }

    /// The cached next hop for `destination`, if the cached route is
    /// still active and its next hop remains a current neighbor.
    pub fn cached_next_hop(&self, destination: &str) -> Option<Identity> {
        let entry = self.cached_routes.get(destination)?;
        if entry.is_active && self.is_neighbor(&entry.next_hop) {
            Some(entry.next_hop.clone())
        } else {
            None
        }
    }

    pub fn route_entry(&self, destination: &str) -> Option<&RouteEntry> {
        self.cached_routes.get(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_chain() -> NetworkView {
        // A - B - C - D
        let mut view = NetworkView::new();
        view.insert("a".into(), vec!["b".into()]);
        view.insert("b".into(), vec!["a".into(), "c".into()]);
        view.insert("c".into(), vec!["b".into(), "d".into()]);
        view.insert("d".into(), vec!["c".into()]);
        view
    }

    #[test]
    fn test_find_route_returns_self_for_self_destination() {
        let view = view_chain();
        let route = find_route("a", "a", &view).unwrap();
        assert_eq!(route, vec!["a".to_string()]);
    }

    #[test]
    fn test_find_route_shortest_path_over_chain() {
        let view = view_chain();
        let route = find_route("a", "d", &view).unwrap();
        assert_eq!(route, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_find_route_unreachable_returns_none() {
        let mut view = view_chain();
        view.insert("isolated".into(), vec![]);
        assert!(find_route("a", "isolated", &view).is_none());
    }

    #[test]
    fn test_find_route_unknown_destination_returns_none() {
        let view = view_chain();
        assert!(find_route("a", "ghost", &view).is_none());
    }

    #[test]
    fn test_find_route_prefers_shorter_of_two_paths() {
        // A directly connects to D, and also via B-C; shortest should win.
        let mut view = view_chain();
        view.get_mut("a").unwrap().push("d".into());
        view.get_mut("d").unwrap().push("a".into());
        let route = find_route("a", "d", &view).unwrap();
        assert_eq!(route, vec!["a", "d"]);
    }

    #[test]
    fn test_routing_table_merges_own_neighbors_into_view() {
        let mut table = RoutingTable::new("a".to_string());
        table.update_neighbors(&["b".to_string()], &[]);
        table.merge_view_entry("b".to_string(), vec!["a".to_string(), "c".to_string()]);
        table.merge_view_entry("c".to_string(), vec!["b".to_string()]);

        let route = table.find_route("c").unwrap();
        assert_eq!(route, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cache_route_then_lookup() {
        let mut table = RoutingTable::new("a".to_string());
        table.update_neighbors(&["b".to_string()], &[]);
        let path = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        table.cache_route(&path);

        assert_eq!(table.cached_next_hop("c"), Some("b".to_string()));
        assert_eq!(table.route_entry("c").unwrap().hop_count, 2);
    }

    #[test]
    fn test_cache_route_sequence_increases() {
        let mut table = RoutingTable::new("a".to_string());
        table.update_neighbors(&["b".to_string()], &[]);
        table.cache_route(&["a".to_string(), "b".to_string()]);
        table.cache_route(&["a".to_string(), "b".to_string(), "c".to_string()]);
        let seq1 = table.route_entry("b").unwrap().sequence_number;
        let seq2 = table.route_entry("c").unwrap().sequence_number;
        assert!(seq2 > seq1);
    }

    #[test]
    fn test_neighbor_leaving_marks_cached_route_inactive() {
        let mut table = RoutingTable::new("a".to_string());
        table.update_neighbors(&["b".to_string()], &[]);
        table.cache_route(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(table.cached_next_hop("c"), Some("b".to_string()));

        table.update_neighbors(&[], &["b".to_string()]);
        assert_eq!(table.cached_next_hop("c"), None);
        assert!(!table.route_entry("c").unwrap().is_active);
    }

    #[test]
    fn test_cache_route_rejects_path_not_starting_at_self() {
        let mut table = RoutingTable::new("a".to_string());
        let result = table.cache_route(&["x".to_string(), "y".to_string()]);
        assert!(result.is_none());
    }
}
