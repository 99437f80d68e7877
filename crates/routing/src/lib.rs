//! Routing Table: the neighbor set, the merged network view, cached
//! routes and breadth-first shortest-path discovery over that view.

mod table;

pub use table::{find_route, NetworkView, RoutingTable};
