//! Node Coordinator: the application-facing surface of the mesh
//! messaging core (§6), composing the Key Store, Ratchet Session,
//! Onion Wrapper, Energy Ledger, Routing Table and Message Core into
//! one running node.

mod coordinator;
mod options;

pub use coordinator::{NodeCoordinator, SendResult};
pub use options::NodeOptions;
