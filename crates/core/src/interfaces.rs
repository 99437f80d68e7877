//! External interfaces the core consumes.
//!
//! Concrete radio drivers, a cellular fallback transport, and on-disk
//! persistence are collaborators outside this workspace; the core makes
//! no assumption about them beyond these two traits. The Node
//! Coordinator is the only thing that owns a `Box<dyn Link>` /
//! `Box<dyn Store>` pair — no other component crate references these
//! traits, keeping the dispatch boundary exactly where §9's design
//! notes put it.

use crate::error::MeshError;
use crate::types::Identity;

/// Outcome of a single `Link::emit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Ok,
    NoLink,
    LinkError,
}

/// A byte-level link to named neighbors. A link may be backed by any
/// transport (short-range wireless, a cellular bridge); cost semantics
/// are opaque to the core.
pub trait Link: Send {
    /// Send bytes to a single named neighbor.
    fn emit(&mut self, to: &Identity, bytes: &[u8]) -> EmitOutcome;

    /// The identities currently reachable over this link.
    fn neighbors(&self) -> Vec<Identity>;

    /// Drain frames received since the last call, each tagged with the
    /// neighbor that sent it. Implementations that use a push-style
    /// callback internally are expected to buffer into this drain.
    fn drain_frames(&mut self) -> Vec<(Identity, Vec<u8>)>;

    /// Drain neighbor-set changes observed since the last call, as
    /// (added, removed).
    fn drain_neighbor_changes(&mut self) -> Vec<(Vec<Identity>, Vec<Identity>)>;
}

/// A minimal namespaced key/value blob store. Implementations are free
/// to encrypt blobs at rest; the core never assumes atomic multi-key
/// writes and writes each namespace independently.
pub trait Store: Send {
    fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MeshError>;
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MeshError>;
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), MeshError>;
    fn list(&self, namespace: &str) -> Result<Vec<String>, MeshError>;
}
