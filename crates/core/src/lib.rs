//! Shared data model, wire codec and external interface traits for the
//! mesh messaging core.
//!
//! Dependency-free of every other workspace crate so that crypto,
//! energy, routing and relay can each depend on it without forming a
//! cycle among themselves.

mod codec;
mod error;
mod interfaces;
mod types;

pub use codec::{decode, encode};
pub use error::{MeshError, Result};
pub use interfaces::{EmitOutcome, Link, Store};
pub use types::*;
