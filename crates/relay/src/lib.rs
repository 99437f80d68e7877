//! Message Core: the send path, the receive path, the relay queue and
//! acknowledgment synthesis of §4.6, built on the Key Store, Ratchet
//! Session and Onion Wrapper from `meshphone-crypto`, the Energy
//! Ledger from `meshphone-energy` and the Routing Table from
//! `meshphone-routing`.

mod core;
mod queue;
mod seen;

pub use core::{CoreConfig, Counters, DropReason, MessageCore, ReceiveOutcome, SendOutcome};
pub use queue::{RelayQueue, RelayQueueEntry};
pub use seen::SeenSet;
