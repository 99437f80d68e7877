//! Energy-credit economic model: pricing, spam detection and periodic
//! rebalancing over per-node `EnergyAccount`s.

mod error;
mod ledger;

pub use error::{EnergyError, Result};
pub use ledger::EnergyLedger;
