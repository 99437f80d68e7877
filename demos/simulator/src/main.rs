//! A small binary that wires an in-memory `Link` and `Store` across
//! several `meshphone-node` instances and drives the seed scenarios of
//! the specification, interactively or in batch. Not part of the mesh
//! core itself — the mesh core never assumes anything about how its
//! `Link`/`Store` collaborators are implemented.

mod scenarios;
mod sim_link;
mod sim_store;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// meshphone simulator: run the specification's seed scenarios over an
/// in-memory mesh.
#[derive(Parser)]
#[command(name = "meshphone-simulator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging regardless of RUST_LOG.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one built-in seed scenario and print what happened.
    Scenario {
        /// Which scenario to run.
        #[arg(value_enum)]
        name: ScenarioName,
    },
    /// Run every built-in seed scenario in sequence.
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioName {
    /// Two direct neighbors: a one-hop send, delivery and ACK.
    DirectNeighbors,
    /// A four-node onion-routed chain with no relay plugged in.
    OnionRelay,
    /// The same chain, with the first relay plugged in (1.5x reward).
    OnionRelayPluggedIn,
    /// A sender whose balance is below the cost of a send.
    InsufficientEnergy,
}

fn run(name: ScenarioName) {
    match name {
        ScenarioName::DirectNeighbors => scenarios::scenario_direct_neighbors(),
        ScenarioName::OnionRelay => scenarios::scenario_three_hop_onion(None),
        ScenarioName::OnionRelayPluggedIn => scenarios::scenario_three_hop_onion(Some("b")),
        ScenarioName::InsufficientEnergy => scenarios::scenario_insufficient_energy(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        meshphone_logging::init_with_default_level("debug");
    } else {
        meshphone_logging::init();
    }

    match cli.command {
        Commands::Scenario { name } => run(name),
        Commands::All => {
            run(ScenarioName::DirectNeighbors);
            run(ScenarioName::OnionRelay);
            run(ScenarioName::OnionRelayPluggedIn);
            run(ScenarioName::InsufficientEnergy);
        }
    }

    Ok(())
}
