//! Local driver for the Warden replication core.
//!
//! Not part of the core's specified surface (`spec.md` §6 names the traits
//! an embedding runtime implements; it doesn't name a binary). This exists
//! because the teacher ships a thin driver crate alongside its library
//! crates, and because the protocol needs *something* to wire an
//! `OverlayTransport` and a handful of `Replica`s together for a quick
//! local smoke test.

mod directory;
mod keygen;
mod network;
mod sim;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Deal per-replica signing keys and threshold-RSA shares for a local
    /// `N = 3f + 2k + 1` deployment, writing them where
    /// `warden_vsr::FileKeyStore` expects to find them.
    Keygen {
        /// Directory to write roster and per-replica key material into.
        out_dir: PathBuf,

        /// Byzantine faults the deployment tolerates.
        #[arg(long, default_value_t = 1)]
        f: u32,

        /// Simultaneously-unavailable correct replicas tolerated.
        #[arg(long, default_value_t = 0)]
        k: u32,
    },

    /// Run an in-process cluster of simulated replicas, submit a few
    /// client updates, and report how many executed across the cluster.
    Simulate {
        /// Byzantine faults the deployment tolerates.
        #[arg(long, default_value_t = 1)]
        f: u32,

        /// Simultaneously-unavailable correct replicas tolerated.
        #[arg(long, default_value_t = 0)]
        k: u32,

        /// Number of cooperative ticks to drain.
        #[arg(long, default_value_t = 200)]
        ticks: u32,

        /// Number of client updates to submit before the simulation starts.
        #[arg(long, default_value_t = 5)]
        client_updates: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("warden {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Keygen { out_dir, f, k } => keygen::run(&out_dir, f, k),
        Commands::Simulate { f, k, ticks, client_updates } => sim::run(f, k, ticks, client_updates),
    }
}
