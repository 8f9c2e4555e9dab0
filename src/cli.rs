use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-tenant payments and incentives platform: ledger, sagas, bonus
/// engine, and realtime event fan-out behind one HTTP surface.
#[derive(Parser)]
#[command(name = "pay-flow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Directory holding the physical databases
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Redis URL for the event bus and the redis pending backend
        /// (falls back to $REDIS_URL)
        #[arg(long)]
        redis_url: Option<String>,

        /// Pending-operation backend: memory, jwt, or redis
        #[arg(long, default_value = "memory")]
        pending_backend: String,
    },

    /// Recompute ledger balances from the transaction log and report drift
    Reconcile {
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Physical database to reconcile (defaults to every file in the
        /// data dir)
        #[arg(long)]
        database: Option<String>,
    },

    /// Release expired holds and expire overdue bonuses
    Sweep {
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        database: Option<String>,
    },

    /// Output the JSON schema for the wire-facing domain types
    Schema,
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pay-flow")
}
