use std::net::SocketAddr;

use clap::Parser;

/// Trial Access service CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "trial-access",
    version,
    about = "Trial status resolution and lifecycle service"
)]
pub struct Cli {
    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Length of new trials in days (overrides TRIAL_DAYS)
    #[arg(long)]
    pub trial_days: Option<i64>,

    /// Seconds between expiry/reminder sweeps (overrides SWEEP_INTERVAL_SECONDS)
    #[arg(long)]
    pub sweep_interval: Option<u64>,

    /// Serve HTTP only, without the background sweep loop
    #[arg(long)]
    pub no_sweeps: bool,
}
