use std::env;
use std::net::SocketAddr;

use crate::cli::Cli;
use crate::trial::manager::{DEFAULT_TRIAL_DAYS, MAX_TRIAL_DAYS};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3600;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub trial_days: i64,
    pub sweep_interval_seconds: u64,
    pub cron_secret_token: Option<String>,
}

// The cron token is a secret and stays out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("bind_addr", &self.bind_addr)
            .field("trial_days", &self.trial_days)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field(
                "cron_secret_token",
                &self.cron_secret_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or("DATABASE_URL is required")?;

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|_| "BIND_ADDR must be a socket address like 0.0.0.0:8080")?;

        let trial_days = match lookup("TRIAL_DAYS") {
            Some(raw) => parse_trial_days(&raw)?,
            None => DEFAULT_TRIAL_DAYS,
        };

        let sweep_interval_seconds = match lookup("SWEEP_INTERVAL_SECONDS") {
            Some(raw) => parse_interval(&raw)?,
            None => DEFAULT_SWEEP_INTERVAL_SECONDS,
        };

        let cron_secret_token = lookup("CRON_SECRET_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            database_url,
            bind_addr,
            trial_days,
            sweep_interval_seconds,
            cron_secret_token,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(addr) = cli.bind {
            self.bind_addr = addr;
        }
        if let Some(days) = cli.trial_days {
            self.trial_days = trial_days_in_range(days, "--trial-days")?;
        }
        if let Some(secs) = cli.sweep_interval {
            if secs == 0 {
                return Err("--sweep-interval must be greater than zero".to_string());
            }
            self.sweep_interval_seconds = secs;
        }
        Ok(self)
    }
}

fn parse_trial_days(raw: &str) -> Result<i64, String> {
    let days = raw
        .parse::<i64>()
        .map_err(|_| "TRIAL_DAYS must be a valid number")?;
    trial_days_in_range(days, "TRIAL_DAYS")
}

fn parse_interval(raw: &str) -> Result<u64, String> {
    let secs = raw
        .parse::<u64>()
        .map_err(|_| "SWEEP_INTERVAL_SECONDS must be a valid number")?;
    if secs == 0 {
        return Err("SWEEP_INTERVAL_SECONDS must be greater than zero".to_string());
    }
    Ok(secs)
}

fn trial_days_in_range(days: i64, name: &str) -> Result<i64, String> {
    if !(1..=MAX_TRIAL_DAYS).contains(&days) {
        return Err(format!(
            "{} must be between 1 and {} days",
            name, MAX_TRIAL_DAYS
        ));
    }
    Ok(days)
}
