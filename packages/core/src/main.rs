use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use trial_access::api::{self, AppState};
use trial_access::cli::Cli;
use trial_access::config::Config;
use trial_access::db;
use trial_access::error::AppError;
use trial_access::logging::init_logging;
use trial_access::metrics::AppMetrics;
use trial_access::repository::TrialRepository;
use trial_access::scheduler::run_trial_sweeps;
use trial_access::trial::{TrialManager, TrialResolver};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run(Cli::parse()).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_env()
        .and_then(|config| config.with_cli(&cli))
        .map_err(AppError::Config)?;

    tracing::info!("Service starting with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let repository = Arc::new(TrialRepository::new(pool));
    let metrics = Arc::new(AppMetrics::new()?);

    let resolver = Arc::new(TrialResolver::new(repository.clone()).with_metrics(metrics.clone()));
    let manager = Arc::new(
        TrialManager::new(repository.clone(), repository.clone())
            .with_trial_days(config.trial_days)
            .with_metrics(metrics.clone()),
    );

    if !cli.no_sweeps {
        tokio::spawn(run_trial_sweeps(
            manager.clone(),
            Some(metrics.clone()),
            config.sweep_interval_seconds,
        ));
    }

    let app = api::build_router(AppState {
        resolver,
        manager,
        metrics,
        cron_token: config.cron_secret_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received. Stopping HTTP server.");
        })
        .await?;

    tracing::info!("Service stopped cleanly");
    Ok(())
}
