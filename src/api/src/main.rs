//! RaceDB API
//!
//! REST API and CLI for race statistics, win-rate prediction and weight
//! optimization over a locally stored race collection.

mod cli;
mod config;
mod optimizer;
mod prediction;
mod routes;
mod stats;
mod storage;
mod strategy;
mod types;

use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::routes::AppState;
use crate::stats::RaceFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so CLI output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "racedb_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let db = cli.db.as_deref();
    match cli.command {
        Commands::Serve { host, port } => run_server(db, host, port).await,
        Commands::Stats {
            dimension,
            course,
            surface,
            distance,
            level,
            format,
        } => {
            let filter = RaceFilter::from_labels(&course, &surface, &distance, &level);
            cli::run_stats(db, &dimension, filter, &format)
        }
        Commands::Summary { format } => cli::run_summary(db, &format),
        Commands::Predict {
            input,
            weights,
            strategy,
            format,
        } => cli::run_predict(db, &input, &weights, strategy, &format),
        Commands::Optimize {
            surface,
            distance,
            course,
        } => cli::run_optimize(db, surface, distance, course),
        Commands::Import { input } => cli::run_import(db, &input),
        Commands::Export { output } => cli::run_export(db, output),
    }
}

/// Run the API server.
async fn run_server(
    db: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;

    // Override with CLI args
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(path) = db {
        config.storage.path = path.to_string_lossy().to_string();
    }

    tracing::info!("Configuration loaded");
    tracing::info!("Database: {}", config.storage.path);
    tracing::info!(
        "Prediction: {:?} confidence, top {}",
        config.prediction.confidence,
        config.prediction.top_recommendations
    );

    let repo = cli::open_repository(&config, None)?;
    tracing::info!("{} races in store", repo.race_count()?);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let state = Arc::new(AppState::new(repo, config));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
