use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod dashboard;
mod db;
mod error;
mod live;
mod scoring;

use config::{Config, SourceKind};
use dashboard::AppState;
use db::Database;
use live::{RemoteSource, ResultSource, ResultStore, SqliteSource};
use scoring::{aggregate, standings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    let teams = config.team_names();

    // Build the result source
    let (source, announcer): (Arc<dyn ResultSource>, Option<Arc<SqliteSource>>) =
        match config.source {
            SourceKind::Sqlite => {
                let db = Database::open(&config.database_path)
                    .with_context(|| format!("Failed to open {}", config.database_path))?;
                info!("Database opened: {}", config.database_path);
                let sqlite = Arc::new(SqliteSource::new(db));
                let announcer = config.allow_announce.then(|| Arc::clone(&sqlite));
                (sqlite, announcer)
            }
            SourceKind::Remote => {
                // validate() guarantees the URL is present
                let url = config.remote_url.as_deref().unwrap_or_default();
                let remote = RemoteSource::new(
                    url,
                    Duration::from_secs(config.poll_interval_secs),
                    config.remote_ws_url.as_deref(),
                )?;
                info!("Reading results from {}", url);
                (Arc::new(remote), None)
            }
        };
    if announcer.is_some() {
        info!("Result announcements enabled on POST /api/results");
    }

    // Keep the scoreboard in sync with the source
    let store = Arc::new(ResultStore::new(source));
    let log_teams = teams.clone();
    let handle = store.start(
        move |items| {
            let table = standings(&aggregate(&items), &log_teams);
            let summary: Vec<String> = table
                .iter()
                .map(|s| format!("{} {}", s.team, s.score))
                .collect();
            info!(
                "Scoreboard updated: {} results ({})",
                items.len(),
                summary.join(", ")
            );
        },
        |err| error!("Scoreboard is stale: {}", err),
    );

    // Start the dashboard HTTP server
    let dashboard_state = AppState {
        store: Arc::clone(&store),
        refresh: handle.trigger(),
        announcer,
        teams,
        event_title: config.event_title.clone(),
    };
    let app = dashboard::router(dashboard_state);
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("Scoreboard listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run dashboard server until Ctrl-C
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    store.stop(handle);
    Ok(())
}
