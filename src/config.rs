use clap::{Parser, ValueEnum};
use url::Url;

/// Where announced results are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Local SQLite database; results are announced through the dashboard
    Sqlite,
    /// Remote HTTP JSON collection, polled and optionally pushed over WebSocket
    Remote,
}

/// Live scoreboard for the Meelad Fest house competition
#[derive(Parser, Debug, Clone)]
#[command(name = "meelad-scoreboard", version, about)]
pub struct Config {
    /// Result source
    #[arg(long, env = "RESULT_SOURCE", value_enum, default_value = "sqlite")]
    pub source: SourceKind,

    /// SQLite database path (sqlite source)
    #[arg(long, env = "DATABASE_PATH", default_value = "scoreboard.db")]
    pub database_path: String,

    /// URL of the remote results collection (remote source)
    #[arg(long, env = "REMOTE_RESULTS_URL")]
    pub remote_url: Option<String>,

    /// WebSocket change feed for the remote collection
    #[arg(long, env = "REMOTE_WS_URL")]
    pub remote_ws_url: Option<String>,

    /// Remote collection polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "5")]
    pub poll_interval_secs: u64,

    /// Dashboard listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// Competing teams, in score card order
    #[arg(long, env = "TEAMS", value_delimiter = ',', default_values = ["Yaqooth", "Marjaan"])]
    pub teams: Vec<String>,

    /// Heading shown on the scoreboard page
    #[arg(
        long,
        env = "EVENT_TITLE",
        default_value = "Hubbu Rasool - Meelad Fest 2025"
    )]
    pub event_title: String,

    /// Accept result announcements via POST /api/results (sqlite source only)
    #[arg(long, env = "ALLOW_ANNOUNCE", default_value = "false")]
    pub allow_announce: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.source {
            SourceKind::Remote => {
                let Some(url) = &self.remote_url else {
                    anyhow::bail!("REMOTE_RESULTS_URL is required with --source remote");
                };
                check_scheme(url, &["http", "https"])?;
                if let Some(ws) = &self.remote_ws_url {
                    check_scheme(ws, &["ws", "wss"])?;
                }
                if self.allow_announce {
                    anyhow::bail!("--allow-announce only works with --source sqlite");
                }
            }
            SourceKind::Sqlite => {
                if self.database_path.trim().is_empty() {
                    anyhow::bail!("database_path must not be empty");
                }
            }
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.teams.iter().all(|t| t.trim().is_empty()) {
            anyhow::bail!("at least one team must be configured");
        }
        Ok(())
    }

    /// Configured teams with blanks removed and whitespace trimmed.
    pub fn team_names(&self) -> Vec<String> {
        self.teams
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

fn check_scheme(raw: &str, allowed: &[&str]) -> anyhow::Result<()> {
    let url = Url::parse(raw).map_err(|e| anyhow::anyhow!("invalid URL '{}': {}", raw, e))?;
    if !allowed.contains(&url.scheme()) {
        anyhow::bail!(
            "URL '{}' must use one of: {}",
            raw,
            allowed.join(", ")
        );
    }
    Ok(())
}
