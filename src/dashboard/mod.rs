use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::db::models::{Placement, ResultItem, CATEGORIES, GENDERS};
use crate::live::{RefreshTrigger, ResultStore, SqliteSource, SyncStatus};
use crate::scoring::{aggregate, standings, ResultFilter, ScoreMap, TeamStanding};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ResultStore>,
    pub refresh: RefreshTrigger,
    /// Present only when announcing through the dashboard is enabled
    pub announcer: Option<Arc<SqliteSource>>,
    pub teams: Vec<String>,
    pub event_title: String,
}

/// Build the Axum router for the dashboard.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/scoreboard", get(scoreboard_handler))
        .route("/api/results", get(results_handler).post(announce_handler))
        .route("/api/results/:id", put(amend_handler))
        .route("/api/scores", get(scores_handler))
        .route("/api/status", get(status_handler))
        .route("/api/refresh", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Announcing results is disabled")]
    AnnounceDisabled,

    #[error("Invalid result: {0}")]
    InvalidResult(String),

    #[error("Result {0} not found")]
    NotFound(i64),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::AnnounceDisabled => StatusCode::FORBIDDEN,
            ApiError::InvalidResult(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

// ── Filtering ──────────────────────────────────────────────────────────────────

/// `?categories=Junior,Senior&genders=Boys&q=quran`
///
/// An absent list selects everything; a present but empty one selects nothing.
#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    pub categories: Option<String>,
    pub genders: Option<String>,
    pub q: Option<String>,
}

impl ResultQuery {
    pub fn to_filter(&self) -> ResultFilter {
        ResultFilter {
            categories: parse_selection(self.categories.as_deref(), CATEGORIES),
            genders: parse_selection(self.genders.as_deref(), GENDERS),
            query: self.q.clone().unwrap_or_default(),
        }
    }
}

fn parse_selection(raw: Option<&str>, all: &[&str]) -> HashSet<String> {
    match raw {
        None => all.iter().map(|s| s.to_string()).collect(),
        Some(list) => list
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct Scoreboard {
    pub event_title: String,
    /// Score card over every announced result
    pub standings: Vec<TeamStanding>,
    /// Scores over the filtered results only
    pub filtered_scores: ScoreMap,
    pub results: Vec<ResultItem>,
    pub total_results: usize,
    pub filtered: bool,
}

pub fn build_scoreboard(
    items: &[ResultItem],
    filter: &ResultFilter,
    teams: &[String],
    event_title: &str,
) -> Scoreboard {
    let results = filter.apply(items);
    Scoreboard {
        event_title: event_title.to_string(),
        standings: standings(&aggregate(items), teams),
        filtered_scores: aggregate(&results),
        total_results: items.len(),
        filtered: !filter.is_pass_through(),
        results,
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

/// Serve the scoreboard page with the event title filled in.
async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(SCOREBOARD_HTML.replace("{{EVENT_TITLE}}", &escape_html(&state.event_title)))
}

/// GET /api/scoreboard
async fn scoreboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultQuery>,
) -> Json<Scoreboard> {
    let items = state.store.snapshot();
    Json(build_scoreboard(
        &items,
        &query.to_filter(),
        &state.teams,
        &state.event_title,
    ))
}

/// GET /api/results
async fn results_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultQuery>,
) -> Json<Vec<ResultItem>> {
    Json(query.to_filter().apply(&state.store.snapshot()))
}

/// GET /api/scores
async fn scores_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TeamStanding>> {
    Json(standings(&aggregate(&state.store.snapshot()), &state.teams))
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.store.status())
}

/// POST /api/refresh
async fn refresh_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.refresh.request() {
        StatusCode::ACCEPTED
    } else {
        warn!("Refresh requested but the result subscription is not running");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Deserialize)]
pub struct AnnounceRequest {
    pub category: String,
    pub competition: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(alias = "firstPlace")]
    pub first_place: Placement,
    #[serde(alias = "secondPlace")]
    pub second_place: Placement,
    /// Defaults to now
    #[serde(default)]
    pub announced_at: Option<DateTime<Utc>>,
}

impl AnnounceRequest {
    pub fn into_result(self) -> Result<ResultItem, ApiError> {
        if !CATEGORIES.contains(&self.category.as_str()) {
            return Err(ApiError::InvalidResult(format!(
                "unknown category '{}'",
                self.category
            )));
        }
        let item = ResultItem {
            id: None,
            category: self.category,
            competition: self.competition.trim().to_string(),
            gender: self.gender,
            first_place: self.first_place,
            second_place: self.second_place,
            announced_at: Some(self.announced_at.unwrap_or_else(Utc::now)),
        }
        .normalized();
        if item.competition.is_empty() {
            return Err(ApiError::InvalidResult("competition is required".into()));
        }
        if let Some(g) = &item.gender {
            if !GENDERS.contains(&g.as_str()) {
                return Err(ApiError::InvalidResult(format!("unknown gender '{}'", g)));
            }
        }
        if item.first_place.name.trim().is_empty() {
            return Err(ApiError::InvalidResult("first place needs a name".into()));
        }
        Ok(item)
    }
}

#[derive(Debug, Serialize)]
struct Announced {
    id: i64,
}

/// POST /api/results
async fn announce_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnnounceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let announcer = state.announcer.as_ref().ok_or(ApiError::AnnounceDisabled)?;
    let item = req.into_result()?;
    let id = announcer.announce(&item)?;
    Ok((StatusCode::CREATED, Json(Announced { id })))
}

/// PUT /api/results/:id
async fn amend_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AnnounceRequest>,
) -> Result<StatusCode, ApiError> {
    let announcer = state.announcer.as_ref().ok_or(ApiError::AnnounceDisabled)?;
    let item = req.into_result()?;
    if announcer.amend(id, &item)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(id))
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Embedded single-file scoreboard (HTML + CSS + JS)
const SCOREBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{EVENT_TITLE}}</title>
<style>
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { font-family: system-ui, sans-serif; padding: 1.5rem; background: #fafafa; color: #111; }
  h1 { font-size: 2rem; }
  .card { margin: 2rem auto; width: 300px; border-radius: 16px; overflow: hidden; }
  .team { display: flex; flex-direction: column; align-items: center; padding: 1.5rem; }
  .team:nth-child(1) { background: #facc15; }
  .team:nth-child(2) { background: #16a34a; color: #fff; }
  .team .name { font-size: 1.2rem; font-weight: 600; }
  .team .score { font-size: 3rem; font-weight: 700; }
  section { max-width: 42rem; margin: 2rem auto; }
  .controls { display: flex; flex-wrap: wrap; gap: .5rem; margin-bottom: 1rem; }
  .controls input[type=text] { flex: 1; padding: .4rem .6rem; border: 1px solid #ccc; border-radius: 6px; }
  .result { border: 1px solid #ddd; border-radius: 8px; margin-bottom: .75rem; overflow: hidden; }
  .result button { width: 100%; text-align: left; padding: .75rem 1rem; background: #f1f1f1; border: none; cursor: pointer; font-size: 1rem; }
  .result .detail { padding: .75rem 1rem; display: none; background: #fff; }
  .result.open .detail { display: block; }
  .place { margin: .25rem 0; }
  .place .team-name { color: #555; font-size: .85rem; }
  .empty { color: #888; text-align: center; padding: 1rem; }
  .status { color: #888; font-size: .8rem; text-align: center; }
</style>
</head>
<body>
<h1>{{EVENT_TITLE}}</h1>
<div class="card" id="card"></div>

<section>
  <h2>Announced Results</h2>
  <div class="controls">
    <input type="text" id="search" placeholder="Search results...">
  </div>
  <div class="controls" id="category-filters"></div>
  <div class="controls" id="gender-filters"></div>
  <div id="results"><p class="empty">Loading…</p></div>
  <p class="status" id="status"></p>
</section>

<script>
const CATEGORIES = ["Kiddies", "Children", "Sub-Junior", "Junior", "Senior", "General"];
const GENDERS = ["Boys", "Girls"];
const selected = { categories: new Set(CATEGORIES), genders: new Set(GENDERS) };
const expanded = new Set();

function checkboxes(containerId, values, set) {
  const box = document.getElementById(containerId);
  values.forEach(v => {
    const label = document.createElement('label');
    const input = document.createElement('input');
    input.type = 'checkbox';
    input.checked = true;
    input.onchange = () => { input.checked ? set.add(v) : set.delete(v); load(); };
    label.append(input, ' ' + v);
    box.append(label);
  });
}

function el(tag, cls, text) {
  const e = document.createElement(tag);
  if (cls) e.className = cls;
  if (text !== undefined) e.textContent = text;
  return e;
}

function renderCard(standings) {
  const card = document.getElementById('card');
  card.replaceChildren(...standings.map(s => {
    const t = el('div', 'team');
    t.append(el('span', 'name', s.team), el('span', 'score', s.score));
    return t;
  }));
}

function renderResults(results) {
  const box = document.getElementById('results');
  if (!results.length) { box.replaceChildren(el('p', 'empty', 'No results found.')); return; }
  box.replaceChildren(...results.map(r => {
    const key = r.id || (r.competition + r.category + (r.gender || ''));
    const wrap = el('div', 'result' + (expanded.has(key) ? ' open' : ''));
    const title = r.competition + ' - ' + r.category + (r.gender ? ' (' + r.gender + ')' : '');
    const btn = el('button', null, title);
    btn.onclick = () => { expanded.has(key) ? expanded.delete(key) : expanded.add(key); wrap.classList.toggle('open'); };
    const detail = el('div', 'detail');
    [['🥇', r.first_place], ['🥈', r.second_place]].forEach(([medal, p]) => {
      const row = el('div', 'place');
      row.append(el('div', null, medal + ' ' + (p.name || '–')), el('div', 'team-name', p.team || ''));
      detail.append(row);
    });
    wrap.append(btn, detail);
    return wrap;
  }));
}

async function load() {
  const params = new URLSearchParams({
    categories: [...selected.categories].join(','),
    genders: [...selected.genders].join(','),
    q: document.getElementById('search').value,
  });
  const r = await fetch('/api/scoreboard?' + params);
  if (!r.ok) return;
  const board = await r.json();
  renderCard(board.standings);
  renderResults(board.results);
  document.getElementById('status').textContent =
    board.results.length + ' of ' + board.total_results + ' results · updated ' + new Date().toLocaleTimeString();
}

checkboxes('category-filters', CATEGORIES, selected.categories);
checkboxes('gender-filters', GENDERS, selected.genders);
document.getElementById('search').oninput = load;
load();
setInterval(load, 3000);
</script>
</body>
</html>"#;
