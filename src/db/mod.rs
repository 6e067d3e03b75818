use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, PoisonError};

pub mod models;
use models::*;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and throwaway runs
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Results ──────────────────────────────────────────────────────────────

    /// Insert an announced result, returning its row id.
    /// A result without a timestamp is stamped with the current time.
    pub fn insert_result(&self, item: &ResultItem) -> Result<i64> {
        let announced_at = item.announced_at.unwrap_or_else(Utc::now);
        let conn = self.lock();
        conn.execute(
            "INSERT INTO results (
                category, competition, gender,
                first_name, first_team, second_name, second_team,
                announced_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                item.category,
                item.competition,
                item.gender,
                item.first_place.name,
                item.first_place.team,
                item.second_place.name,
                item.second_place.team,
                announced_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Overwrite an existing result. Returns false when no row has that id.
    pub fn update_result(&self, id: i64, item: &ResultItem) -> Result<bool> {
        let announced_at = item.announced_at.unwrap_or_else(Utc::now);
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE results SET
                category=?1, competition=?2, gender=?3,
                first_name=?4, first_team=?5, second_name=?6, second_team=?7,
                announced_at=?8
             WHERE id=?9",
            params![
                item.category,
                item.competition,
                item.gender,
                item.first_place.name,
                item.first_place.team,
                item.second_place.name,
                item.second_place.team,
                announced_at,
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// All results, most recently announced first
    pub fn list_results(&self) -> Result<Vec<ResultItem>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, category, competition, gender,
                    first_name, first_team, second_name, second_team,
                    announced_at
             FROM results ORDER BY announced_at DESC, id DESC",
        )?;
        let results = stmt
            .query_map([], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_result(row: &rusqlite::Row) -> rusqlite::Result<ResultItem> {
    let id: i64 = row.get(0)?;
    let item = ResultItem {
        id: Some(id.to_string()),
        category: row.get(1)?,
        competition: row.get(2)?,
        gender: row.get(3)?,
        first_place: Placement {
            name: row.get(4)?,
            team: row.get(5)?,
        },
        second_place: Placement {
            name: row.get(6)?,
            team: row.get(7)?,
        },
        announced_at: Some(row.get(8)?),
    };
    Ok(item.normalized())
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS results (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    category     TEXT    NOT NULL,
    competition  TEXT    NOT NULL,
    gender       TEXT,
    first_name   TEXT    NOT NULL DEFAULT '',
    first_team   TEXT    NOT NULL DEFAULT '',
    second_name  TEXT    NOT NULL DEFAULT '',
    second_team  TEXT    NOT NULL DEFAULT '',
    announced_at TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_announced ON results(announced_at);
"#;
