//! Observation store: SQLite rows plus a parallel vector index keyed by
//! the same id.

pub mod types;

pub use types::{
    FilterError, NewObservation, NewPendingEvent, Observation, PendingEvent, SearchFilters,
};

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::embedding::EMBEDDING_DIM;

/// How many raw nearest-neighbor candidates to pull per requested result
/// when a post-filter will narrow them.
const FILTER_OVERFETCH: usize = 5;

/// SQLite-backed store for observations, their embeddings, and pending
/// events. One logical writer per instance; the connection sits behind a
/// mutex and is not shared across processes.
pub struct ObservationStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    conn: Connection,
    /// Last `created_at` handed out, to keep insert times monotonic
    /// non-decreasing even if the wall clock steps backwards.
    last_created_at: i64,
}

impl ObservationStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {parent:?}"))?;
        }
        info!(path = %path.display(), "Opening observation store");
        let conn = Connection::open(path).context("Failed to open store database")?;
        Self::from_connection(conn)
    }

    /// Ephemeral in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS observations (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL,
                 content TEXT NOT NULL,
                 project TEXT NOT NULL,
                 session_id TEXT,
                 timestamp INTEGER NOT NULL,
                 created_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS observation_embeddings (
                 id INTEGER PRIMARY KEY,
                 vector BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS pending_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_id TEXT NOT NULL,
                 project TEXT NOT NULL,
                 tool_name TEXT NOT NULL,
                 compressed TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 created_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_observations_project
                 ON observations(project);
             CREATE INDEX IF NOT EXISTS idx_observations_timestamp
                 ON observations(timestamp);
             CREATE INDEX IF NOT EXISTS idx_pending_events_session
                 ON pending_events(session_id, created_at);",
        )?;
        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                last_created_at: 0,
            }),
        })
    }

    /// Insert one observation and, when supplied, its embedding, in a
    /// single transaction. Returns the store-assigned id.
    ///
    /// The vector must be exactly [`EMBEDDING_DIM`] floats; anything else
    /// is a caller error, not a swallowed provider failure.
    pub fn insert_observation(
        &self,
        obs: &NewObservation,
        vector: Option<&[f32]>,
    ) -> Result<i64> {
        if let Some(vector) = vector {
            if vector.len() != EMBEDDING_DIM {
                anyhow::bail!(
                    "embedding must have {EMBEDDING_DIM} dimensions, got {}",
                    vector.len()
                );
            }
        }

        let mut guard = self.inner.lock().expect("store poisoned");
        let created_at = guard.last_created_at.max(Utc::now().timestamp_millis());

        let tx = guard.conn.transaction()?;
        tx.execute(
            "INSERT INTO observations (title, content, project, session_id, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                obs.title,
                obs.content,
                obs.project,
                obs.session_id,
                obs.timestamp,
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        if let Some(vector) = vector {
            tx.execute(
                "INSERT INTO observation_embeddings (id, vector) VALUES (?1, ?2)",
                params![id, encode_vector(vector)],
            )?;
        }
        tx.commit()?;

        guard.last_created_at = created_at;
        debug!(id, has_vector = vector.is_some(), "inserted observation");
        Ok(id)
    }

    /// Stage one raw event for later promotion. Returns its id.
    pub fn insert_pending_event(&self, event: &NewPendingEvent) -> Result<i64> {
        let mut guard = self.inner.lock().expect("store poisoned");
        let created_at = guard.last_created_at.max(Utc::now().timestamp_millis());
        guard.conn.execute(
            "INSERT INTO pending_events (session_id, project, tool_name, compressed, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.session_id,
                event.project,
                event.tool_name,
                event.compressed,
                event.timestamp,
                created_at
            ],
        )?;
        guard.last_created_at = created_at;
        Ok(guard.conn.last_insert_rowid())
    }

    /// Point lookup by id.
    pub fn get_observation(&self, id: i64) -> Result<Option<Observation>> {
        let guard = self.inner.lock().expect("store poisoned");
        get_observation_on(&guard.conn, id)
    }

    /// Staged events for one session, ascending by insert time.
    pub fn pending_events(&self, session_id: &str) -> Result<Vec<PendingEvent>> {
        let guard = self.inner.lock().expect("store poisoned");
        let mut stmt = guard.conn.prepare(
            "SELECT id, session_id, project, tool_name, compressed, timestamp, created_at
             FROM pending_events WHERE session_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([session_id], pending_event_from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// K-nearest search over the embedding table, ascending by cosine
    /// distance.
    ///
    /// Filters are applied after the nearest-neighbor pass, so whenever a
    /// narrowing filter is present the raw candidate pool is widened to
    /// 5 × `limit` to avoid truncating away rows the filter would keep.
    pub fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Observation, f32)>> {
        if query.len() != EMBEDDING_DIM {
            anyhow::bail!(
                "query embedding must have {EMBEDDING_DIM} dimensions, got {}",
                query.len()
            );
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let fetch = if filters.is_narrowing() {
            limit.saturating_mul(FILTER_OVERFETCH)
        } else {
            limit
        };

        let guard = self.inner.lock().expect("store poisoned");
        let mut stmt = guard
            .conn
            .prepare("SELECT id, vector FROM observation_embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut scored: Vec<(i64, f32)> = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let Some(vector) = decode_vector(&blob) else {
                warn!(id, "skipping embedding with unreadable vector");
                continue;
            };
            scored.push((id, cosine_distance(query, &vector)));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(fetch);

        let mut results = Vec::new();
        for (id, distance) in scored {
            if results.len() >= limit {
                break;
            }
            let Some(obs) = get_observation_on(&guard.conn, id)? else {
                continue;
            };
            if filters.matches(&obs) {
                results.push((obs, distance));
            }
        }
        Ok(results)
    }

    /// Case-insensitive substring search over title and content,
    /// descending by event timestamp. Filters are compiled into the query.
    pub fn keyword_search(
        &self,
        needle: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Observation>> {
        let pattern = format!("%{}%", escape_like(needle));
        let mut sql = String::from(
            "SELECT id, title, content, project, session_id, timestamp, created_at
             FROM observations
             WHERE (title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\')",
        );
        let mut bound: Vec<Value> = vec![Value::Text(pattern)];
        append_filter_sql(filters, &mut sql, &mut bound);
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let guard = self.inner.lock().expect("store poisoned");
        let mut stmt = guard.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bound), observation_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Newest observations by event timestamp, with the usual filters.
    pub fn recent(&self, limit: usize, filters: &SearchFilters) -> Result<Vec<Observation>> {
        let mut sql = String::from(
            "SELECT id, title, content, project, session_id, timestamp, created_at
             FROM observations WHERE 1 = 1",
        );
        let mut bound: Vec<Value> = Vec::new();
        append_filter_sql(filters, &mut sql, &mut bound);
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
        bound.push(Value::Integer(limit as i64));

        let guard = self.inner.lock().expect("store poisoned");
        let mut stmt = guard.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bound), observation_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn observation_count(&self) -> Result<u64> {
        let guard = self.inner.lock().expect("store poisoned");
        let count: i64 = guard
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn embedding_count(&self) -> Result<u64> {
        let guard = self.inner.lock().expect("store poisoned");
        let count: i64 = guard.conn.query_row(
            "SELECT COUNT(*) FROM observation_embeddings",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn get_observation_on(conn: &Connection, id: i64) -> Result<Option<Observation>> {
    let obs = conn
        .query_row(
            "SELECT id, title, content, project, session_id, timestamp, created_at
             FROM observations WHERE id = ?1",
            [id],
            observation_from_row,
        )
        .optional()?;
    Ok(obs)
}

fn append_filter_sql(filters: &SearchFilters, sql: &mut String, bound: &mut Vec<Value>) {
    if !filters.projects.is_empty() {
        let mut projects: Vec<&String> = filters.projects.iter().collect();
        projects.sort();
        sql.push_str(" AND project IN (");
        for (i, project) in projects.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            bound.push(Value::Text((*project).clone()));
        }
        sql.push(')');
    }
    if let Some(after) = filters.after_bound_ms() {
        sql.push_str(" AND timestamp >= ?");
        bound.push(Value::Integer(after));
    }
    if let Some(before) = filters.before_bound_ms() {
        sql.push_str(" AND timestamp < ?");
        bound.push(Value::Integer(before));
    }
    for file in &filters.files {
        sql.push_str(" AND instr(content, ?) > 0");
        bound.push(Value::Text(file.clone()));
    }
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        project: row.get(3)?,
        session_id: row.get(4)?,
        timestamp: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn pending_event_from_row(row: &Row<'_>) -> rusqlite::Result<PendingEvent> {
    Ok(PendingEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        tool_name: row.get(3)?,
        compressed: row.get(4)?,
        timestamp: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() != EMBEDDING_DIM * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
