//! SQLite-backed event store: an `events` table plus a normalized
//! `event_tags` side table, opened through an `r2d2` connection pool so
//! every relay task gets its own connection without re-opening the file.

use super::{apply_limit, should_replace, sort_canonical, EventStore, Filter, StoreError};
use crate::event::{classify, Event, KindClass};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params_from_iter, types::Value as SqlValue, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    tags TEXT NOT NULL,
    content TEXT NOT NULL,
    sig TEXT NOT NULL,
    replacement_key TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
CREATE INDEX IF NOT EXISTS idx_events_pubkey_kind ON events(pubkey, kind);
CREATE INDEX IF NOT EXISTS idx_events_replacement_key ON events(replacement_key);

CREATE TABLE IF NOT EXISTS event_tags (
    event_id TEXT NOT NULL REFERENCES events(id),
    tag_letter TEXT NOT NULL,
    tag_value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_tags_letter_value ON event_tags(tag_letter, tag_value);
CREATE INDEX IF NOT EXISTS idx_event_tags_event_id ON event_tags(event_id);
";

/// A SQLite-backed [`EventStore`].
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (creating if absent) a SQLite database at `path` and run
    /// migrations. Reopening an existing file is non-destructive.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager)
            .map_err(|e| StoreError::Backend(format!("failed to create connection pool: {e}")))?;
        let conn = pool
            .get()
            .map_err(|e| StoreError::Backend(format!("failed to check out connection: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(format!("schema migration failed: {e}")))?;
        Ok(Self { pool })
    }

    /// An in-memory SQLite database, useful for tests that still want SQL
    /// semantics without touching disk.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Backend(format!("failed to create connection pool: {e}")))?;
        let conn = pool
            .get()
            .map_err(|e| StoreError::Backend(format!("failed to check out connection: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(format!("schema migration failed: {e}")))?;
        Ok(Self { pool })
    }

    fn replacement_key_string(event: &Event) -> Option<String> {
        event.replacement_key().map(|key| match key {
            crate::event::ReplacementKey::PubkeyKind(pubkey, kind) => {
                format!("{pubkey}:{kind}")
            }
            crate::event::ReplacementKey::PubkeyKindD(pubkey, kind, d) => {
                format!("{pubkey}:{kind}:{d}")
            }
        })
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<Vec<String>> = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(Event {
        id: row.get("id")?,
        pubkey: row.get("pubkey")?,
        created_at: row.get("created_at")?,
        kind: row.get::<_, i64>("kind")? as u32,
        tags,
        content: row.get("content")?,
        sig: row.get("sig")?,
    })
}

fn insert_event(
    conn: &rusqlite::Connection,
    event: &Event,
    replacement_key: Option<&str>,
) -> rusqlite::Result<()> {
    let tags_json = serde_json::to_string(&event.tags).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, tags, content, sig, replacement_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            event.id,
            event.pubkey,
            event.created_at,
            event.kind,
            tags_json,
            event.content,
            event.sig,
            replacement_key,
        ],
    )?;
    for tag in &event.tags {
        if let (Some(letter), Some(value)) = (tag.first(), tag.get(1)) {
            if letter.chars().count() == 1 {
                conn.execute(
                    "INSERT INTO event_tags (event_id, tag_letter, tag_value) VALUES (?1, ?2, ?3)",
                    rusqlite::params![event.id, letter, value],
                )?;
            }
        }
    }
    Ok(())
}

impl EventStore for SqliteStore {
    fn store(&self, event: &Event) -> Result<(), StoreError> {
        if matches!(classify(event.kind), KindClass::Ephemeral) {
            return Ok(());
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Backend(format!("failed to check out connection: {e}")))?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("failed to start transaction: {e}")))?;

        let replacement_key = Self::replacement_key_string(event);

        if let Some(key) = &replacement_key {
            let existing: Option<(String, i64)> = tx
                .query_row(
                    "SELECT id, created_at FROM events WHERE replacement_key = ?1",
                    rusqlite::params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| StoreError::Backend(format!("replacement lookup failed: {e}")))?;

            if let Some((existing_id, existing_created_at)) = existing {
                let incumbent = Event {
                    id: existing_id.clone(),
                    pubkey: event.pubkey.clone(),
                    created_at: existing_created_at,
                    kind: event.kind,
                    tags: vec![],
                    content: String::new(),
                    sig: String::new(),
                };
                if !should_replace(&incumbent, event) {
                    tx.commit()
                        .map_err(|e| StoreError::Backend(format!("commit failed: {e}")))?;
                    return Ok(());
                }
                tx.execute("DELETE FROM events WHERE id = ?1", rusqlite::params![existing_id])
                    .map_err(|e| StoreError::Backend(format!("replacement delete failed: {e}")))?;
                tx.execute(
                    "DELETE FROM event_tags WHERE event_id = ?1",
                    rusqlite::params![existing_id],
                )
                .map_err(|e| StoreError::Backend(format!("replacement tag delete failed: {e}")))?;
            }
            insert_event(&tx, event, Some(key.as_str()))
                .map_err(|e| StoreError::Backend(format!("insert failed: {e}")))?;
        } else {
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM events WHERE id = ?1",
                    rusqlite::params![event.id],
                    |_| Ok(true),
                )
                .optional()
                .map_err(|e| StoreError::Backend(format!("existence check failed: {e}")))?
                .unwrap_or(false);
            if !exists {
                insert_event(&tx, event, None)
                    .map_err(|e| StoreError::Backend(format!("insert failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| StoreError::Backend(format!("commit failed: {e}")))?;
        Ok(())
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Backend(format!("failed to check out connection: {e}")))?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for filter in filters {
            let (clause, values) = build_where_clause(filter);
            let sql = format!("SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE {clause}");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::Backend(format!("query preparation failed: {e}")))?;
            let rows = stmt
                .query_map(params_from_iter(values), row_to_event)
                .map_err(|e| StoreError::Backend(format!("query execution failed: {e}")))?;
            for row in rows {
                let event = row.map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;
                if seen.insert(event.id.clone()) {
                    results.push(event);
                }
            }
        }

        sort_canonical(&mut results);
        Ok(apply_limit(results, filters))
    }

    fn get(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Backend(format!("failed to check out connection: {e}")))?;
        conn.query_row(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE id = ?1",
            rusqlite::params![id],
            row_to_event,
        )
        .optional()
        .map_err(|e| StoreError::Backend(format!("point lookup failed: {e}")))
    }
}

/// Build a `WHERE` clause and its bound parameter list for a single filter.
/// Tag constraints are expressed as `EXISTS` subqueries against
/// `event_tags`, letting SQLite use the `(tag_letter, tag_value)` index.
fn build_where_clause(filter: &Filter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if !filter.ids.is_empty() {
        let ors: Vec<String> = filter
            .ids
            .iter()
            .map(|id| {
                values.push(SqlValue::Text(format!("{id}*")));
                // GLOB, not LIKE: SQLite's LIKE is ASCII case-insensitive by
                // default, which would match uppercase prefixes against
                // lowercase hex ids. GLOB is case-sensitive.
                "id GLOB ?".to_string()
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }

    if !filter.authors.is_empty() {
        let ors: Vec<String> = filter
            .authors
            .iter()
            .map(|author| {
                values.push(SqlValue::Text(format!("{author}*")));
                "pubkey GLOB ?".to_string()
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }

    if !filter.kinds.is_empty() {
        let ors: Vec<String> = filter
            .kinds
            .iter()
            .map(|kind| {
                values.push(SqlValue::Integer(*kind as i64));
                "kind = ?".to_string()
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }

    if let Some(since) = filter.since {
        values.push(SqlValue::Integer(since));
        clauses.push("created_at >= ?".to_string());
    }

    if let Some(until) = filter.until {
        values.push(SqlValue::Integer(until));
        clauses.push("created_at <= ?".to_string());
    }

    for (letter, wanted) in &filter.tags {
        let placeholders: Vec<String> = wanted.iter().map(|_| "?".to_string()).collect();
        values.push(SqlValue::Text(letter.to_string()));
        for value in wanted {
            values.push(SqlValue::Text(value.clone()));
        }
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM event_tags WHERE event_tags.event_id = events.id \
             AND event_tags.tag_letter = ? AND event_tags.tag_value IN ({}))",
            placeholders.join(", ")
        ));
    }

    if clauses.is_empty() {
        ("1 = 1".to_string(), values)
    } else {
        (clauses.join(" AND "), values)
    }
}
