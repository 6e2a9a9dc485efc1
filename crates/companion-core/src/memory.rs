//! SQLite-backed long-term memory store.
//!
//! Identity is `(category, key)`; `recall` ranks hits by
//! `importance * recency_decay(updated_at)` rather than recency alone, so an
//! old but important memory can outrank a fresh trivial one.

use rusqlite::{params, Connection};
use std::sync::Mutex;

use crate::error::{CoreError, CoreResult};

/// One remembered fact.
#[derive(Debug, Clone)]
pub struct Memory {
    pub category: String,
    pub key: String,
    pub value: String,
    pub importance: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn open(db_path: &str) -> CoreResult<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(db_path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let store = Self { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> CoreResult<()> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                importance REAL NOT NULL DEFAULT 0.5,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(category, key)
            );

            CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
            CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(updated_at);
            ",
        )?;
        Ok(())
    }

    /// Inserts or updates the memory identified by `(category, key)`.
    pub fn remember(&self, category: &str, key: &str, value: &str, importance: f64) -> CoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        let importance = importance.clamp(0.0, 1.0);
        let conn = self.conn.lock().expect("memory store mutex poisoned");

        conn.execute(
            "INSERT INTO memories (category, key, value, importance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(category, key) DO UPDATE SET
                value = excluded.value,
                importance = excluded.importance,
                updated_at = excluded.updated_at",
            params![category, key, value, importance, now],
        )?;
        Ok(())
    }

    pub fn get(&self, category: &str, key: &str) -> CoreResult<Option<Memory>> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT category, key, value, importance, created_at, updated_at
             FROM memories WHERE category = ?1 AND key = ?2",
        )?;

        let mut rows = stmt.query(params![category, key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_memory(row)?))
        } else {
            Ok(None)
        }
    }

    /// Case-insensitive substring match over `key` and `value`, optionally
    /// narrowed to `category`, ranked by `importance * recency_decay(updated_at)`
    /// with a 30-day exponential half-life.
    pub fn recall(&self, query_term: &str, category: Option<&str>, limit: usize) -> CoreResult<Vec<Memory>> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let pattern = format!("%{}%", query_term.to_lowercase());

        let mut memories: Vec<Memory> = match category {
            Some(category) => {
                let mut stmt = conn.prepare(
                    "SELECT category, key, value, importance, created_at, updated_at
                     FROM memories WHERE category = ?1 AND (lower(key) LIKE ?2 OR lower(value) LIKE ?2)",
                )?;
                stmt.query_map(params![category, pattern], row_to_memory)?.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT category, key, value, importance, created_at, updated_at
                     FROM memories WHERE lower(key) LIKE ?1 OR lower(value) LIKE ?1",
                )?;
                stmt.query_map(params![pattern], row_to_memory)?.collect::<Result<_, _>>()?
            }
        };

        let now = chrono::Utc::now().timestamp();
        memories.sort_by(|a, b| {
            let score_a = a.importance * recency_decay(a.updated_at, now);
            let score_b = b.importance * recency_decay(b.updated_at, now);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        memories.truncate(limit);
        Ok(memories)
    }

    pub fn recall_by_category(&self, category: &str, limit: usize) -> CoreResult<Vec<Memory>> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT category, key, value, importance, created_at, updated_at
             FROM memories WHERE category = ?1",
        )?;

        let now = chrono::Utc::now().timestamp();
        let mut memories: Vec<Memory> = stmt
            .query_map(params![category], row_to_memory)?
            .collect::<Result<_, _>>()?;

        memories.sort_by(|a, b| {
            let score_a = a.importance * recency_decay(a.updated_at, now);
            let score_b = b.importance * recency_decay(b.updated_at, now);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        memories.truncate(limit);
        Ok(memories)
    }

    pub fn recall_recent(&self, limit: usize) -> CoreResult<Vec<Memory>> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT category, key, value, importance, created_at, updated_at
             FROM memories ORDER BY updated_at DESC LIMIT ?1",
        )?;

        let memories = stmt
            .query_map(params![limit as i64], row_to_memory)?
            .collect::<Result<_, _>>()?;
        Ok(memories)
    }

    pub fn recall_important(&self, threshold: f64, limit: usize) -> CoreResult<Vec<Memory>> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT category, key, value, importance, created_at, updated_at
             FROM memories WHERE importance >= ?1 ORDER BY importance DESC LIMIT ?2",
        )?;

        let memories = stmt
            .query_map(params![threshold, limit as i64], row_to_memory)?
            .collect::<Result<_, _>>()?;
        Ok(memories)
    }

    /// Deletes memories older than `max_age_days` AND less important than
    /// `importance_threshold`. Returns the number of rows removed.
    pub fn forget_old(&self, max_age_days: i64, importance_threshold: f64) -> CoreResult<usize> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_days * 86_400;
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let removed = conn.execute(
            "DELETE FROM memories WHERE updated_at < ?1 AND importance < ?2",
            params![cutoff, importance_threshold],
        )?;
        Ok(removed)
    }

    pub fn count(&self) -> CoreResult<u64> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn clear_all(&self) -> CoreResult<()> {
        let conn = self.conn.lock().expect("memory store mutex poisoned");
        conn.execute("DELETE FROM memories", [])?;
        Ok(())
    }
}

/// Exponential recency decay with a 30-day half-life, `1.0` at `age == 0`.
fn recency_decay(updated_at: i64, now: i64) -> f64 {
    let age_days = ((now - updated_at).max(0) as f64) / 86_400.0;
    0.5f64.powf(age_days / 30.0)
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    Ok(Memory {
        category: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        importance: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_and_get_round_trip() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("user", "favorite_color", "teal", 0.7).unwrap();

        let memory = store.get("user", "favorite_color").unwrap().unwrap();
        assert_eq!(memory.value, "teal");
        assert!((memory.importance - 0.7).abs() < 1e-9);
    }

    #[test]
    fn remember_upserts_on_same_category_and_key() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("user", "favorite_color", "teal", 0.7).unwrap();
        store.remember("user", "favorite_color", "blue", 0.9).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let memory = store.get("user", "favorite_color").unwrap().unwrap();
        assert_eq!(memory.value, "blue");
    }

    #[test]
    fn recall_ranks_important_over_merely_recent() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("note", "trivial", "x", 0.1).unwrap();
        store.remember("note", "critical", "y", 0.95).unwrap();

        let top = store.recall("", None, 1).unwrap();
        assert_eq!(top[0].key, "critical");
    }

    #[test]
    fn recall_matches_substring_in_key_or_value_case_insensitively() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("user", "user_name", "Alice", 0.8).unwrap();
        store.remember("user", "favorite_food", "pizza", 0.6).unwrap();

        let by_key = store.recall("USER_nam", None, 5).unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].key, "user_name");

        let by_value = store.recall("PIZZA", None, 5).unwrap();
        assert_eq!(by_value.len(), 1);
        assert_eq!(by_value[0].key, "favorite_food");

        assert!(store.recall("nonexistent", None, 5).unwrap().is_empty());
    }

    #[test]
    fn recall_can_be_narrowed_to_a_category() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("user", "note", "likes tea", 0.5).unwrap();
        store.remember("preference", "note", "likes tea too", 0.5).unwrap();

        let hits = store.recall("tea", Some("user"), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "user");
    }

    #[test]
    fn forget_old_requires_both_age_and_low_importance() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("note", "old_important", "keep", 0.9).unwrap();
        store.remember("note", "old_trivial", "drop", 0.05).unwrap();

        {
            let conn = store.conn.lock().unwrap();
            let ancient = chrono::Utc::now().timestamp() - 400 * 86_400;
            conn.execute("UPDATE memories SET updated_at = ?1", params![ancient]).unwrap();
        }

        let removed = store.forget_old(365, 0.2).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("note", "old_important").unwrap().is_some());
        assert!(store.get("note", "old_trivial").unwrap().is_none());
    }
}
