//! Storage layer for sosbeacon.
//!
//! This module provides `SQLite`-based persistent storage for SOS events:
//! insertion, history listing and explicit deletion.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{NewSosEvent, SosEvent};

/// Columns selected for every event query, in `row_to_event` order.
const EVENT_COLUMNS: &str = "id, user_id, latitude, longitude, audio_url, created_at";

/// Persistent store of SOS events.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// then brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an SOS event and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, event: &NewSosEvent) -> Result<SosEvent> {
        let created_at = Utc::now().trunc_subsecs(6);

        self.conn.execute(
            r"
            INSERT INTO sos_events (user_id, latitude, longitude, audio_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                event.user_id,
                event.latitude,
                event.longitude,
                event.audio_url,
                format_timestamp(created_at),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, user_id = %event.user_id, "Inserted SOS event");
        Ok(SosEvent {
            id,
            user_id: event.user_id.clone(),
            latitude: event.latitude,
            longitude: event.longitude,
            audio_url: event.audio_url.clone(),
            created_at,
        })
    }

    /// Get an SOS event by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<SosEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM sos_events WHERE id = ?1");
        let event = self
            .conn
            .query_row(&sql, [id], Self::row_to_event)
            .optional()?;
        Ok(event)
    }

    /// Most recent events across all users, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<SosEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sos_events ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map([to_sql_limit(limit)], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Most recent events of one user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<SosEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sos_events WHERE user_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![user_id, to_sql_limit(limit)], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Count stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sos_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete an event by ID at the user's request.
    ///
    /// Returns `true` if an event was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sos_events WHERE id = ?1", [id])?;
        if affected > 0 {
            info!(id, "Deleted SOS event");
        }
        Ok(affected > 0)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_events = self.count()?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM sos_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_events,
            oldest_event: oldest.as_deref().and_then(parse_timestamp),
            newest_event: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    /// Convert a database row to an `SosEvent`.
    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<SosEvent> {
        let id: i64 = row.get(0)?;
        let created_at_str: String = row.get(5)?;

        let created_at = parse_timestamp(&created_at_str).unwrap_or_else(|| {
            warn!(id, value = %created_at_str, "Unparseable created_at, using epoch");
            DateTime::<Utc>::UNIX_EPOCH
        });

        Ok(SosEvent {
            id,
            user_id: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            audio_url: row.get(4)?,
            created_at,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of events stored.
    pub total_events: i64,
    /// Creation time of the oldest event.
    pub oldest_event: Option<DateTime<Utc>>,
    /// Creation time of the newest event.
    pub newest_event: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Fixed-width RFC 3339 so that text order is time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn new_event(user_id: &str, n: u32) -> NewSosEvent {
        NewSosEvent {
            user_id: user_id.to_string(),
            latitude: 12.9 + f64::from(n) * 0.001,
            longitude: 77.6,
            audio_url: format!("https://x/{user_id}/{n}.m4a"),
        }
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_insert_and_get() {
        let storage = create_test_storage();
        let inserted = storage.insert(&new_event("user-1", 0)).unwrap();

        let retrieved = storage.get(inserted.id).unwrap().unwrap();
        assert_eq!(retrieved, inserted);
        assert_eq!(retrieved.audio_url, "https://x/user-1/0.m4a");
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get(99999).unwrap().is_none());
    }

    #[test]
    fn test_list_recent_newest_first() {
        let storage = create_test_storage();
        let ids: Vec<i64> = (0..5)
            .map(|n| storage.insert(&new_event("user-1", n)).unwrap().id)
            .collect();

        let recent = storage.list_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, ids[4]);
        assert_eq!(recent[2].id, ids[2]);
    }

    #[test]
    fn test_list_recent_with_zero_limit() {
        let storage = create_test_storage();
        storage.insert(&new_event("user-1", 0)).unwrap();

        assert!(storage.list_recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_list_for_user() {
        let storage = create_test_storage();
        storage.insert(&new_event("alice", 0)).unwrap();
        storage.insert(&new_event("bob", 1)).unwrap();
        storage.insert(&new_event("alice", 2)).unwrap();

        let alice = storage.list_for_user("alice", 10).unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|e| e.user_id == "alice"));

        assert!(storage.list_for_user("carol", 10).unwrap().is_empty());
    }

    #[test]
    fn test_count() {
        let storage = create_test_storage();
        assert_eq!(storage.count().unwrap(), 0);

        storage.insert(&new_event("user-1", 0)).unwrap();
        storage.insert(&new_event("user-1", 1)).unwrap();

        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn test_delete() {
        let storage = create_test_storage();
        let id = storage.insert(&new_event("user-1", 0)).unwrap().id;

        assert!(storage.delete(id).unwrap());
        assert!(storage.get(id).unwrap().is_none());
        assert!(!storage.delete(id).unwrap());
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.total_events, 0);
        assert!(stats.oldest_event.is_none());
        assert!(stats.newest_event.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        let first = storage.insert(&new_event("user-1", 0)).unwrap();
        let second = storage.insert(&new_event("user-1", 1)).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.oldest_event, Some(first.created_at));
        assert_eq!(stats.newest_event, Some(second.created_at));
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_timestamp(Utc::now().trunc_subsecs(6));
        let b = format_timestamp(DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(a.len(), b.len());
        assert!(a.ends_with('Z'));
    }

    #[test]
    fn test_open_file_based() {
        let db_path = std::env::temp_dir().join(format!("sosbeacon_test_{}.db", std::process::id()));

        let storage = Storage::open(&db_path).unwrap();
        storage.insert(&new_event("user-1", 0)).unwrap();
        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(storage.path(), db_path);
        assert!(storage.stats().unwrap().db_size_bytes > 0);

        drop(storage);
        let reopened = Storage::open(&db_path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);

        drop(reopened);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("sosbeacon_nested_{}", std::process::id()));
        let nested_path = root.join("nested/db.sqlite");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_storage_stats_clone() {
        let stats = StorageStats {
            total_events: 5,
            oldest_event: None,
            newest_event: None,
            db_size_bytes: 512,
        };
        assert_eq!(stats.clone(), stats);
    }
}
