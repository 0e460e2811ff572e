//! `SQLite` schema definitions for sosbeacon.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the SOS events table.
pub const CREATE_SOS_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sos_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    audio_url TEXT NOT NULL,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `created_at` for history listing.
pub const CREATE_CREATED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sos_events_created_at ON sos_events(created_at DESC)
";

/// SQL statement to create an index on `user_id` for per-user history.
pub const CREATE_USER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sos_events_user ON sos_events(user_id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SOS_EVENTS_TABLE,
    CREATE_CREATED_AT_INDEX,
    CREATE_USER_INDEX,
    CREATE_METADATA_TABLE,
];
