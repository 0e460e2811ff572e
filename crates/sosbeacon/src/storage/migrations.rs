//! Database schema versioning for sosbeacon.
//!
//! Each migration is a list of statements applied inside one transaction
//! together with the version bump, so a database is never left half-migrated.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Ordered migrations. Version N is at index N - 1.
const MIGRATIONS: &[&[&str]] = &[
    // v1: initial schema
    SCHEMA_STATEMENTS,
];

/// The schema version this build expects.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const CURRENT_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the database schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if a migration fails or the database was written by a
/// newer build.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for (index, statements) in MIGRATIONS.iter().enumerate().skip(version_index(version)) {
        let target = i32::try_from(index + 1).map_err(|_| Error::DatabaseMigration {
            message: format!("migration index {index} out of range"),
        })?;
        apply(conn, target, statements)?;
    }

    Ok(())
}

fn version_index(version: i32) -> usize {
    usize::try_from(version).unwrap_or(0)
}

fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    debug!(version, "Applying schema migration");
    let tx = conn.transaction()?;
    for statement in statements {
        tx.execute(statement, [])?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    tx.commit()?;
    info!(version, "Schema migrated");
    Ok(())
}

/// Read the stored schema version; 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_initialize_schema_creates_tables() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("failed to initialize schema");

        assert!(table_exists(&conn, "sos_events"));
        assert!(table_exists(&conn, "metadata"));
    }

    #[test]
    fn test_initialize_schema_sets_version() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let mut conn = create_test_db();

        initialize_schema(&mut conn).expect("first init failed");
        initialize_schema(&mut conn).expect("second init failed");

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_schema_version_fresh_db() {
        let conn = create_test_db();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_invalid_schema_version() {
        let mut conn = create_test_db();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, 'abc')",
            [VERSION_KEY],
        )
        .unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("invalid schema version"));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = create_test_db();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
            (VERSION_KEY, (CURRENT_VERSION + 1).to_string()),
        )
        .unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_current_version_matches_migrations() {
        assert_eq!(version_index(CURRENT_VERSION), MIGRATIONS.len());
        assert!(CURRENT_VERSION >= 1);
    }

    #[test]
    fn test_indexes_created() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='sos_events'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.iter().any(|n| n.contains("created_at")));
        assert!(indexes.iter().any(|n| n.contains("user")));
    }
}
