use crate::connection::map_sqlite_err;
use keel_core::error::{KeelError, Result};
use rusqlite::Connection;

/// Current schema version, recorded in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    message_position INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    contract_name TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    payload BLOB NOT NULL,
    metadata BLOB,
    created_at INTEGER NOT NULL,
    CONSTRAINT uq_streams_name_version UNIQUE (name, version)
);

CREATE INDEX IF NOT EXISTS idx_streams_name_created_at
    ON streams(name, created_at);

CREATE TABLE IF NOT EXISTS streams_stats (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    max_message_position INTEGER NOT NULL DEFAULT 0,
    count_of_all_messages INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO streams_stats (id, max_message_position, count_of_all_messages)
VALUES (0, 0, 0);

CREATE TRIGGER IF NOT EXISTS trg_streams_after_insert AFTER INSERT ON streams
BEGIN
    UPDATE streams_stats
    SET max_message_position = MAX(max_message_position, NEW.message_position),
        count_of_all_messages = count_of_all_messages + 1
    WHERE id = 0;
END;

CREATE TRIGGER IF NOT EXISTS trg_streams_after_delete AFTER DELETE ON streams
BEGIN
    UPDATE streams_stats
    SET count_of_all_messages = count_of_all_messages - 1
    WHERE id = 0;
END;

CREATE TABLE IF NOT EXISTS streams_metadata (
    name TEXT PRIMARY KEY,
    metadata_version INTEGER NOT NULL,
    payload BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS streams_projection_checkpoints (
    projector_name TEXT NOT NULL,
    projection_name TEXT NOT NULL,
    message_position INTEGER NOT NULL DEFAULT 0,
    dropped_at INTEGER,
    PRIMARY KEY (projector_name, projection_name)
);
"#;

/// Install the schema if needed
///
/// Idempotent: every statement is `IF NOT EXISTS` / `OR IGNORE`. Refuses to
/// open a database written by a newer schema.
pub fn install(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(KeelError::Config(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;

    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(map_sqlite_err)?;
        tracing::debug!(
            from = current,
            to = SCHEMA_VERSION,
            "Installed message store schema"
        );
    }

    Ok(())
}

/// Read the schema version
pub fn schema_version(conn: &Connection) -> Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get::<_, u32>(0))
        .map_err(map_sqlite_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        install(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM streams_stats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_stats_follow_inserts_and_deletes() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();

        for version in 1..=3 {
            conn.execute(
                "INSERT INTO streams (name, version, message_id, contract_name, correlation_id, payload, created_at)
                 VALUES ('s', ?1, 'id', 'c', 'corr', x'00', 0)",
                [version],
            )
            .unwrap();
        }
        conn.execute("DELETE FROM streams WHERE version = 3", [])
            .unwrap();

        let (max, count): (i64, i64) = conn
            .query_row(
                "SELECT max_message_position, count_of_all_messages FROM streams_stats WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(max, 3);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(install(&conn), Err(KeelError::Config(_))));
    }
}
