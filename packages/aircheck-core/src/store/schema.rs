//! Database schema creation and connection setup.

use rusqlite::Connection;

/// Schema version recorded in `user_version`; bump when DDL changes.
const SCHEMA_VERSION: i64 = 1;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS play_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    kind          TEXT NOT NULL CHECK (kind IN ('song', 'dj')),
    epoch_ms      INTEGER NOT NULL,
    title         TEXT NOT NULL,
    artist        TEXT NOT NULL DEFAULT '',
    album         TEXT NOT NULL DEFAULT '',
    source_uri    TEXT,
    artwork_key   TEXT,
    tts_entry_id  INTEGER REFERENCES tts_artifacts(id) ON DELETE SET NULL,
    extra         TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_play_events_epoch_ms ON play_events(epoch_ms);
CREATE INDEX IF NOT EXISTS idx_play_events_tts_entry_id ON play_events(tts_entry_id);

CREATE TABLE IF NOT EXISTS tts_artifacts (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    epoch_ms         INTEGER NOT NULL UNIQUE,
    text             TEXT NOT NULL,
    audio_path       TEXT NOT NULL,
    transcript_path  TEXT,
    track_title      TEXT NOT NULL DEFAULT '',
    track_artist     TEXT NOT NULL DEFAULT '',
    mode             TEXT NOT NULL CHECK (mode IN ('intro', 'outro', 'custom')),
    status           TEXT NOT NULL CHECK (status IN ('pending', 'ready', 'failed', 'garbage')),
    size_bytes       INTEGER NOT NULL DEFAULT 0,
    duration_ms      INTEGER,
    created_ms       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tts_artifacts_status ON tts_artifacts(status);

CREATE TABLE IF NOT EXISTS artwork_cache (
    cache_key     TEXT PRIMARY KEY,
    artist        TEXT NOT NULL DEFAULT '',
    album         TEXT NOT NULL DEFAULT '',
    source_uri    TEXT,
    local_path    TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL,
    cached_at     INTEGER NOT NULL,
    last_used_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artwork_cache_last_used ON artwork_cache(last_used_at);
"#;

/// Applies connection pragmas shared by readers and writers.
pub(super) fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Creates tables and indexes; idempotent.
pub(super) fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_twice_without_error() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn kind_check_constraint_rejects_unknown_values() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO play_events (kind, epoch_ms, title) VALUES ('jingle', 0, 'x')",
            [],
        );
        assert!(result.is_err());
    }
}
