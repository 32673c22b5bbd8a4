//! Schema for the per-folder database: `documents`, `chunks`,
//! `embeddings`, `file_states`, plus a schema-version row.

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS folder_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    path        TEXT PRIMARY KEY,
    size        INTEGER NOT NULL,
    mtime_unix  INTEGER NOT NULL,
    doc_type    TEXT NOT NULL,
    embedding   BLOB,
    keywords    TEXT
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id      TEXT PRIMARY KEY,
    document_path TEXT NOT NULL REFERENCES documents(path) ON DELETE CASCADE,
    ordinal       INTEGER NOT NULL,
    text          TEXT NOT NULL,
    token_count   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document_path ON chunks(document_path);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id  TEXT PRIMARY KEY REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    dimension INTEGER NOT NULL,
    vector    BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS file_states (
    path           TEXT PRIMARY KEY,
    content_hash   TEXT,
    state          TEXT NOT NULL,
    chunk_count    INTEGER NOT NULL DEFAULT 0,
    attempt_count  INTEGER NOT NULL DEFAULT 0,
    last_error     TEXT,
    first_seen_ms  INTEGER NOT NULL,
    updated_ms     INTEGER NOT NULL
);
"#;

pub fn init_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .ok();
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
        }
        Some(v) if v < CURRENT_SCHEMA_VERSION => {
            // No migrations defined yet beyond version 1; bump in place
            // once a future schema change needs one.
            conn.execute("UPDATE schema_version SET version = ?1", [CURRENT_SCHEMA_VERSION])?;
        }
        _ => {}
    }
    Ok(())
}
