//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Shiori database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Completion records for saved chapters and downloaded assets
CREATE TABLE IF NOT EXISTS chapter_records (
    url TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    output_file_name TEXT NOT NULL,
    book TEXT NOT NULL,
    volume TEXT NOT NULL,
    failed INTEGER NOT NULL DEFAULT 0,
    next_url TEXT,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chapter_records_book ON chapter_records(book);
CREATE INDEX IF NOT EXISTS idx_chapter_records_failed ON chapter_records(failed);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
