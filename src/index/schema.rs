use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS index_metadata (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
  uid TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  category TEXT NOT NULL,
  file_path TEXT NOT NULL UNIQUE,
  project TEXT,
  tags_json TEXT NOT NULL DEFAULT '[]',
  content_hash TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  indexed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS links (
  source_uid TEXT NOT NULL,
  target_uid TEXT NOT NULL,
  kind TEXT NOT NULL DEFAULT 'internal',
  strength INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL,
  last_seen_at TEXT NOT NULL,
  PRIMARY KEY (source_uid, target_uid, kind)
);

CREATE INDEX IF NOT EXISTS links_target_idx ON links(target_uid);

CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
  uid UNINDEXED,
  title,
  content,
  tags,
  category UNINDEXED,
  project UNINDEXED,
  tokenize = 'porter'
);
"#,
    )?;

    let recorded: Option<String> = conn
        .query_row(
            "SELECT value FROM index_metadata WHERE key = 'schema_version' LIMIT 1",
            [],
            |row| row.get(0),
        )
        .ok();
    if recorded.as_deref() != Some(&SCHEMA_VERSION.to_string()) {
        conn.execute(
            "INSERT OR REPLACE INTO index_metadata(key, value) VALUES('schema_version', ?)",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}
