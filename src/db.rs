use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open cache {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sheet_cache (
            source_id  TEXT NOT NULL,
            tab        TEXT NOT NULL,
            url        TEXT NOT NULL,
            body       TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (source_id, tab)
        );

        CREATE TABLE IF NOT EXISTS fetch_log (
            id           INTEGER PRIMARY KEY,
            source_id    TEXT NOT NULL,
            tab          TEXT NOT NULL,
            url          TEXT NOT NULL,
            error        TEXT,
            latency_ms   INTEGER,
            attempted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fetch_log_source ON fetch_log(source_id, tab);
        ",
    )?;
    Ok(())
}

pub struct CachedSheet {
    pub url: String,
    pub body: String,
    pub age_secs: i64,
}

/// Raw body for (source, tab) if it was stored less than `ttl_secs` ago.
pub fn cached_sheet(
    conn: &Connection,
    source_id: &str,
    tab: &str,
    ttl_secs: u64,
    now: i64,
) -> Result<Option<CachedSheet>> {
    let row = conn
        .query_row(
            "SELECT url, body, fetched_at FROM sheet_cache WHERE source_id = ?1 AND tab = ?2",
            params![source_id, tab],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;

    Ok(row.and_then(|(url, body, fetched_at)| {
        let age_secs = now - fetched_at;
        (age_secs >= 0 && (age_secs as u64) < ttl_secs).then_some(CachedSheet { url, body, age_secs })
    }))
}

pub fn store_sheet(conn: &Connection, source_id: &str, tab: &str, url: &str, body: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sheet_cache (source_id, tab, url, body, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(source_id, tab) DO UPDATE SET
            url = excluded.url, body = excluded.body, fetched_at = excluded.fetched_at",
        params![source_id, tab, url, body, now],
    )?;
    Ok(())
}

/// Drop cached bodies for one tab, or all tabs. Returns rows removed.
pub fn invalidate(conn: &Connection, tab: Option<&str>) -> Result<usize> {
    let n = match tab {
        Some(tab) => conn.execute("DELETE FROM sheet_cache WHERE tab = ?1", params![tab])?,
        None => conn.execute("DELETE FROM sheet_cache", [])?,
    };
    Ok(n)
}

pub struct AttemptRow<'a> {
    pub source_id: &'a str,
    pub tab: &'a str,
    pub url: &'a str,
    pub error: Option<&'a str>,
    pub latency_ms: i64,
}

pub fn log_attempts(conn: &Connection, rows: &[AttemptRow], now: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO fetch_log (source_id, tab, url, error, latency_ms, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for r in rows {
            stmt.execute(params![r.source_id, r.tab, r.url, r.error, r.latency_ms, now])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub struct CacheStatusRow {
    pub source_id: String,
    pub tab: String,
    pub cached_at: Option<i64>,
    pub last_url: String,
    pub last_error: Option<String>,
    pub last_attempt_at: i64,
}

/// Latest attempt per (source, tab), joined with the cache entry if any.
pub fn cache_status(conn: &Connection) -> Result<Vec<CacheStatusRow>> {
    let mut stmt = conn.prepare(
        "SELECT l.source_id, l.tab, c.fetched_at, l.url, l.error, l.attempted_at
         FROM fetch_log l
         LEFT JOIN sheet_cache c ON c.source_id = l.source_id AND c.tab = l.tab
         WHERE l.id = (
            SELECT MAX(id) FROM fetch_log x WHERE x.source_id = l.source_id AND x.tab = l.tab
         )
         ORDER BY l.tab, l.source_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CacheStatusRow {
                source_id: row.get(0)?,
                tab: row.get(1)?,
                cached_at: row.get(2)?,
                last_url: row.get(3)?,
                last_error: row.get(4)?,
                last_attempt_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
