// src/memory/mod.rs — Session history database

pub mod schema;
pub mod store;

pub use store::HistoryStore;

use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the history database at the given path.
pub fn open(path: &Path) -> anyhow::Result<HistoryStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    schema::run_migrations(&conn)?;

    Ok(HistoryStore::new(conn))
}

/// Create an in-memory history (for testing).
pub fn in_memory() -> anyhow::Result<HistoryStore> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(HistoryStore::new(conn))
}
