// src/storage/sqlite.rs — SQLite target database
//
// Plan checks use `EXPLAIN QUERY PLAN`, which compiles the statement without
// running it. The connection is switched to `query_only` so nothing that
// slips past validation can write.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::agents::{
    ColumnInfo, ExecutionOutcome, PlanOutcome, QueryRows, QueryStore, Row, SchemaCatalog,
    TableInfo,
};
use crate::infra::errors::QueryLoopError;

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    row_limit: usize,
}

#[derive(Default)]
struct CallState {
    cancelled: AtomicBool,
    running: AtomicBool,
}

/// Held by the awaiting future. Dropping it before the call completes (a
/// stage timeout, a cancelled session) interrupts the statement so it stops
/// holding the connection.
struct InterruptOnDrop {
    interrupt: Arc<InterruptHandle>,
    state: Arc<CallState>,
    finished: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
        if self.state.running.load(Ordering::SeqCst) {
            tracing::debug!("Interrupting abandoned sqlite statement");
            self.interrupt.interrupt();
        }
    }
}

impl SqliteDatabase {
    /// Open an existing database file read-only.
    pub fn open(path: &Path, row_limit: usize) -> Result<Self, QueryLoopError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn, row_limit)
    }

    /// Wrap an already-populated connection (tests, in-memory fixtures).
    pub fn from_connection(conn: Connection, row_limit: usize) -> Result<Self, QueryLoopError> {
        conn.execute_batch("PRAGMA query_only = ON;")?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            row_limit: row_limit.max(1),
        })
    }

    /// Run `f` against the connection on the blocking pool. If the caller
    /// stops waiting, a running statement is interrupted and a queued one is
    /// skipped.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, QueryLoopError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, QueryLoopError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let state = Arc::new(CallState::default());
        let mut on_drop = InterruptOnDrop {
            interrupt: Arc::clone(&self.interrupt),
            state: Arc::clone(&state),
            finished: false,
        };

        let result = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| QueryLoopError::collaborator("sqlite", "connection lock poisoned"))?;
            // `running` is published before `cancelled` is read; the drop
            // guard does the reverse, so one of the two always notices.
            state.running.store(true, Ordering::SeqCst);
            let out = if state.cancelled.load(Ordering::SeqCst) {
                Err(QueryLoopError::collaborator("sqlite", "call abandoned before it started"))
            } else {
                f(&guard)
            };
            state.running.store(false, Ordering::SeqCst);
            out
        })
        .await;

        on_drop.finished = true;
        result.map_err(|e| QueryLoopError::collaborator("sqlite", e))?
    }
}

fn check_plan_sync(conn: &Connection, query: &str) -> PlanOutcome {
    let explain = format!("EXPLAIN QUERY PLAN {query}");
    let result = conn.prepare(&explain).and_then(|mut stmt| {
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(())
    });
    match result {
        Ok(()) => PlanOutcome::Valid,
        Err(e) => PlanOutcome::Invalid(error_text(&e)),
    }
}

fn execute_sync(conn: &Connection, query: &str, row_limit: usize) -> ExecutionOutcome {
    let run = || -> rusqlite::Result<QueryRows> {
        let mut stmt = conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = QueryRows {
            columns: columns.clone(),
            rows: Vec::new(),
            truncated: false,
        };
        while let Some(row) = rows.next()? {
            if out.rows.len() >= row_limit {
                out.truncated = true;
                break;
            }
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            out.rows.push(record);
        }
        Ok(out)
    };
    match run() {
        Ok(rows) => ExecutionOutcome::Rows(rows),
        Err(e) => ExecutionOutcome::Failed(error_text(&e)),
    }
}

fn catalog_sync(conn: &Connection) -> rusqlite::Result<SchemaCatalog> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut col_stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = col_stmt
            .query_map([&name], |r| {
                Ok(ColumnInfo {
                    name: r.get(0)?,
                    data_type: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables.push(TableInfo { name, columns });
    }
    Ok(SchemaCatalog { tables })
}

/// SQLite's own message, without rusqlite's wrapper text.
fn error_text(e: &rusqlite::Error) -> String {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
        other => other.to_string(),
    }
}

fn to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[async_trait]
impl QueryStore for SqliteDatabase {
    async fn check_plan(&self, query: &str) -> Result<PlanOutcome, QueryLoopError> {
        let query = query.to_string();
        self.with_conn(move |conn| Ok(check_plan_sync(conn, &query)))
            .await
    }

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome, QueryLoopError> {
        let query = query.to_string();
        let limit = self.row_limit;
        self.with_conn(move |conn| Ok(execute_sync(conn, &query, limit)))
            .await
    }

    async fn catalog(&self) -> Result<Option<SchemaCatalog>, QueryLoopError> {
        self.with_conn(|conn| Ok(Some(catalog_sync(conn)?))).await
    }
}
