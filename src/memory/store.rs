// src/memory/store.rs — Session history persistence

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::core::types::{Session, SessionStatus};

/// One finished session as stored.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub request: String,
    pub status: SessionStatus,
    pub final_output: Option<String>,
    pub retry_count: u32,
    pub transitions: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRow {
    pub attempt_number: u32,
    pub candidate_query: String,
    pub passed: bool,
    pub failing_layer: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub strategy: Option<String>,
    pub row_count: Option<u64>,
    pub duration_ms: u64,
}

/// Aggregates over the whole history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryStats {
    pub total_sessions: u64,
    pub succeeded: u64,
    /// Session count per terminal status, most frequent first.
    pub by_status: Vec<(String, u64)>,
    /// Failed-attempt count per error kind, most frequent first.
    pub by_error_kind: Vec<(String, u64)>,
    pub mean_retries: f64,
}

impl HistoryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_sessions == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total_sessions as f64
    }
}

/// SQLite operations for the session history.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Writes --

    /// Store a finished session and its attempts. Re-recording the same
    /// session id replaces the earlier copy.
    pub fn record_session(&self, session: &Session) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session.id])?;
        tx.execute(
            "INSERT INTO sessions (id, request, status, final_output, retry_count,
             transitions, created_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.request,
                session.status().as_str(),
                session.final_output(),
                session.retry_count(),
                session.transitions(),
                session.created_at.to_rfc3339(),
                now,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO attempts (session_id, attempt_number, candidate_query, passed,
                 failing_layer, error_kind, error_message, strategy, row_count, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for a in session.attempts() {
                stmt.execute(params![
                    session.id,
                    a.attempt_number,
                    a.candidate_query,
                    !a.failed(),
                    a.failing_layer().map(|l| l.to_string()),
                    a.error_kind.map(|k| k.as_str()),
                    a.raw_error_message,
                    a.strategy.map(|s| s.to_string()),
                    a.row_count.map(|n| n as i64),
                    a.duration.as_millis() as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete all but the newest `keep` sessions. Returns rows removed.
    pub fn prune(&self, keep: usize) -> anyhow::Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sessions WHERE id NOT IN (
                SELECT id FROM sessions ORDER BY created_at DESC LIMIT ?1
             )",
            params![keep as i64],
        )?;
        Ok(removed)
    }

    // -- Reads --

    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, request, status, final_output, retry_count, transitions, created_at
             FROM sessions ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], read_session_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, request, status, final_output, retry_count, transitions, created_at
                 FROM sessions WHERE id = ?1",
                params![id],
                read_session_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn attempts(&self, session_id: &str) -> anyhow::Result<Vec<AttemptRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT attempt_number, candidate_query, passed, failing_layer, error_kind,
                    error_message, strategy, row_count, duration_ms
             FROM attempts WHERE session_id = ?1 ORDER BY attempt_number",
        )?;
        let rows = stmt
            .query_map(params![session_id], |r| {
                Ok(AttemptRow {
                    attempt_number: r.get(0)?,
                    candidate_query: r.get(1)?,
                    passed: r.get(2)?,
                    failing_layer: r.get(3)?,
                    error_kind: r.get(4)?,
                    error_message: r.get(5)?,
                    strategy: r.get(6)?,
                    row_count: r.get::<_, Option<i64>>(7)?.map(|n| n.max(0) as u64),
                    duration_ms: r.get::<_, i64>(8)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> anyhow::Result<HistoryStats> {
        let (total, mean_retries): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(retry_count) FROM sessions",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let by_status = self.grouped(
            "SELECT status, COUNT(*) AS n FROM sessions
             GROUP BY status ORDER BY n DESC, status",
        )?;
        let by_error_kind = self.grouped(
            "SELECT error_kind, COUNT(*) AS n FROM attempts
             WHERE error_kind IS NOT NULL
             GROUP BY error_kind ORDER BY n DESC, error_kind",
        )?;
        let succeeded = by_status
            .iter()
            .find(|(s, _)| s == SessionStatus::Succeeded.as_str())
            .map(|(_, n)| *n)
            .unwrap_or(0);

        Ok(HistoryStats {
            total_sessions: total.max(0) as u64,
            succeeded,
            by_status,
            by_error_kind,
            mean_retries: mean_retries.unwrap_or(0.0),
        })
    }

    fn grouped(&self, sql: &str) -> anyhow::Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn read_session_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let status: String = r.get(2)?;
    let created_at: String = r.get(6)?;
    Ok(SessionRow {
        id: r.get(0)?,
        request: r.get(1)?,
        // Unknown labels can only come from a newer build; show them as policy aborts.
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::AbortedPolicy),
        final_output: r.get(3)?,
        retry_count: r.get(4)?,
        transitions: r.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorKind, QueryAttempt, RetryStrategy, ValidationLayer, ValidationResult};
    use std::time::Duration;

    fn store() -> HistoryStore {
        crate::memory::in_memory().unwrap()
    }

    fn finished(request: &str, status: SessionStatus, failures: u32) -> Session {
        let mut s = Session::new(request);
        for n in 1..=failures {
            s.record_attempt(QueryAttempt {
                attempt_number: n,
                candidate_query: format!("SELECT bad{n} FROM t"),
                validation_result: Some(ValidationResult::fail(
                    ValidationLayer::ExecutionPlan,
                    format!("no such column: bad{n}"),
                )),
                error_kind: Some(ErrorKind::UnknownIdentifier),
                raw_error_message: Some(format!("no such column: bad{n}")),
                strategy: (n > 1).then_some(RetryStrategy::AddContext),
                row_count: None,
                duration: Duration::from_millis(12),
            });
        }
        if status == SessionStatus::Succeeded {
            let n = failures + 1;
            s.record_attempt(QueryAttempt {
                attempt_number: n,
                candidate_query: "SELECT 1".into(),
                validation_result: Some(ValidationResult::pass("ok")),
                error_kind: None,
                raw_error_message: None,
                strategy: (n > 1).then_some(RetryStrategy::CorrectSpecific),
                row_count: Some(1),
                duration: Duration::from_millis(3),
            });
        }
        s.finish(status, "done".into());
        s
    }

    // ─── Writes ─────────────────────────────────────────────────

    #[test]
    fn test_record_and_read_back() {
        let store = store();
        let s = finished("revenue by region", SessionStatus::Succeeded, 1);
        store.record_session(&s).unwrap();

        let row = store.get_session(&s.id).unwrap().unwrap();
        assert_eq!(row.request, "revenue by region");
        assert_eq!(row.status, SessionStatus::Succeeded);
        assert_eq!(row.retry_count, 1);

        let attempts = store.attempts(&s.id).unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].passed);
        assert_eq!(attempts[0].failing_layer.as_deref(), Some("EXECUTION_PLAN"));
        assert_eq!(attempts[0].error_kind.as_deref(), Some("UNKNOWN_IDENTIFIER"));
        assert!(attempts[1].passed);
        assert_eq!(attempts[1].strategy.as_deref(), Some("CORRECT_SPECIFIC"));
        assert_eq!(attempts[1].row_count, Some(1));
    }

    #[test]
    fn test_rerecord_replaces() {
        let store = store();
        let s = finished("q", SessionStatus::AbortedPolicy, 1);
        store.record_session(&s).unwrap();
        store.record_session(&s).unwrap();
        assert_eq!(store.recent(10).unwrap().len(), 1);
        assert_eq!(store.attempts(&s.id).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let store = store();
        for i in 0..4 {
            store
                .record_session(&finished(&format!("q{i}"), SessionStatus::Succeeded, 0))
                .unwrap();
        }
        assert_eq!(store.prune(2).unwrap(), 2);
        assert_eq!(store.recent(10).unwrap().len(), 2);
    }

    // ─── Reads ──────────────────────────────────────────────────

    #[test]
    fn test_missing_session() {
        assert!(store().get_session("nope").unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let store = store();
        store
            .record_session(&finished("a", SessionStatus::Succeeded, 0))
            .unwrap();
        store
            .record_session(&finished("b", SessionStatus::Succeeded, 2))
            .unwrap();
        store
            .record_session(&finished("c", SessionStatus::AbortedMaxRetries, 3))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.succeeded, 2);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        // retry counts: 0, 2, 2
        assert!((stats.mean_retries - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.by_status[0], ("SUCCEEDED".to_string(), 2));
        assert_eq!(stats.by_error_kind, vec![("UNKNOWN_IDENTIFIER".to_string(), 5)]);
    }

    #[test]
    fn test_empty_stats() {
        let stats = store().stats().unwrap();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.mean_retries, 0.0);
    }
}
