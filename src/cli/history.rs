// src/cli/history.rs — `queryloop history`: recent sessions and stats

use crate::infra::config::Config;
use crate::memory;
use crate::memory::store::{AttemptRow, HistoryStats, HistoryStore, SessionRow};

pub fn run_history(
    config: &Config,
    limit: usize,
    session: Option<&str>,
    prune: Option<usize>,
) -> anyhow::Result<()> {
    let path = config.history.resolved_path();
    if !path.exists() {
        println!("No history yet at {}", path.display());
        return Ok(());
    }
    let store = memory::open(&path)?;

    if let Some(keep) = prune {
        let removed = store.prune(keep)?;
        println!("Removed {removed} session(s), kept the newest {keep}.");
        return Ok(());
    }

    if let Some(id) = session {
        return show_session(&store, id);
    }

    print!("{}", render_stats(&store.stats()?));
    let rows = store.recent(limit)?;
    if !rows.is_empty() {
        println!();
        println!("Recent sessions:");
        for row in &rows {
            println!("{}", render_session_line(row));
        }
    }
    Ok(())
}

fn show_session(store: &HistoryStore, id: &str) -> anyhow::Result<()> {
    let Some(row) = store.get_session(id)? else {
        anyhow::bail!("no session with id {id}");
    };
    println!("{}", render_session_line(&row));
    println!("  request: {}", row.request);
    for a in store.attempts(id)? {
        println!("{}", render_attempt(&a));
    }
    if let Some(ref out) = row.final_output {
        println!();
        println!("{out}");
    }
    Ok(())
}

pub fn render_stats(stats: &HistoryStats) -> String {
    let mut out = format!(
        "Sessions:     {} ({} succeeded, {:.0}%)\nMean retries: {:.2}\n",
        stats.total_sessions,
        stats.succeeded,
        stats.success_rate() * 100.0,
        stats.mean_retries
    );
    if !stats.by_status.is_empty() {
        out.push_str("By status:\n");
        for (status, n) in &stats.by_status {
            out.push_str(&format!("  {status:<24} {n}\n"));
        }
    }
    if !stats.by_error_kind.is_empty() {
        out.push_str("Failed attempts by kind:\n");
        for (kind, n) in &stats.by_error_kind {
            out.push_str(&format!("  {kind:<24} {n}\n"));
        }
    }
    out
}

pub fn render_session_line(row: &SessionRow) -> String {
    format!(
        "{}  {}  {:<22} retries={}  {}",
        row.id.chars().take(8).collect::<String>(),
        row.created_at,
        row.status.as_str(),
        row.retry_count,
        truncate(&row.request, 60)
    )
}

fn render_attempt(a: &AttemptRow) -> String {
    let outcome = if a.passed && a.error_kind.is_none() {
        format!("ok, {} row(s)", a.row_count.unwrap_or(0))
    } else {
        format!(
            "{} at {}: {}",
            a.error_kind.as_deref().unwrap_or("UNKNOWN"),
            a.failing_layer.as_deref().unwrap_or("EXECUTION"),
            a.error_message.as_deref().unwrap_or_default()
        )
    };
    format!(
        "  #{} [{}ms] {}\n     {}",
        a.attempt_number,
        a.duration_ms,
        truncate(&a.candidate_query, 100),
        outcome
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
