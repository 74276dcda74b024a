// src/cli/progress.rs — Terminal progress renderer for session feedback

use crate::core::types::{ProgressEvent, Stage};

/// One line of progress text for `event`, or `None` for events that are
/// not worth showing.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::StageEntered { stage, attempt } => match stage {
            Stage::Generate => {
                Some(format!("[attempt {attempt}] generating query..."))
            }
            Stage::Execute => Some(format!("[attempt {attempt}] executing")),
            _ => None,
        },
        ProgressEvent::AttemptFailed {
            attempt,
            kind,
            message,
        } => Some(format!("[attempt {attempt}] {kind}: {}", first_line(message))),
        ProgressEvent::RetryScheduled {
            next_attempt,
            strategy,
            confidence,
        } => Some(format!(
            "[retry] attempt {next_attempt} with {strategy} (confidence {confidence:.2})"
        )),
        ProgressEvent::SafetyStop { message } => Some(format!("[safety] {message}")),
        ProgressEvent::Complete { status, attempts } => {
            Some(format!("[done] {status} after {attempts} attempt(s)"))
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout carries only the answer.
/// Returns a closure suitable for `Orchestrator::with_progress()`.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{line}");
        }
    }
}
