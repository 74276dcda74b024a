// src/cli/inspect.rs — `queryloop validate` and `queryloop classify`

use anyhow::Context;
use std::path::PathBuf;

use crate::core::classifier;
use crate::core::types::ValidationResult;
use crate::core::validator::{self, Validator};
use crate::infra::config::Config;
use crate::storage::SqliteDatabase;

/// Layers 1–2 only, for when no database is available.
pub fn validate_static(sql: &str) -> ValidationResult {
    validator::check_whitelist(sql)
        .or_else(|| validator::check_syntax(sql))
        .unwrap_or_else(|| ValidationResult::pass("static checks passed (no database for plan check)"))
}

pub fn render_validation(result: &ValidationResult) -> String {
    match result.failing_layer {
        None => format!("PASSED: {}", result.message),
        Some(layer) => format!(
            "FAILED at {layer}: {}\nerror kind: {}",
            result.message,
            classifier::classify_validation(result)
        ),
    }
}

/// Returns whether the query passed.
pub async fn run_validate(
    sql: &str,
    db: Option<&PathBuf>,
    config: &Config,
) -> anyhow::Result<bool> {
    let result = match db.or(config.database.path.as_ref()) {
        Some(path) => {
            let store = SqliteDatabase::open(path, config.database.row_limit)
                .with_context(|| format!("open {}", path.display()))?;
            let plan_timeout = std::time::Duration::from_secs(config.timeouts.plan_secs);
            Validator::new(plan_timeout).validate(sql, &store).await?
        }
        None => validate_static(sql),
    };
    println!("{}", render_validation(&result));
    Ok(result.passed)
}

pub fn render_classification(message: &str) -> String {
    let analysis = classifier::analyze(message);
    let mut out = format!(
        "kind:       {}\nrule:       {}\nretryable:  {}\n",
        analysis.kind,
        analysis.rule,
        if analysis.kind.is_retryable() { "yes" } else { "no" }
    );
    if let Some(ref entity) = analysis.entity {
        out.push_str(&format!("entity:     {entity}\n"));
    }
    out.push_str(&format!("suggestion: {}", analysis.suggestion));
    out
}

pub fn run_classify(message: &str) {
    println!("{}", render_classification(message));
}
