// src/core/validator.rs — Layered query validation
//
// Layers run strictly in order and stop at the first failure:
//   1. operation whitelist   (security boundary)
//   2. syntax shape
//   3. plan check            (definitive; a pass skips layer 4)
//   4. semantic heuristic    (only when the store cannot plan)

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use super::types::{ValidationLayer, ValidationResult};
use crate::agents::{PlanOutcome, QueryStore, SchemaCatalog};
use crate::infra::errors::QueryLoopError;

/// Mutating or destructive keywords, matched case-insensitively on word boundaries.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "EXEC", "EXECUTE", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "MERGE", "REINDEX",
];

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FORBIDDEN_KEYWORDS.join("|");
    // SAFETY: built from the static keyword list above; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(&format!(r"(?i)\b({alternation})\b|\b(REPLACE)\s+INTO\b"))
        .expect("forbidden keyword regex")
});

static TAUTOLOGY_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)'\s*OR\s*'1'\s*=\s*'1").expect("tautology regex")
});

static STRING_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"'(?:[^']|'')*'").expect("string literal regex")
});

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier regex")
});

/// Words the semantic heuristic never treats as schema identifiers.
const SQL_WORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "NULL", "AS", "ON", "JOIN",
    "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL", "USING", "GROUP", "BY",
    "ORDER", "HAVING", "LIMIT", "OFFSET", "DISTINCT", "ALL", "UNION", "INTERSECT", "EXCEPT",
    "CASE", "WHEN", "THEN", "ELSE", "END", "ASC", "DESC", "LIKE", "ILIKE", "GLOB", "BETWEEN",
    "EXISTS", "WITH", "RECURSIVE", "TRUE", "FALSE", "CAST", "INTEGER", "INT", "REAL", "TEXT",
    "NUMERIC", "DECIMAL", "DATE", "TIME", "TIMESTAMP", "INTERVAL", "VARCHAR", "FLOAT", "DOUBLE",
    "BOOLEAN", "OVER", "PARTITION", "ROWS", "RANGE", "PRECEDING", "FOLLOWING", "CURRENT", "ROW",
    "UNBOUNDED", "FILTER", "NULLS", "FIRST", "LAST", "ESCAPE", "COLLATE", "NOCASE",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
];

fn is_sql_word(word: &str) -> bool {
    SQL_WORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn strip_string_literals(query: &str) -> String {
    STRING_LITERAL_RE.replace_all(query, "''").into_owned()
}

/// Layer 1. Returns the failure, or `None` when the candidate is read-only.
pub fn check_whitelist(query: &str) -> Option<ValidationResult> {
    if let Some(caps) = FORBIDDEN_RE.captures(query) {
        let keyword = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_ascii_uppercase())
            .unwrap_or_default();
        return Some(ValidationResult::fail(
            ValidationLayer::OperationWhitelist,
            format!("forbidden operation: {keyword}. Only read-only SELECT queries are allowed."),
        ));
    }
    if TAUTOLOGY_RE.is_match(query) {
        return Some(ValidationResult::fail(
            ValidationLayer::OperationWhitelist,
            "injection pattern detected: always-true OR condition",
        ));
    }
    None
}

/// Layer 2: one read-only statement with balanced parentheses.
pub fn check_syntax(query: &str) -> Option<ValidationResult> {
    let fail = |msg: &str| Some(ValidationResult::fail(ValidationLayer::Syntax, msg));

    let body = strip_string_literals(query.trim());
    let body = body.trim_end().trim_end_matches(';').trim_end();
    if body.is_empty() {
        return fail("empty query");
    }

    let first = body
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    if !(first.eq_ignore_ascii_case("SELECT") || first.eq_ignore_ascii_case("WITH")) {
        return fail("syntax error: query must be a single SELECT (or WITH ... SELECT) statement");
    }
    if body.contains(';') {
        return fail("syntax error: multiple statements are not allowed");
    }

    let mut depth: i64 = 0;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return fail("syntax error: unbalanced parentheses");
    }
    None
}

/// Layer 4. Advisory identifier check against the catalog.
pub fn check_semantics(query: &str, catalog: &SchemaCatalog) -> ValidationResult {
    let body = strip_string_literals(query).replace('"', "");

    // (identifier, next non-space char)
    let tokens: Vec<(&str, Option<char>)> = IDENT_RE
        .find_iter(&body)
        .map(|m| (m.as_str(), body[m.end()..].trim_start().chars().next()))
        .collect();

    let mut aliases: HashSet<String> = HashSet::new();
    for (i, (word, next)) in tokens.iter().enumerate() {
        if word.eq_ignore_ascii_case("AS") {
            if let Some((alias, _)) = tokens.get(i + 1) {
                aliases.insert(alias.to_ascii_lowercase());
            }
            // `name AS (` introduces a CTE
            if *next == Some('(') && i > 0 {
                aliases.insert(tokens[i - 1].0.to_ascii_lowercase());
            }
        } else if catalog.is_table(word) {
            if let Some((alias, _)) = tokens.get(i + 1) {
                if !is_sql_word(alias) {
                    aliases.insert(alias.to_ascii_lowercase());
                }
            }
        }
    }

    let unknown = tokens.iter().find(|(word, next)| {
        !is_sql_word(word)
            && *next != Some('(')
            && *next != Some('.')
            && !aliases.contains(&word.to_ascii_lowercase())
            && !catalog.knows(word)
    });

    match unknown {
        Some((word, _)) => ValidationResult::fail(
            ValidationLayer::Semantic,
            format!("unknown identifier: {word}"),
        ),
        None => ValidationResult::pass("semantic check passed"),
    }
}

/// Runs the four layers against one candidate.
pub struct Validator {
    plan_timeout: Duration,
}

impl Validator {
    pub fn new(plan_timeout: Duration) -> Self {
        Self { plan_timeout }
    }

    /// Validate a candidate. `Err` means the store itself was unavailable
    /// (including a plan-check timeout); an invalid candidate is an `Ok` value.
    pub async fn validate(
        &self,
        query: &str,
        store: &dyn QueryStore,
    ) -> Result<ValidationResult, QueryLoopError> {
        if let Some(failure) = check_whitelist(query) {
            tracing::warn!(layer = %ValidationLayer::OperationWhitelist, "{}", failure.message);
            return Ok(failure);
        }
        if let Some(failure) = check_syntax(query) {
            tracing::debug!(layer = %ValidationLayer::Syntax, "{}", failure.message);
            return Ok(failure);
        }

        let outcome = tokio::time::timeout(self.plan_timeout, store.check_plan(query))
            .await
            .map_err(|_| QueryLoopError::Timeout {
                stage: "plan check".into(),
                timeout_ms: self.plan_timeout.as_millis() as u64,
            })??;

        match outcome {
            PlanOutcome::Valid => Ok(ValidationResult::pass("plan check passed")),
            PlanOutcome::Invalid(message) => {
                tracing::debug!(layer = %ValidationLayer::ExecutionPlan, "{message}");
                Ok(ValidationResult::fail(ValidationLayer::ExecutionPlan, message))
            }
            PlanOutcome::Unsupported => match store.catalog().await {
                Ok(Some(catalog)) => Ok(check_semantics(query, &catalog)),
                Ok(None) => Ok(ValidationResult::pass("no plan check or catalog available")),
                Err(e) => {
                    tracing::debug!("catalog unavailable, skipping semantic check: {e}");
                    Ok(ValidationResult::pass("no plan check or catalog available"))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ColumnInfo, ExecutionOutcome, TableInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> SchemaCatalog {
        let col = |n: &str| ColumnInfo {
            name: n.into(),
            data_type: "TEXT".into(),
        };
        SchemaCatalog {
            tables: vec![TableInfo {
                name: "sales_data".into(),
                columns: vec![col("region"), col("revenue"), col("sale_date")],
            }],
        }
    }

    struct FakeStore {
        plan: PlanOutcome,
        catalog: Option<SchemaCatalog>,
        plan_calls: AtomicUsize,
        catalog_calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeStore {
        fn new(plan: PlanOutcome) -> Self {
            Self {
                plan,
                catalog: Some(catalog()),
                plan_calls: AtomicUsize::new(0),
                catalog_calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl QueryStore for FakeStore {
        async fn check_plan(&self, _query: &str) -> Result<PlanOutcome, QueryLoopError> {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.plan.clone())
        }

        async fn execute(&self, _query: &str) -> Result<ExecutionOutcome, QueryLoopError> {
            unreachable!("validator never executes")
        }

        async fn catalog(&self) -> Result<Option<SchemaCatalog>, QueryLoopError> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.catalog.clone())
        }
    }

    fn validator() -> Validator {
        Validator::new(Duration::from_secs(5))
    }

    // ─── Layer 1: whitelist ─────────────────────────────────────

    #[test]
    fn test_whitelist_rejects_mutations() {
        for q in [
            "DROP TABLE sales_data",
            "select 1; delete from sales_data",
            "UPDATE sales_data SET revenue = 0",
            "WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x",
            "REPLACE INTO t VALUES (1)",
            "PRAGMA table_info(t)",
        ] {
            let r = check_whitelist(q).unwrap_or_else(|| panic!("accepted: {q}"));
            assert_eq!(r.failing_layer, Some(ValidationLayer::OperationWhitelist));
        }
    }

    #[test]
    fn test_whitelist_names_keyword() {
        let r = check_whitelist("select * from t; drop table t").unwrap();
        assert!(r.message.contains("DROP"));
    }

    #[test]
    fn test_whitelist_word_boundaries() {
        assert!(check_whitelist("SELECT backdrop, updated_at FROM t").is_none());
        assert!(check_whitelist("SELECT replace(name, 'a', 'b') FROM t").is_none());
        assert!(check_whitelist("SELECT * FROM t WHERE status = 'deleted'").is_none());
    }

    #[test]
    fn test_whitelist_tautology() {
        let r = check_whitelist("SELECT * FROM users WHERE name = '' OR '1'='1'").unwrap();
        assert!(r.message.contains("injection"));
    }

    // ─── Layer 2: syntax ────────────────────────────────────────

    #[test]
    fn test_syntax_requires_select() {
        assert!(check_syntax("SELECT 1").is_none());
        assert!(check_syntax("  select region from sales_data;  ").is_none());
        assert!(check_syntax("WITH x AS (SELECT 1) SELECT * FROM x").is_none());
        assert!(check_syntax("EXPLAIN SELECT 1").is_some());
        assert!(check_syntax("").is_some());
    }

    #[test]
    fn test_syntax_single_statement() {
        let r = check_syntax("SELECT 1; SELECT 2").unwrap();
        assert_eq!(r.failing_layer, Some(ValidationLayer::Syntax));
        assert!(r.message.contains("multiple statements"));
        assert!(check_syntax("SELECT ';' AS semi").is_none());
    }

    #[test]
    fn test_syntax_balanced_parens() {
        assert!(check_syntax("SELECT count(* FROM t").is_some());
        assert!(check_syntax("SELECT count(*)) FROM t").is_some());
        assert!(check_syntax("SELECT '(' FROM t").is_none());
    }

    // ─── Layer 4: semantic heuristic ────────────────────────────

    #[test]
    fn test_semantics_known_identifiers() {
        let r = check_semantics(
            "SELECT s.region, SUM(s.revenue) AS total FROM sales_data s GROUP BY s.region ORDER BY total DESC",
            &catalog(),
        );
        assert!(r.passed, "{}", r.message);
    }

    #[test]
    fn test_semantics_flags_unknown_column() {
        let r = check_semantics("SELECT profit FROM sales_data", &catalog());
        assert!(!r.passed);
        assert_eq!(r.failing_layer, Some(ValidationLayer::Semantic));
        assert_eq!(r.message, "unknown identifier: profit");
    }

    #[test]
    fn test_semantics_ignores_literals_and_ctes() {
        let r = check_semantics(
            "WITH recent AS (SELECT region FROM sales_data WHERE sale_date > 'last year') SELECT region FROM recent",
            &catalog(),
        );
        assert!(r.passed, "{}", r.message);
    }

    // ─── validate ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_plan_pass_skips_semantic_layer() {
        let store = FakeStore::new(PlanOutcome::Valid);
        // Unknown to the catalog, but the plan check is definitive.
        let r = validator()
            .validate("SELECT profit FROM sales_data", &store)
            .await
            .unwrap();
        assert!(r.passed);
        assert_eq!(store.catalog_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revalidation_is_idempotent() {
        let store = FakeStore::new(PlanOutcome::Valid);
        let v = validator();
        let q = "SELECT region FROM sales_data";
        assert!(v.validate(q, &store).await.unwrap().passed);
        assert!(v.validate(q, &store).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_plan_failure_carries_raw_message() {
        let store = FakeStore::new(PlanOutcome::Invalid("no such column: profit".into()));
        let r = validator()
            .validate("SELECT profit FROM sales_data", &store)
            .await
            .unwrap();
        assert_eq!(r.failing_layer, Some(ValidationLayer::ExecutionPlan));
        assert_eq!(r.message, "no such column: profit");
    }

    #[tokio::test]
    async fn test_whitelist_failure_never_reaches_store() {
        let store = FakeStore::new(PlanOutcome::Valid);
        let r = validator().validate("DELETE FROM sales_data", &store).await.unwrap();
        assert!(!r.passed);
        assert_eq!(store.plan_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_plan_falls_back_to_semantics() {
        let store = FakeStore::new(PlanOutcome::Unsupported);
        let r = validator()
            .validate("SELECT profit FROM sales_data", &store)
            .await
            .unwrap();
        assert_eq!(r.failing_layer, Some(ValidationLayer::Semantic));
        assert_eq!(store.catalog_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_without_catalog_passes() {
        let mut store = FakeStore::new(PlanOutcome::Unsupported);
        store.catalog = None;
        let r = validator()
            .validate("SELECT anything FROM anywhere", &store)
            .await
            .unwrap();
        assert!(r.passed);
    }

    #[tokio::test]
    async fn test_plan_timeout_is_error() {
        let mut store = FakeStore::new(PlanOutcome::Valid);
        store.delay = Duration::from_millis(200);
        let v = Validator::new(Duration::from_millis(10));
        let err = v.validate("SELECT 1", &store).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
