// src/core/classifier.rs — Error classification and analysis
//
// Maps free-text failure messages onto the fixed `ErrorKind` vocabulary.
// Rules are tried in order and the first match wins.

use regex::Regex;
use std::sync::LazyLock;

use super::types::{ErrorKind, ValidationLayer, ValidationResult};

struct Rule {
    name: &'static str,
    kind: ErrorKind,
    pattern: Regex,
    suggestion: &'static str,
}

fn rule(name: &'static str, kind: ErrorKind, pattern: &str, suggestion: &'static str) -> Rule {
    // SAFETY: patterns below are static literals; compilation cannot fail.
    #[allow(clippy::expect_used)]
    let pattern = Regex::new(pattern).expect("classifier rule regex");
    Rule {
        name,
        kind,
        pattern,
        suggestion,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            "forbidden_operation",
            ErrorKind::SecurityViolation,
            r"(?i)^forbidden (?:operation|keyword)[:\s]+'?(\w+)|^injection pattern detected|attempt to write a readonly database|^not authori[sz]ed\b|\bpermission denied\b",
            "Only read-only SELECT queries are allowed.",
        ),
        rule(
            "timeout",
            ErrorKind::Timeout,
            r"(?i)\btimed out\b|^interrupted$|\bcanceling statement due to statement timeout\b",
            "Simplify the query: fewer joins, tighter filters, a LIMIT.",
        ),
        rule(
            "column_not_found",
            ErrorKind::UnknownIdentifier,
            r#"(?i)(?:no such|unknown|undefined) column[:\s]+"?([\w.]+)|column "?([\w.]+)"? does not exist"#,
            "Verify the column name against the schema.",
        ),
        rule(
            "table_not_found",
            ErrorKind::UnknownIdentifier,
            r#"(?i)(?:no such|unknown|undefined) (?:table|relation)[:\s]+"?([\w.]+)|(?:relation|table) "?([\w.]+)"? does not exist"#,
            "Use only tables that appear in the schema context.",
        ),
        rule(
            "ambiguous_column",
            ErrorKind::UnknownIdentifier,
            r"(?i)ambiguous column(?: name)?[:\s]+([\w.]+)",
            "Qualify the column with its table name or alias.",
        ),
        rule(
            "type_mismatch",
            ErrorKind::TypeMismatch,
            r"(?i)operator does not exist|cannot cast|invalid input syntax|type mismatch|datatype mismatch",
            "Check value types: dates as 'YYYY-MM-DD', numbers unquoted.",
        ),
        rule(
            "aggregate_misuse",
            ErrorKind::TypeMismatch,
            r"(?i)must appear in the group by clause|misuse of aggregate",
            "Add the missing columns to GROUP BY or wrap them in an aggregate.",
        ),
        rule(
            "syntax_error",
            ErrorKind::SyntaxError,
            r#"(?i)syntax error(?: at or)?(?: near "?([^"\s:]+)"?)?|near "([^"]+)": syntax error|incomplete input|unrecognized token[:\s]+"?([^"]+)"?|unbalanced|multiple statements"#,
            "Check the SQL syntax: commas, parentheses, keyword order.",
        ),
        rule(
            "division_by_zero",
            ErrorKind::Unknown,
            r"(?i)division by zero",
            "Filter out zero divisors before dividing.",
        ),
    ]
});

const FALLBACK_SUGGESTION: &str =
    "Review the query for typos, missing quotes or an incorrect structure.";

/// Map a raw failure message onto an `ErrorKind`. Pure; no match yields `Unknown`.
pub fn classify(raw_message: &str) -> ErrorKind {
    RULES
        .iter()
        .find(|r| r.pattern.is_match(raw_message))
        .map(|r| r.kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Classify a failed validation. A whitelist failure is always a security
/// violation whatever its message says.
pub fn classify_validation(result: &ValidationResult) -> ErrorKind {
    match result.failing_layer {
        Some(ValidationLayer::OperationWhitelist) => ErrorKind::SecurityViolation,
        _ => classify(&result.message),
    }
}

/// Richer view of a failure used to build retry guidance.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorAnalysis {
    pub kind: ErrorKind,
    /// Name of the matched rule, e.g. `column_not_found`.
    pub rule: &'static str,
    /// Offending identifier or token, when the message names one.
    pub entity: Option<String>,
    pub suggestion: &'static str,
}

pub fn analyze(raw_message: &str) -> ErrorAnalysis {
    for r in RULES.iter() {
        if let Some(caps) = r.pattern.captures(raw_message) {
            let entity = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\'').to_string())
                .find(|s| !s.is_empty());
            return ErrorAnalysis {
                kind: r.kind,
                rule: r.name,
                entity,
                suggestion: r.suggestion,
            };
        }
    }
    ErrorAnalysis {
        kind: ErrorKind::Unknown,
        rule: "unknown",
        entity: None,
        suggestion: FALLBACK_SUGGESTION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── classify ───────────────────────────────────────────────

    #[test]
    fn test_unknown_identifier() {
        assert_eq!(classify("unknown column: sales"), ErrorKind::UnknownIdentifier);
        assert_eq!(classify("no such column: revenue"), ErrorKind::UnknownIdentifier);
        assert_eq!(
            classify(r#"column "total_revenue" does not exist"#),
            ErrorKind::UnknownIdentifier
        );
        assert_eq!(classify("no such table: orders"), ErrorKind::UnknownIdentifier);
        assert_eq!(
            classify(r#"relation "sales" does not exist"#),
            ErrorKind::UnknownIdentifier
        );
    }

    #[test]
    fn test_syntax_error() {
        assert_eq!(classify("syntax error near SELECT"), ErrorKind::SyntaxError);
        assert_eq!(
            classify(r#"near "FORM": syntax error"#),
            ErrorKind::SyntaxError
        );
        assert_eq!(classify("incomplete input"), ErrorKind::SyntaxError);
    }

    #[test]
    fn test_type_mismatch_beats_does_not_exist() {
        assert_eq!(
            classify("operator does not exist: text > integer"),
            ErrorKind::TypeMismatch
        );
        assert_eq!(
            classify(r#"invalid input syntax for type date: "yesterday""#),
            ErrorKind::TypeMismatch
        );
        assert_eq!(
            classify(r#"column "region" must appear in the GROUP BY clause"#),
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn test_timeout_and_security() {
        assert_eq!(classify("plan check timed out after 5000ms"), ErrorKind::Timeout);
        assert_eq!(classify("interrupted"), ErrorKind::Timeout);
        assert_eq!(
            classify("forbidden operation: DROP"),
            ErrorKind::SecurityViolation
        );
        assert_eq!(
            classify("attempt to write a readonly database"),
            ErrorKind::SecurityViolation
        );
    }

    #[test]
    fn test_identifier_names_do_not_trigger_security_or_timeout() {
        for msg in [
            "no such column: injection_site",
            "no such column: readonly_flag",
            "no such column: timeout_ms",
            "no such table: interrupted_jobs",
            r#"column "readonly" does not exist"#,
        ] {
            assert_eq!(classify(msg), ErrorKind::UnknownIdentifier, "{msg}");
        }
        assert_eq!(analyze("no such column: timeout_ms").entity.as_deref(), Some("timeout_ms"));
    }

    #[test]
    fn test_validator_messages_are_security() {
        assert_eq!(
            classify("injection pattern detected: always-true OR condition"),
            ErrorKind::SecurityViolation
        );
        assert_eq!(
            classify("forbidden operation: DELETE. Only read-only SELECT queries are allowed."),
            ErrorKind::SecurityViolation
        );
        assert_eq!(
            classify("canceling statement due to statement timeout"),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_unmatched_is_unknown() {
        assert_eq!(classify(""), ErrorKind::Unknown);
        assert_eq!(classify("disk I/O error"), ErrorKind::Unknown);
        assert_eq!(classify("division by zero"), ErrorKind::Unknown);
    }

    #[test]
    fn test_classify_is_pure() {
        let msg = "no such column: x";
        assert_eq!(classify(msg), classify(msg));
    }

    #[test]
    fn test_whitelist_layer_forces_security() {
        let v = ValidationResult::fail(ValidationLayer::OperationWhitelist, "contains DELETE");
        assert_eq!(classify_validation(&v), ErrorKind::SecurityViolation);

        let v = ValidationResult::fail(ValidationLayer::ExecutionPlan, "no such table: t");
        assert_eq!(classify_validation(&v), ErrorKind::UnknownIdentifier);
    }

    // ─── analyze ────────────────────────────────────────────────

    #[test]
    fn test_analyze_extracts_column() {
        let a = analyze("no such column: revenue");
        assert_eq!(a.kind, ErrorKind::UnknownIdentifier);
        assert_eq!(a.rule, "column_not_found");
        assert_eq!(a.entity.as_deref(), Some("revenue"));
    }

    #[test]
    fn test_analyze_extracts_quoted_relation() {
        let a = analyze(r#"relation "sales" does not exist"#);
        assert_eq!(a.rule, "table_not_found");
        assert_eq!(a.entity.as_deref(), Some("sales"));
    }

    #[test]
    fn test_analyze_extracts_syntax_token() {
        let a = analyze(r#"near "FORM": syntax error"#);
        assert_eq!(a.kind, ErrorKind::SyntaxError);
        assert_eq!(a.entity.as_deref(), Some("FORM"));
    }

    #[test]
    fn test_analyze_forbidden_keyword() {
        let a = analyze("forbidden operation: DELETE");
        assert_eq!(a.kind, ErrorKind::SecurityViolation);
        assert_eq!(a.entity.as_deref(), Some("DELETE"));
    }

    #[test]
    fn test_analyze_division_by_zero_has_suggestion() {
        let a = analyze("division by zero");
        assert_eq!(a.kind, ErrorKind::Unknown);
        assert_eq!(a.rule, "division_by_zero");
        assert!(a.suggestion.contains("zero"));
    }

    #[test]
    fn test_analyze_fallback() {
        let a = analyze("something odd");
        assert_eq!(a.rule, "unknown");
        assert!(a.entity.is_none());
    }
}
