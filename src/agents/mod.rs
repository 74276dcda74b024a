// src/agents/mod.rs — Collaborator contracts consumed by the orchestrator
//
// Every external dependency of the retry loop sits behind one of these
// traits so the state machine can be driven offline by scripted fakes.

pub mod generator;
pub mod oracle;
pub mod prompt;
pub mod responder;
pub mod schema_context;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::{ErrorKind, QueryAttempt, RetryDecision};
use crate::infra::errors::QueryLoopError;

/// Produces a candidate query for the request.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &str,
        context: &str,
        guidance: Option<&str>,
    ) -> Result<String, QueryLoopError>;
}

/// Best-effort schema/context lookup. Errors are swallowed by the caller.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn get_context(&self, request: &str) -> Result<String, QueryLoopError>;
}

/// The target storage engine: plan checking, execution and the catalog used
/// by the semantic heuristic.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn check_plan(&self, query: &str) -> Result<PlanOutcome, QueryLoopError>;

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome, QueryLoopError>;

    /// Known tables and columns. `None` when the store cannot describe itself.
    async fn catalog(&self) -> Result<Option<SchemaCatalog>, QueryLoopError> {
        Ok(None)
    }
}

/// Optional reasoning step consulted by the retry policy engine.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        kind: ErrorKind,
        raw_message: &str,
        history: &[QueryAttempt],
    ) -> Result<RetryDecision, QueryLoopError>;
}

/// Turns result rows into the user-facing answer.
#[async_trait]
pub trait ResponseFormatter: Send + Sync {
    async fn format_response(
        &self,
        rows: &QueryRows,
        request: &str,
    ) -> Result<String, QueryLoopError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Valid,
    Invalid(String),
    /// The store cannot plan without executing; the semantic heuristic runs instead.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(QueryRows),
    Failed(String),
}

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Set when the store stopped reading at its row limit.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        match (self.rows.as_slice(), self.columns.as_slice()) {
            ([row], [col]) => row.get(col),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl SchemaCatalog {
    pub fn is_table(&self, ident: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(ident))
    }

    /// True when `ident` names any table or column.
    pub fn knows(&self, ident: &str) -> bool {
        self.tables.iter().any(|t| {
            t.name.eq_ignore_ascii_case(ident)
                || t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(ident))
        })
    }

    /// `CREATE TABLE`-style rendering used as generator context.
    pub fn render_table(table: &TableInfo) -> String {
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                if c.data_type.is_empty() {
                    format!("  {}", c.name)
                } else {
                    format!("  {} {}", c.name, c.data_type)
                }
            })
            .collect();
        format!("CREATE TABLE {} (\n{}\n);", table.name, cols.join(",\n"))
    }
}
