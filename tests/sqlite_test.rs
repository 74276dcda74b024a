// tests/sqlite_test.rs — Integration test: full sessions against a real SQLite database

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rusqlite::Connection;

use common::ScriptedGenerator;
use queryloop::agents::schema_context::CatalogRetriever;
use queryloop::agents::QueryStore;
use queryloop::core::orchestrator::Orchestrator;
use queryloop::core::policy::RuleTableOracle;
use queryloop::core::types::{ErrorKind, OrchestratorConfig, SessionStatus, ValidationLayer};
use queryloop::core::validator::Validator;
use queryloop::storage::SqliteDatabase;

fn sales_db() -> Arc<SqliteDatabase> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE sales_data (
            id INTEGER PRIMARY KEY,
            region TEXT NOT NULL,
            revenue REAL NOT NULL,
            sale_date TEXT NOT NULL
         );
         CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, country TEXT);
         INSERT INTO sales_data (region, revenue, sale_date) VALUES
            ('north', 100.0, '2025-01-03'),
            ('south', 250.5, '2025-01-04'),
            ('north', 50.0,  '2025-02-01');",
    )
    .unwrap();
    Arc::new(SqliteDatabase::from_connection(conn, 100).unwrap())
}

#[tokio::test]
async fn recovers_from_unknown_column_with_schema_context() {
    let db = sales_db();
    let generator = Arc::new(ScriptedGenerator::new([
        "SELECT SUM(sales) FROM sales_data",
        "SELECT SUM(revenue) AS total FROM sales_data",
    ]));
    let store: Arc<dyn QueryStore> = db.clone();
    let orch = Orchestrator::new(generator.clone(), store.clone(), OrchestratorConfig::default())
        .with_retriever(Arc::new(CatalogRetriever::new(store)))
        .with_oracle(Arc::new(RuleTableOracle));

    let report = orch.run_session("total revenue").await;

    assert_eq!(report.status, SessionStatus::Succeeded);
    assert_eq!(report.retry_count, 1);
    assert_eq!(report.final_output, "The result is: 400.5");
    let first = &report.attempts_summary[0];
    assert_eq!(first.failing_layer, Some(ValidationLayer::ExecutionPlan));
    assert_eq!(first.error_kind, Some(ErrorKind::UnknownIdentifier));
    assert_eq!(first.message.as_deref(), Some("no such column: sales"));

    let guidance = generator.guidance.lock().unwrap();
    assert!(guidance[1]
        .as_deref()
        .unwrap_or_default()
        .contains("Schema Clarification"));
}

#[tokio::test]
async fn write_attempt_never_reaches_the_database() {
    let db = sales_db();
    let generator = Arc::new(ScriptedGenerator::new(["DELETE FROM sales_data"]));
    let orch = Orchestrator::new(generator, db.clone(), OrchestratorConfig::default());

    let report = orch.run_session("clear sales").await;
    assert_eq!(report.status, SessionStatus::AbortedPolicy);

    let queryloop::agents::ExecutionOutcome::Rows(rows) = db
        .execute("SELECT COUNT(*) AS n FROM sales_data")
        .await
        .unwrap()
    else {
        panic!("count failed");
    };
    assert_eq!(rows.scalar(), Some(&serde_json::json!(3)));
}

#[tokio::test]
async fn multi_row_answer_is_summarised() {
    let db = sales_db();
    let generator = Arc::new(ScriptedGenerator::new([
        "SELECT region, SUM(revenue) AS total FROM sales_data GROUP BY region ORDER BY region",
    ]));
    let orch = Orchestrator::new(generator, db, OrchestratorConfig::default());

    let report = orch.run_session("revenue by region").await;

    assert_eq!(report.status, SessionStatus::Succeeded);
    assert!(report
        .final_output
        .starts_with("Query returned 2 rows with columns: region, total"));
    assert!(report.final_output.contains(r#""region":"north""#));
}

#[tokio::test]
async fn validator_is_idempotent_on_a_passed_candidate() {
    let db = sales_db();
    let validator = Validator::new(std::time::Duration::from_secs(5));
    // `sale_date` looks like it could trip an identifier heuristic; the plan
    // check is definitive so the result must not change between runs.
    let sql = "SELECT s.region FROM sales_data AS s WHERE s.sale_date > '2025-01-01'";
    let first = validator.validate(sql, db.as_ref()).await.unwrap();
    let second = validator.validate(sql, db.as_ref()).await.unwrap();
    assert!(first.passed);
    assert_eq!(first, second);
}

#[tokio::test]
async fn file_database_opens_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2);")
        .unwrap();

    let db = SqliteDatabase::open(&path, 10).unwrap();
    let catalog = db.catalog().await.unwrap().unwrap();
    assert!(catalog.is_table("t"));

    match db.execute("INSERT INTO t VALUES (3)").await.unwrap() {
        queryloop::agents::ExecutionOutcome::Failed(msg) => {
            assert!(msg.contains("readonly"), "{msg}")
        }
        other => panic!("write succeeded: {other:?}"),
    }
}
