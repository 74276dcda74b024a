// src/agents/schema_context.rs — Schema context retrieval from the store catalog

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::{ContextRetriever, QueryStore, SchemaCatalog, TableInfo};
use crate::infra::errors::QueryLoopError;

const DEFAULT_MAX_TABLES: usize = 5;

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Overlap between request words and the table's name/column words.
/// Plural `s` is ignored so "sales" matches "sale_date".
fn score(table: &TableInfo, request_words: &HashSet<String>) -> usize {
    let stem = |w: &str| w.trim_end_matches('s').to_string();
    let request: HashSet<String> = request_words.iter().map(|w| stem(w)).collect();

    let mut table_words = words(&table.name);
    for c in &table.columns {
        table_words.extend(words(&c.name));
    }
    table_words
        .iter()
        .filter(|w| request.contains(&stem(w)))
        .count()
}

/// Rank tables by relevance and render the best ones as `CREATE TABLE` text.
pub fn select_tables<'a>(catalog: &'a SchemaCatalog, request: &str, max: usize) -> Vec<&'a TableInfo> {
    let request_words = words(request);
    let mut scored: Vec<(usize, &TableInfo)> = catalog
        .tables
        .iter()
        .map(|t| (score(t, &request_words), t))
        .collect();
    // Stable sort keeps catalog order among ties.
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let any_match = scored.first().is_some_and(|(s, _)| *s > 0);
    scored
        .into_iter()
        .filter(|(s, _)| !any_match || *s > 0)
        .take(max)
        .map(|(_, t)| t)
        .collect()
}

pub fn render_context(tables: &[&TableInfo]) -> String {
    tables
        .iter()
        .map(|t| SchemaCatalog::render_table(t))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Context retriever backed by the target store's own catalog.
pub struct CatalogRetriever {
    store: Arc<dyn QueryStore>,
    max_tables: usize,
}

impl CatalogRetriever {
    pub fn new(store: Arc<dyn QueryStore>) -> Self {
        Self {
            store,
            max_tables: DEFAULT_MAX_TABLES,
        }
    }
}

#[async_trait]
impl ContextRetriever for CatalogRetriever {
    async fn get_context(&self, request: &str) -> Result<String, QueryLoopError> {
        let Some(catalog) = self.store.catalog().await? else {
            return Ok(String::new());
        };
        let tables = select_tables(&catalog, request, self.max_tables);
        tracing::debug!(
            tables = tables.len(),
            available = catalog.tables.len(),
            "Selected schema context"
        );
        Ok(render_context(&tables))
    }
}
