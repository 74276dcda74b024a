// src/cli/ask.rs — `queryloop ask`: run one session end to end

use anyhow::Context;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agents::generator::LlmGenerator;
use crate::agents::oracle::LlmOracle;
use crate::agents::responder::LlmFormatter;
use crate::agents::schema_context::CatalogRetriever;
use crate::agents::QueryStore;
use crate::core::orchestrator::Orchestrator;
use crate::core::policy::RuleTableOracle;
use crate::core::types::{OrchestratorConfig, SessionStatus, StageTimeouts};
use crate::infra::config::Config;
use crate::infra::errors::QueryLoopError;
use crate::memory;
use crate::provider::openai_compat::OpenAICompatProvider;
use crate::provider::retry::{BackoffConfig, RetryProvider};
use crate::provider::ChatProvider;
use crate::storage::SqliteDatabase;

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub db: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub iteration_cap: Option<u32>,
    pub quiet: bool,
    pub no_oracle: bool,
    pub json: bool,
}

/// Runtime bounds from the config file with CLI overrides applied.
pub fn session_config(config: &Config, opts: &AskOptions) -> anyhow::Result<OrchestratorConfig> {
    let mut cfg = OrchestratorConfig::from(config);
    if let Some(n) = opts.max_retries {
        cfg.max_retries = n;
    }
    if let Some(cap) = opts.iteration_cap {
        if cap == 0 {
            anyhow::bail!("--iteration-cap must be > 0");
        }
        cfg.global_iteration_cap = cap;
    }
    Ok(cfg)
}

/// Target database: `--db` wins over `[database] path`.
pub fn target_db(config: &Config, flag: Option<&PathBuf>) -> anyhow::Result<PathBuf> {
    flag.or(config.database.path.as_ref())
        .cloned()
        .context("no target database; pass --db or set [database] path in config.toml")
}

/// Chat client for every model stage. Backoff sleeps stay inside the
/// shortest model-stage timeout.
fn chat_provider(
    config: &Config,
    timeouts: &StageTimeouts,
) -> Result<Arc<dyn ChatProvider>, QueryLoopError> {
    let api_key = config.api_key();
    // Local OpenAI-compatible servers usually run without a key.
    if api_key.is_none() && config.models.base_url.contains("api.openai.com") {
        return Err(QueryLoopError::NoProvider);
    }
    let inner = Arc::new(OpenAICompatProvider::new(
        "openai-compat",
        "OpenAI-compatible",
        api_key,
        config.models.base_url.clone(),
    ));
    let stage_limit = timeouts.generate.min(timeouts.oracle).min(timeouts.format);
    Ok(Arc::new(RetryProvider::with_config(
        inner,
        BackoffConfig::within(stage_limit),
    )))
}

fn open_history(config: &Config) -> Option<Arc<Mutex<memory::HistoryStore>>> {
    if !config.history.enabled {
        return None;
    }
    let path = config.history.resolved_path();
    match memory::open(&path) {
        Ok(store) => Some(Arc::new(Mutex::new(store))),
        Err(e) => {
            tracing::warn!("History disabled, cannot open {}: {e}", path.display());
            None
        }
    }
}

/// Answer `question`; returns the terminal status so the caller can pick
/// an exit code.
pub async fn run_ask(
    question: &str,
    config: &Config,
    opts: AskOptions,
) -> anyhow::Result<SessionStatus> {
    let cfg = session_config(config, &opts)?;
    let db_path = target_db(config, opts.db.as_ref())?;
    let store: Arc<dyn QueryStore> = Arc::new(
        SqliteDatabase::open(&db_path, config.database.row_limit)
            .with_context(|| format!("open {}", db_path.display()))?,
    );
    let provider = chat_provider(config, &cfg.timeouts)?;

    let mut orchestrator = Orchestrator::new(
        Arc::new(LlmGenerator::new(provider.clone(), &config.models.generator)),
        store.clone(),
        cfg,
    )
    .with_retriever(Arc::new(CatalogRetriever::new(store)));

    if let Some(ref model) = config.models.formatter {
        orchestrator = orchestrator.with_formatter(Arc::new(LlmFormatter::new(
            provider.clone(),
            model,
        )));
    }

    orchestrator = if config.retry.use_oracle && !opts.no_oracle {
        orchestrator.with_oracle(Arc::new(
            LlmOracle::new(provider, &config.models.oracle).with_question(question),
        ))
    } else {
        orchestrator.with_oracle(Arc::new(RuleTableOracle))
    };

    if let Some(history) = open_history(config) {
        orchestrator = orchestrator.with_history(history);
    }
    if !opts.quiet {
        orchestrator = orchestrator.with_progress(super::progress::terminal_progress());
        eprintln!(
            "[ask] {} | db: {} | model: {}",
            question,
            db_path.display(),
            config.models.generator
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run_session_with_cancel(question, &cancel).await;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.final_output);
    }
    Ok(report.status)
}
