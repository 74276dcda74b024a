// src/main.rs — queryloop entry point

use clap::Parser;

use queryloop::cli::ask::{self, AskOptions};
use queryloop::cli::{history, inspect, Cli, Commands, EXIT_ABORTED};
use queryloop::infra::config::Config;
use queryloop::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging (respects RUST_LOG / QUERYLOOP_LOG)
    logger::init_logging(if cli.verbose { "info" } else { "warn" });

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load config (falls back to defaults if no config.toml)
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Ask {
            question,
            db,
            max_retries,
            iteration_cap,
            quiet,
            no_oracle,
            json,
        } => {
            let question = question.join(" ");
            let opts = AskOptions {
                db,
                max_retries,
                iteration_cap,
                quiet,
                no_oracle,
                json,
            };
            let status = ask::run_ask(&question, &config, opts).await?;
            Ok(if status.is_aborted() { EXIT_ABORTED } else { 0 })
        }
        Commands::Validate { sql, db } => {
            let passed = inspect::run_validate(&sql, db.as_ref(), &config).await?;
            Ok(if passed { 0 } else { EXIT_ABORTED })
        }
        Commands::Classify { message } => {
            inspect::run_classify(&message.join(" "));
            Ok(0)
        }
        Commands::History {
            limit,
            session,
            prune,
        } => {
            history::run_history(&config, limit, session.as_deref(), prune)?;
            Ok(0)
        }
    }
}
