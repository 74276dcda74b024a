// src/cli/mod.rs — CLI definition (clap derive)

pub mod ask;
pub mod history;
pub mod inspect;
pub mod progress;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "queryloop",
    about = "Answer questions against a SQL database with validated, self-correcting queries",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at info level (RUST_LOG / QUERYLOOP_LOG still take precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question and print the answer
    Ask {
        /// The question, in plain language
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,

        /// Target SQLite database (overrides [database] path)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Retries allowed after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Upper bound on state transitions per session
        #[arg(long)]
        iteration_cap: Option<u32>,

        /// Suppress progress output (only emit the answer)
        #[arg(short, long)]
        quiet: bool,

        /// Decide retries with the fixed rule table instead of the reasoning model
        #[arg(long)]
        no_oracle: bool,

        /// Print the full session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the validation layers against a query without executing it
    Validate {
        /// The SQL to check
        sql: String,

        /// Target SQLite database; without one only the static layers run
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Classify a raw database error message
    Classify {
        /// The error text as reported by the database
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Show recent sessions and aggregate statistics
    History {
        /// Number of sessions to list
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Show every attempt of one session
        #[arg(long)]
        session: Option<String>,

        /// Delete all but the newest N sessions
        #[arg(long)]
        prune: Option<usize>,
    },
}

/// Exit status for a finished command: 0 on success, 2 when the answer
/// could not be produced.
pub const EXIT_ABORTED: i32 = 2;
