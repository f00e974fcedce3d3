use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlite-pager")]
pub struct Args {
    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Page size used when a call does not provide one.
    #[arg(long, default_value_t = 100)]
    pub default_page_size: usize,

    /// Upper bound for page and batch sizes.
    #[arg(long, default_value_t = 1000)]
    pub max_page_size: usize,

    /// Cursor field used when none can be inferred from the statement.
    #[arg(long, default_value = "id")]
    pub default_cursor_field: String,

    /// Upper bound for the rows a single streaming run may process.
    #[arg(long, default_value_t = 1_000_000)]
    pub stream_max_rows: usize,

    /// Soft deadline for a streaming run, checked between batches.
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Directory for persisted stream results. Kept in memory when absent.
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Allowed directory whitelist (repeatable).
    #[arg(long)]
    pub allowed_dir: Vec<PathBuf>,
}
