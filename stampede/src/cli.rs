use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress and summary.
    Human,

    /// Final run record as a single JSON object on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    version,
    about = "Load-test a local LLM inference endpoint"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Flood the endpoint with one prompt from N concurrent workers.
    Flood(FloodArgs),

    /// Simulate several users, each with its own prompt sequence.
    Users(UsersArgs),
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Base URL of the inference endpoint.
    #[arg(long, env = "STAMPEDE_URL", default_value = "http://localhost:11434")]
    pub url: String,

    /// Model identifier to test.
    #[arg(long)]
    pub model: String,

    /// Worker pool size.
    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Append the archived run record to this JSON-lines file.
    #[arg(long)]
    pub record_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FloodArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Total number of requests to issue.
    #[arg(long, default_value_t = 20)]
    pub requests: usize,

    /// The single prompt every request carries.
    #[arg(long)]
    pub prompt: String,
}

#[derive(Debug, Args)]
pub struct UsersArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of simulated users (1-10).
    #[arg(long, default_value_t = 2)]
    pub users: u32,

    /// Queries each simulated user issues.
    #[arg(long, default_value_t = 3)]
    pub queries_per_user: usize,

    /// Pause between a worker's successive queries (e.g. 500ms, 2s).
    #[arg(long, value_parser = humantime::parse_duration, default_value = "500ms")]
    pub delay: Duration,

    /// File with one prompt per line; omitted means the built-in catalog.
    #[arg(long)]
    pub prompts_file: Option<PathBuf>,

    /// Disable tokens-per-minute sampling.
    #[arg(long)]
    pub no_tpm: bool,
}
