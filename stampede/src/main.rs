mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use stampede_core::{
    HomogeneousConfig, MultiUserConfig, NullSink, OllamaGateway, PromptSource, RunConfig,
    RunRecord, RunRegistry, RunSink, RunStatus,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, CommonArgs, OutputFormat};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (common, config) = match cli.command {
        Command::Flood(args) => {
            let config = RunConfig::Homogeneous(HomogeneousConfig {
                model: args.common.model.clone(),
                concurrency: args.common.concurrency,
                total_requests: args.requests,
                prompt: args.prompt,
            });
            (args.common, config)
        }
        Command::Users(args) => {
            let prompts = match &args.prompts_file {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("reading prompts file {}", path.display()))?;
                    PromptSource::from_custom_text(&text)
                }
                None => PromptSource::RandomPool,
            };
            let config = RunConfig::MultiUser(MultiUserConfig {
                model: args.common.model.clone(),
                user_count: args.users,
                queries_per_user: args.queries_per_user,
                concurrency: args.common.concurrency,
                delay_between_queries: args.delay,
                prompts,
                tpm_monitoring: !args.no_tpm,
            });
            (args.common, config)
        }
    };

    let gateway = Arc::new(OllamaGateway::new(&common.url));
    let sink: Arc<dyn RunSink> = match &common.record_file {
        Some(path) => Arc::new(stampede_core::JsonLinesSink::new(path.clone())),
        None => Arc::new(NullSink),
    };
    let registry = Arc::new(RunRegistry::new(gateway, sink));

    let id = registry.start(config).context("invalid run configuration")?;
    let record = drive_to_completion(&registry, id, &common).await?;

    match common.output {
        OutputFormat::Human => print_summary(&record),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*record)?),
    }

    Ok(match record.status {
        RunStatus::Error => ExitCode::from(1),
        _ => ExitCode::SUCCESS,
    })
}

/// Polls the run once a second until it reaches a terminal status. Ctrl-C
/// requests a cooperative stop; the poll loop keeps running until the
/// workers drain.
async fn drive_to_completion(
    registry: &Arc<RunRegistry>,
    id: stampede_core::RunId,
    common: &CommonArgs,
) -> anyhow::Result<Arc<RunRecord>> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if registry.stop(id) {
                    eprintln!("stop requested, letting in-flight queries finish...");
                }
            }
            _ = ticker.tick() => {
                let Some(snapshot) = registry.status(id) else {
                    anyhow::bail!("run {id} disappeared from the registry");
                };

                if matches!(common.output, OutputFormat::Human) {
                    let done = snapshot.completed_requests + snapshot.failed_requests;
                    eprintln!(
                        "[{}] {:>5.1}% ({} ok, {} failed, {done} done)",
                        snapshot.status,
                        snapshot.progress,
                        snapshot.completed_requests,
                        snapshot.failed_requests,
                    );
                }

                if snapshot.status.is_terminal() {
                    break;
                }
            }
        }
    }

    // The terminal snapshot can be observed a beat before the record is
    // archived.
    for _ in 0..100 {
        if let Some(record) = registry.record(id) {
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("run {id} finished but was never archived")
}

fn print_summary(record: &RunRecord) {
    let stats = &record.statistics;

    println!();
    println!("run {}", record.id);
    println!("  status           {}", record.status);
    if let Some(error) = &record.error {
        println!("  error            {error}");
    }
    println!("  duration         {:.2}s", record.duration_seconds);
    println!(
        "  requests         {} total, {} ok, {} failed ({:.1}% success)",
        stats.total_requests, stats.successful_requests, stats.failed_requests, stats.success_rate
    );

    if stats.successful_requests > 0 {
        println!(
            "  latency          min {:.0}ms / mean {:.0}ms / median {:.0}ms / max {:.0}ms (stddev {:.0}ms)",
            stats.latency.min * 1000.0,
            stats.latency.mean * 1000.0,
            stats.latency.median * 1000.0,
            stats.latency.max * 1000.0,
            stats.latency.std_dev * 1000.0,
        );
        println!("  throughput       {:.2} req/s", stats.requests_per_second);
        println!("  tokens           {}", stats.total_tokens);
    }

    if !stats.tpm_samples.is_empty() {
        println!(
            "  tokens/minute    avg {:.1}, peak {:.1} across {} window(s)",
            stats.average_tpm,
            stats.peak_tpm,
            stats.tpm_samples.len()
        );
    }

    for session in record.user_sessions.values() {
        println!(
            "  user {:<2}          {} ok, {} failed, {} tokens",
            session.user_id, session.completed_queries, session.failed_queries, session.total_tokens
        );
    }
}
