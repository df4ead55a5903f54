use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use proxy_scout::{
    config::AppConfig,
    dedupe,
    publish::{FileSink, PublishSink, StdoutSink},
    report,
    scheduler::Scheduler,
    separate_working,
    source::TelegramWebSource,
    storage::open_store,
    ProxyExtractor, ProxyValidator,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Proxy discovery, validation, and ranking pipeline
#[derive(Parser)]
#[command(name = "proxy-scout")]
#[command(about = "Discovers, validates, and ranks proxies announced in channel messages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "proxy-scout.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on its schedule until interrupted
    Run {
        /// Channels to scan, overriding the configured list
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },
    /// Run a single pipeline cycle and exit
    Once {
        /// Channels to scan, overriding the configured list
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },
    /// Extract proxy candidates from a text file without probing them
    Extract {
        /// Input file containing message text
        input: PathBuf,
    },
    /// Probe proxies and report which ones work
    Check {
        /// Proxy URLs (tg://proxy?..., socks5://host:port, host:port);
        /// stored proxies are checked when none are given
        proxies: Vec<String>,
        /// Timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
        /// Measure download/upload throughput as well
        #[arg(long)]
        throughput: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_scout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let command = cli.command.unwrap_or(Commands::Run {
        channels: Vec::new(),
    });
    match command {
        Commands::Run { channels } => run_daemon(config, channels).await,
        Commands::Once { channels } => run_once(config, channels).await,
        Commands::Extract { input } => extract_file(&input),
        Commands::Check {
            proxies,
            timeout,
            throughput,
        } => check_proxies(config, proxies, timeout, throughput).await,
    }
}

async fn run_daemon(config: AppConfig, channel_override: Vec<String>) -> Result<()> {
    let mut scheduler = build_scheduler(config, channel_override).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;

    info!("Pipeline stopped");
    Ok(())
}

async fn run_once(config: AppConfig, channel_override: Vec<String>) -> Result<()> {
    let mut scheduler = build_scheduler(config, channel_override).await?;
    let report = scheduler.run_cycle().await?;

    println!(
        "Cycle finished: {} messages, {} unique candidates, {} working",
        report.messages_fetched, report.unique_candidates, report.working_found
    );
    Ok(())
}

fn extract_file(input: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let extraction = ProxyExtractor::extract(&content, &[]);
    let unique = dedupe(extraction.candidates);

    println!(
        "Found {} matches, {} rejected as malformed, {} unique candidates",
        extraction.found,
        extraction.rejected,
        unique.len()
    );
    for candidate in &unique {
        println!("{}", candidate.url());
    }
    Ok(())
}

async fn check_proxies(
    config: AppConfig,
    proxies: Vec<String>,
    timeout: u64,
    throughput: bool,
) -> Result<()> {
    let candidates = if proxies.is_empty() {
        let store = open_store(&config.storage).await?;
        store.load().await?
    } else {
        let extraction = ProxyExtractor::extract(&proxies.join("\n"), &[]);
        dedupe(extraction.candidates)
    };
    if candidates.is_empty() {
        println!("No proxies to check.");
        return Ok(());
    }

    let validator = ProxyValidator::with_config(
        config
            .validator
            .to_validator_config()
            .with_timeout(Duration::from_secs(timeout))
            .with_measure_throughput(throughput),
    );

    println!("Checking {} proxies, timeout: {}s", candidates.len(), timeout);
    let validated = validator.validate(&candidates).await;
    let (working, failed) = separate_working(validated);
    println!("\nResults: {} working, {} failed", working.len(), failed.len());

    for proxy in &working {
        let latency = proxy.result.latency_ms().unwrap_or(0);
        if throughput {
            println!(
                "  {} ({}ms, {})",
                proxy.candidate.url(),
                latency,
                report::format_speed(proxy.result.best_throughput())
            );
        } else {
            println!("  {} ({}ms)", proxy.candidate.url(), latency);
        }
    }
    Ok(())
}

async fn build_scheduler(config: AppConfig, channel_override: Vec<String>) -> Result<Scheduler> {
    let channels = if channel_override.is_empty() {
        config.channels.clone()
    } else {
        channel_override
    };
    if channels.is_empty() {
        bail!("no channels configured; set `channels` in the config file or pass --channel");
    }

    let source = TelegramWebSource::new(config.source.freshness_hours);
    let validator = ProxyValidator::with_config(config.validator.to_validator_config());
    let sink: Box<dyn PublishSink> = match &config.publish.report_path {
        Some(path) => Box::new(FileSink::new(path)),
        None => Box::new(StdoutSink::new()),
    };
    let store = open_store(&config.storage).await?;

    Ok(Scheduler::new(
        config.scheduler.clone(),
        channels,
        Box::new(source),
        validator,
        sink,
        store,
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
