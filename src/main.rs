//! pagefold CLI: URL similarity survey tool

use anyhow::{Context, Result};
use clap::Parser;
use pagefold::config::{Options, OutputFormat};
use pagefold::{report, runner};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "pagefold")]
#[command(about = "Fetch, render, and cluster URLs by page similarity")]
#[command(version)]
struct Cli {
    /// URL list: a .txt file (one URL per line, # comments) or comma-separated URLs
    #[arg(short = 'l', long = "urls", required = true)]
    urls: String,

    /// Output file path (.json or .csv)
    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Optional TOML configuration file for tunables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Concurrency for both HTTP fetching and rendering
    #[arg(short, long)]
    threads: Option<usize>,

    /// HTTP request timeout in seconds
    #[arg(long)]
    http_timeout: Option<u64>,

    /// Per-page render timeout in seconds
    #[arg(long)]
    page_timeout: Option<u64>,

    /// URLs per processing batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Similarity threshold written into report meta
    #[arg(long)]
    sim_threshold: Option<f64>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut opts = match &cli.config {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };

    opts.urls = vec![cli.urls];
    opts.output = cli.output;
    if let Some(threads) = cli.threads {
        opts.parallel = threads;
        opts.render_parallel = threads;
    }
    if let Some(secs) = cli.http_timeout {
        opts.http_timeout_secs = secs;
    }
    if let Some(secs) = cli.page_timeout {
        opts.page_timeout_secs = secs;
    }
    if let Some(size) = cli.batch_size {
        opts.batch_size = size;
    }
    if let Some(threshold) = cli.sim_threshold {
        opts.sim_threshold = threshold;
    }

    opts.validate()?;
    opts.format = OutputFormat::from_path(&opts.output)
        .context("output path must end in .json or .csv")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            signal_cancel.cancel();
        }
    });

    let full_report = runner::run(&opts, cancel).await?;

    match opts.format {
        OutputFormat::Json => report::write_json(&full_report, &opts.output)?,
        OutputFormat::Csv => report::write_csv(&full_report, &opts.output)?,
    }

    info!(
        "report written to {}: {} URLs, {} eligible pages, {} cluster(s)",
        opts.output.display(),
        full_report.meta.total_urls,
        full_report.meta.eligible_html_urls,
        full_report.meta.total_clusters
    );

    Ok(())
}
