mod client;
mod config;
mod error;
mod logging;
mod probe;
mod quota;
mod range;
mod resolver;
mod scan;
mod sink;
#[cfg(test)]
mod testing;
mod traits;
mod types;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use client::HttpClient;
use config::Settings;
use indicatif::{ProgressBar, ProgressStyle};
use scan::Scanner;
use sink::FileSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use types::{ProbeMode, ScanSummary};

#[derive(Parser)]
#[command(name = "edgeprobe")]
#[command(about = "Find source addresses that reach a probe target fast", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write settings (e.g., edgeprobe init --count 10 --domain speed.example.com)
    Init {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Probe address ranges until enough endpoints are accepted
    Run {
        /// File with one CIDR block or address per line
        #[arg(long, short)]
        ranges: PathBuf,

        /// Local candidate target list (one host per line)
        #[arg(long, short)]
        targets: Option<PathBuf>,

        /// Where accepted endpoints are appended
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Resolve and print the probe target only
    Targets {
        /// Local candidate target list (one host per line)
        #[arg(long, short)]
        targets: Option<PathBuf>,

        /// Save every known candidate to this file instead of resolving
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// Settings that can be given on the command line.
#[derive(Args, Default)]
struct Overrides {
    /// How many accepted endpoints to collect
    #[arg(long, short)]
    count: Option<usize>,

    /// Domain of your personal server behind the edge network
    #[arg(long)]
    domain: Option<String>,

    /// Use plain http instead of https
    #[arg(long)]
    insecure: bool,

    /// Per-probe timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum probes in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Upload/download size in bytes
    #[arg(long)]
    payload: Option<u64>,

    #[arg(long, value_enum)]
    mode: Option<ProbeMode>,

    /// Endpoints pulled from the ranges per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Remote candidate target list
    #[arg(long)]
    targets_url: Option<String>,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(count) = self.count {
            settings.count = count;
        }
        if let Some(domain) = self.domain {
            settings.speed_domain = domain;
        }
        if self.insecure {
            settings.secure = false;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(payload) = self.payload {
            settings.payload_bytes = payload;
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(url) = self.targets_url {
            settings.targets_url = Some(url);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let settings_path = cli.config.unwrap_or_else(Settings::default_path);

    match cli.command {
        Commands::Init { overrides } => handle_init(&settings_path, overrides).await?,
        Commands::Run {
            ranges,
            targets,
            output,
            overrides,
        } => handle_run(&settings_path, &ranges, targets, output, overrides).await?,
        Commands::Targets { targets, save } => handle_targets(&settings_path, targets, save).await?,
    }

    Ok(())
}

// --- Handlers ---

async fn load_settings(path: &Path) -> Result<Settings> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        bail!(
            "Settings not found at {:?}. Please initialize first: `edgeprobe init`",
            path
        );
    }
    Ok(Settings::load(path).await?)
}

async fn handle_init(path: &Path, overrides: Overrides) -> Result<()> {
    let mut settings = Settings::default();
    overrides.apply(&mut settings);
    settings.save(path).await?;

    println!("Settings saved to {:?}.", path);
    println!("Run 'edgeprobe run --ranges <FILE>' to start probing.");
    Ok(())
}

async fn handle_targets(path: &Path, targets: Option<PathBuf>, save: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(path).await?;
    let client = HttpClient::new(settings.timeout())?;
    let sources = resolver::candidate_sources(&settings, targets);

    if let Some(save_path) = save {
        let candidates = resolver::collect_candidates(&client, &sources, settings.scheme()).await;
        config::write_target_list(&save_path, &candidates).await?;
        println!("Saved {} candidate(s) to {:?}.", candidates.len(), save_path);
        return Ok(());
    }

    let target = resolver::resolve_target(&client, &sources, settings.scheme()).await?;
    println!("{}", target);
    Ok(())
}

async fn handle_run(
    path: &Path,
    ranges_path: &Path,
    targets: Option<PathBuf>,
    output: Option<PathBuf>,
    overrides: Overrides,
) -> Result<()> {
    let mut settings = load_settings(path).await?;
    overrides.apply(&mut settings);
    if let Some(output) = output {
        settings.output = output;
    }
    settings.validate()?;

    let (ranges, invalid) = range::load_ranges(ranges_path).await?;
    if !invalid.is_empty() {
        warn!("Skipped {} invalid range(s)", invalid.len());
    }
    if ranges.is_empty() {
        bail!("No usable address ranges in {:?}", ranges_path);
    }
    for r in &ranges {
        info!("Range {} ({} - {}, {} addresses)", r.spec, r.first(), r.last(), r.size());
    }
    let expander = range::RangeExpander::new(ranges);

    let client = Arc::new(HttpClient::new(settings.timeout())?);
    let sink = Arc::new(FileSink::open(&settings.output).await?);
    let sources = resolver::candidate_sources(&settings, targets);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {pos} probed, {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("0/{} accepted", settings.count));
    pb.enable_steady_tick(Duration::from_millis(120));

    let scanner = Scanner::new(client, sink.clone(), settings).with_progress(pb.clone());
    let summary = scanner.run(&sources, &expander, invalid.len()).await;
    pb.finish_and_clear();
    let summary = summary?;

    print_summary(&summary);
    println!("Accepted endpoints appended to {:?}.", sink.path());
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    let mut ranked: Vec<_> = summary
        .accepted
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.metric.map(|m| (r.endpoint, m)))
        .collect();
    ranked.sort_by(|a, b| b.1.upload_mbps.total_cmp(&a.1.upload_mbps));

    println!();
    println!(
        "{:<4} {:<10} {:<12} {:<12} ADDRESS",
        "RANK", "LATENCY", "UPLOAD", "DOWNLOAD"
    );
    println!("{}", "-".repeat(70));

    for (i, (endpoint, metric)) in ranked.iter().enumerate() {
        let download = metric
            .download_mbps
            .map(|d| format!("{:.2}Mbps", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<10} {:<12} {:<12} {}",
            i + 1,
            format!("{}ms", metric.latency_ms),
            format!("{:.2}Mbps", metric.upload_mbps),
            download,
            endpoint
        );
    }
    println!("{}", "-".repeat(70));

    println!(
        "Accepted {}/{} probed endpoints against {}{}",
        ranked.len(),
        summary.attempted,
        summary.target,
        if summary.quota_met { "" } else { " (quota not reached)" }
    );
    if summary.invalid_ranges > 0 {
        println!("{} input range(s) were invalid and skipped.", summary.invalid_ranges);
    }
}
