//! Proxyman Rust - CLI Entry Point
//!
//! Thin front end over [`proxyman_rust::Manager`]. Every subcommand opens the
//! manager from the configuration file, does one thing and exits.

// Use mimalloc as global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use proxyman_rust::{Endpoint, Manager, Progress, VERSION};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "proxyman-rust")]
#[command(version = VERSION)]
#[command(about = "Verify candidate proxies and manage the system proxy")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the candidate list
    List,
    /// Add an endpoint (host:port)
    Add { endpoint: String },
    /// Remove an endpoint
    Remove { endpoint: String },
    /// Replace an endpoint in place
    Edit { old: String, new: String },
    /// Import endpoints from a file, or from a URL with --url
    Import {
        source: String,
        #[arg(long)]
        url: bool,
        /// Download timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Export the candidate list
    Export { path: PathBuf },
    /// Probe every endpoint and keep the fast ones
    Test,
    /// Probe one endpoint without saving anything
    Check { endpoint: String },
    /// Make an endpoint the system proxy
    Apply { endpoint: String },
    /// Turn the system proxy off
    Clear,
    /// Show the system proxy
    Status,
    /// Run the startup sequence (test, then re-apply the last proxy)
    Startup,
    /// Print the last saved test details
    Details,
}

fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("proxyman-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let json = matches!(args.log_format, LogFormat::Json);
    tracing_subscriber::registry()
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("proxyman_rust=info".parse()?))
        .init();

    info!("Proxyman Rust v{}", VERSION);

    let mut manager = match Manager::open(&args.config) {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to open {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::List => {
            for endpoint in manager.store().endpoints() {
                println!("{}", endpoint);
            }
        }
        Command::Add { endpoint } => {
            let endpoint = Endpoint::parse(&endpoint)?;
            if manager.store_mut().add(endpoint.clone())? {
                println!("Added {}", endpoint);
            } else {
                println!("{} is already listed", endpoint);
            }
        }
        Command::Remove { endpoint } => {
            let endpoint = Endpoint::parse(&endpoint)?;
            if manager.store_mut().remove(&endpoint)? {
                println!("Removed {}", endpoint);
            } else {
                bail!("{} is not listed", endpoint);
            }
        }
        Command::Edit { old, new } => {
            let old = Endpoint::parse(&old)?;
            let Some(report) = manager.edit(&old, &new).await? else {
                bail!("{} is not listed, or {} already is", old, new.trim());
            };
            println!("Replaced {} with {}", old, new.trim());
            if let Some(outcome) = report.reapplied {
                print_outcome("Re-applied system proxy", outcome.success, outcome.error.as_deref());
            }
            if let Some(verdict) = report.verdict {
                print_verdict(&verdict);
            }
        }
        Command::Import { source, url, timeout } => {
            let report = if url {
                manager
                    .store_mut()
                    .import_url(&source, Duration::from_secs(timeout))
                    .await?
            } else {
                manager.store_mut().import(Path::new(&source))?
            };
            println!(
                "Imported {} ({} duplicates, {} malformed lines skipped)",
                report.imported, report.duplicates, report.skipped
            );
        }
        Command::Export { path } => {
            let count = manager.store().export(&path)?;
            println!("Exported {} endpoints to {}", count, path.display());
        }
        Command::Test => {
            let cancel = cancel_on_ctrl_c();
            let summary = manager.test_all(&cancel, print_progress).await?;
            eprintln!();
            for verdict in summary.verdicts.iter().filter(|v| v.is_reachable()) {
                print_verdict(verdict);
            }
            if summary.cancelled {
                println!(
                    "Cancelled after {}/{} endpoints; nothing saved",
                    summary.tested, summary.total
                );
            } else {
                println!(
                    "{} tested, {} reachable, {} fast (kept)",
                    summary.total, summary.reachable, summary.fast
                );
            }
        }
        Command::Check { endpoint } => {
            let endpoint = Endpoint::parse(&endpoint)?;
            print_verdict(&manager.test_one(&endpoint).await);
        }
        Command::Apply { endpoint } => {
            let endpoint = Endpoint::parse(&endpoint)?;
            let outcome = manager.apply(&endpoint).await;
            print_outcome(&format!("Apply {}", endpoint), outcome.success, outcome.error.as_deref());
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Clear => {
            let outcome = manager.clear().await;
            print_outcome("Clear system proxy", outcome.success, outcome.error.as_deref());
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Status => {
            let state = manager.status().await;
            match (&state.active_endpoint, state.enabled) {
                (Some(e), true) => println!("System proxy: {} (enabled)", e),
                (Some(e), false) => println!("System proxy: off (last {})", e),
                (None, _) => println!("System proxy: off"),
            }
            if let Some(at) = state.updated_at {
                println!("Updated: {}", at.to_rfc3339());
            }
        }
        Command::Startup => {
            let cancel = cancel_on_ctrl_c();
            let report = manager.startup(&cancel).await;
            if let Some(summary) = report.run {
                println!(
                    "{} tested, {} reachable, {} fast{}",
                    summary.total,
                    summary.reachable,
                    summary.fast,
                    if summary.cancelled { " (cancelled)" } else { "" }
                );
            }
            if let Some(outcome) = report.applied {
                print_outcome("Re-apply last proxy", outcome.success, outcome.error.as_deref());
            }
        }
        Command::Details => {
            let rows = manager
                .results()
                .load_details()
                .context("reading details file")?;
            for row in rows {
                println!("{}", row.to_line());
            }
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling test");
            token.cancel();
        }
    });
    cancel
}

fn print_progress(p: Progress) {
    let mut err = std::io::stderr();
    let _ = write!(
        err,
        "\r[{:>3.0}%] {}/{} {}",
        p.fraction_done * 100.0,
        p.completed,
        p.total,
        if p.success { "ok  " } else { "fail" }
    );
    let _ = err.flush();
}

fn print_verdict(v: &proxyman_rust::EndpointVerdict) {
    match (v.best_protocol, v.best_latency) {
        (Some(protocol), Some(latency)) => println!(
            "{} | {} | {:.2}s{}",
            v.endpoint,
            protocol,
            latency.as_secs_f64(),
            if v.is_fast { "" } else { " (slow)" }
        ),
        _ => println!("{} | unreachable", v.endpoint),
    }
}

fn print_outcome(what: &str, success: bool, error: Option<&str>) {
    if success {
        println!("{}: ok", what);
    } else {
        println!("{}: failed: {}", what, error.unwrap_or("unknown error"));
    }
}
