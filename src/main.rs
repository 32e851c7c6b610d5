//! fathom - Interactive disk usage analyzer.
//!
//! Usage:
//!   fathom [PATH]                    Scan a local directory and print a summary
//!   fathom --export scan.json PATH   Headless scan, write export file ('-' = stdout)
//!   fathom --import scan.json        Load a previous export
//!   fathom user@host [REMOTE-PATH]   Scan over a remote file-transfer session
//!   fathom --help                    Show all options

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use fathom_core::{DirNode, Error, ScanOptions};
use fathom_scan::{scan, Progress, ScanStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "fathom",
    version,
    about = "Interactive disk usage analyzer",
    long_about = "fathom scans a directory tree, aggregates apparent size and disk\n\
                  usage per directory, and can export the result for later browsing.\n\
                  Remote targets are scanned over a file-transfer session."
)]
struct Cli {
    /// Local path to scan (default '.'), or 'user@host [remote-path]'
    #[arg(value_name = "TARGET", num_args = 0..=2)]
    targets: Vec<String>,

    /// Headless scan: write the export to this path, or stdout with '-'
    #[arg(long, value_name = "PATH")]
    export: Option<String>,

    /// Load an export file instead of scanning
    #[arg(long, value_name = "PATH")]
    import: Option<std::path::PathBuf>,

    /// Show hidden files (default)
    #[arg(long)]
    hidden: bool,

    /// Hide files whose name starts with '.'
    #[arg(long, conflicts_with = "hidden")]
    no_hidden: bool,

    /// Follow symbolic links during the scan
    #[arg(long)]
    follow_symlinks: bool,

    /// Comma-separated list of directory names to exclude
    #[arg(long, value_name = "NAMES")]
    exclude: Option<String>,

    /// Max concurrent directory scans (0 = auto: 3x CPU cores)
    #[arg(
        short = 'j',
        value_name = "N",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    concurrency: i64,

    /// Reduce runtime memory reclamation during the scan (advisory)
    #[arg(long = "no-gc")]
    no_gc: bool,

    /// SSH port for remote scans
    #[arg(long, value_name = "PORT", default_value_t = 22)]
    ssh_port: u16,

    /// Disable SSH password prompts (key/agent auth only)
    #[arg(long)]
    ssh_batch: bool,

    /// SSH connection timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    ssh_timeout: u64,

    /// Remote scan timeout in seconds (0 = no limit)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    ssh_scan_timeout: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum ScanTarget {
    Local(String),
    Remote {
        destination: String,
        remote_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let filter = EnvFilter::try_from_env("FATHOM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    if cli.concurrency < 0 {
        bail!("concurrency (-j) must be >= 0");
    }
    if cli.ssh_port == 0 {
        bail!("ssh-port must be between 1 and 65535");
    }

    // Import mode: no scanning at all.
    if let Some(import_path) = &cli.import {
        if !cli.targets.is_empty() {
            bail!("--import cannot be used with scan targets");
        }
        let root = fathom_ops::import(import_path)?;
        match &cli.export {
            Some(export_path) => {
                fathom_ops::export(&root, export_path, VERSION)?;
                if export_path != fathom_ops::STDOUT_SINK {
                    println!("Exported to {export_path}");
                }
            }
            None => print_summary(&root),
        }
        return Ok(());
    }

    let mut opts = ScanOptions {
        show_hidden: cli.hidden || !cli.no_hidden,
        follow_symlinks: cli.follow_symlinks,
        concurrency: cli.concurrency as usize,
        disable_aggressive_gc: cli.no_gc,
        ..ScanOptions::default()
    };
    if let Some(exclude) = &cli.exclude {
        opts.exclude_names = exclude
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if cli.ssh_scan_timeout > 0 {
        opts.scan_timeout = Some(Duration::from_secs(cli.ssh_scan_timeout));
    }

    match resolve_scan_target(&cli.targets)? {
        ScanTarget::Remote { destination, .. } => {
            debug!(
                port = cli.ssh_port,
                batch = cli.ssh_batch,
                timeout = cli.ssh_timeout,
                scan_timeout = cli.ssh_scan_timeout,
                "remote transport flags parsed"
            );
            // The transport session (and its authentication) is supplied by
            // an embedding application through fathom-remote's client trait;
            // this binary does not carry one.
            Err(Error::Transport {
                message: format!(
                    "cannot reach {destination}: no file-transfer client is configured in this build"
                ),
            }
            .into())
        }
        ScanTarget::Local(path) => run_local_scan(&path, opts, &cli).await,
    }
}

async fn run_local_scan(path: &str, opts: ScanOptions, cli: &Cli) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    // Keep stderr quiet while the export itself is streaming to stdout.
    let stdout_export = cli.export.as_deref() == Some(fathom_ops::STDOUT_SINK);
    let (progress, printer) = if stdout_export {
        (None, None)
    } else {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Progress>(16);
        let printer = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                if p.done {
                    eprintln!(
                        "\rScanned {} files, {} dirs in {:.1}s ({} errors)",
                        p.files_scanned,
                        p.dirs_scanned,
                        p.duration.as_secs_f64(),
                        p.errors
                    );
                } else {
                    eprint!(
                        "\rScanning: {} files, {} dirs, {} errors...",
                        p.files_scanned, p.dirs_scanned, p.errors
                    );
                }
            }
        });
        (Some(tx), Some(printer))
    };

    let result = scan(Path::new(path), &opts, cancel, progress).await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let result = result?;

    if result.status == ScanStatus::Canceled {
        bail!("scan canceled");
    }

    match &cli.export {
        Some(export_path) => {
            fathom_ops::export(&result.root, export_path, VERSION)?;
            if export_path != fathom_ops::STDOUT_SINK {
                println!("Exported to {export_path}");
            }
        }
        None => print_summary(&result.root),
    }
    Ok(())
}

/// Print a one-screen overview of the tree: totals plus the largest
/// immediate children. Interactive browsing lives in a separate frontend.
fn print_summary(root: &Arc<DirNode>) {
    let total = root.size().max(0) as u64;

    println!("{}", "─".repeat(64));
    println!(
        " {} — {} ({} on disk)",
        root.name,
        format_size(root.size()),
        format_size(root.usage()),
    );
    println!(" {} items", root.item_count());
    println!("{}", "─".repeat(64));

    let mut children = root.snapshot_children();
    children.sort_by_key(|c| std::cmp::Reverse(c.size()));

    for child in children.iter().take(20) {
        let ratio = if total > 0 {
            child.size().max(0) as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let marker = if child.is_dir() { "/" } else { "" };
        println!(
            " {:>10}  {:>5.1}%  {}{}",
            format_size(child.size()),
            ratio,
            child.name(),
            marker
        );
    }
    if children.len() > 20 {
        println!(" ... and {} more", children.len() - 20);
    }
}

fn format_size(bytes: i64) -> String {
    humansize::format_size(bytes.max(0) as u64, humansize::BINARY)
}

/// Decide whether the positional arguments name a local path or a remote
/// destination. An existing local path always wins.
fn resolve_scan_target(args: &[String]) -> Result<ScanTarget> {
    if args.is_empty() {
        return Ok(ScanTarget::Local(".".to_string()));
    }

    let first = &args[0];
    if Path::new(first).exists() {
        if args.len() > 1 {
            bail!("too many positional arguments for local scan");
        }
        return Ok(ScanTarget::Local(first.clone()));
    }

    if looks_remote(first) {
        validate_remote_target(first)?;
        let remote_path = match args.get(1).map(|s| s.trim()) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => ".".to_string(),
        };
        return Ok(ScanTarget::Remote {
            destination: first.clone(),
            remote_path,
        });
    }

    if args.len() > 1 {
        bail!("too many positional arguments");
    }
    Ok(ScanTarget::Local(first.clone()))
}

fn looks_remote(raw: &str) -> bool {
    !raw.contains(['/', '\\']) && raw.matches('@').count() == 1
}

/// Validate a `user@host` destination. Ports are configured with
/// `--ssh-port`, never inline.
fn validate_remote_target(raw: &str) -> Result<()> {
    let (user, host) = raw.split_once('@').unwrap_or(("", ""));
    if user.is_empty() || host.is_empty() {
        bail!("invalid remote target {raw:?}: expected user@host");
    }
    if user.starts_with('-') || host.starts_with('-') {
        bail!("invalid remote target {raw:?}");
    }
    if user.contains(char::is_whitespace) || host.contains(char::is_whitespace) {
        bail!("invalid remote target {raw:?}: spaces are not allowed");
    }

    if let Some(bracketed) = host.strip_prefix('[') {
        match bracketed.find(']') {
            None => bail!("invalid remote target {raw:?}: malformed bracketed host"),
            Some(0) => bail!("invalid remote target {raw:?}: empty host"),
            Some(end) => {
                let rest = &bracketed[end + 1..];
                if !rest.is_empty() {
                    if let Some(port) = rest.strip_prefix(':') {
                        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                            bail!("remote target {raw:?} must not include :port; use --ssh-port");
                        }
                    }
                    bail!("invalid remote target {raw:?}: malformed bracketed host");
                }
            }
        }
    } else {
        if host.contains(']') {
            bail!("invalid remote target {raw:?}: malformed bracketed host");
        }
        if let Some((_, port)) = host.split_once(':') {
            if !port.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                bail!("remote target {raw:?} must not include :port; use --ssh-port");
            }
        }
    }

    Ok(())
}
