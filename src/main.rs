//! Shiori main entry point
//!
//! This is the command-line interface for the Shiori chapter crawler.

use clap::Parser;
use shiori::config::{load_config_with_hash, Config};
use shiori::crawler::run_crawl;
use shiori::output::{asset_dir, sanitize_file_name};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Shiori: a crawler for serialized web fiction
///
/// Shiori walks a book's table of contents, fetches every chapter (following
/// multi-page chapters and unlinked next chapters), and writes one HTML file
/// per chapter. Chapters saved on an earlier run are skipped.
#[derive(Parser, Debug)]
#[command(name = "shiori")]
#[command(version)]
#[command(about = "Crawl serialized web fiction into per-chapter files", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only crawl the book with this name
    #[arg(long, value_name = "NAME")]
    book: Option<String>,

    /// Treat previously failed chapters as done instead of retrying them
    #[arg(long)]
    ignore_failed: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, cli.book.as_deref(), cli.ignore_failed)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash, cli.book, cli.ignore_failed).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shiori=info,warn"),
            1 => EnvFilter::new("shiori=debug,info"),
            2 => EnvFilter::new("shiori=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: prints the resolved per-book plan
fn handle_dry_run(
    config: &Config,
    only: Option<&str>,
    ignore_failed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Shiori Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Asset workers: {}", config.crawler.asset_workers);
    println!("  User agent: {}", config.crawler.user_agent);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let books: Vec<_> = config
        .books
        .iter()
        .filter(|b| only.map_or(true, |name| b.name == name))
        .collect();
    if books.is_empty() {
        return Err(format!("no book named '{}'", only.unwrap_or_default()).into());
    }

    println!("\nBooks ({}):", books.len());
    for book in books {
        let settings = book.settings(&config.crawler);
        println!("  - {}", book.name);
        println!("    TOC: {}", book.toc_url);
        println!(
            "    Chapters: {}",
            book.text_dir.join(sanitize_file_name(&book.name)).display()
        );
        println!(
            "    Images: {}",
            asset_dir(&book.image_dir, &book.name).display()
        );
        println!(
            "    Retry budget: {}, chapter timeout: {:?}",
            settings.retry_budget, settings.chapter_timeout
        );
        println!(
            "    Request delay: {:?}, host parallelism: {}",
            settings.request_delay, settings.host_parallelism
        );
        println!(
            "    Ignore failed: {}",
            settings.ignore_failed || ignore_failed
        );
        if !book.headers.is_empty() {
            let mut names: Vec<_> = book.headers.keys().collect();
            names.sort();
            println!("    Headers: {:?}", names);
        }
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use shiori::output::{load_statistics, print_statistics};
    use shiori::storage::SqliteStorage;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: &str,
    book: Option<String>,
    ignore_failed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping crawl");
                cancel.cancel();
            }
        });
    }

    match run_crawl(config, config_hash, book, ignore_failed, cancel).await {
        Ok(report) => {
            for failed in report.failed_books() {
                tracing::error!("Book '{}' could not be crawled", failed);
            }
            if report.interrupted {
                tracing::warn!("Crawl interrupted; run again to continue");
            } else {
                tracing::info!("Crawl completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
