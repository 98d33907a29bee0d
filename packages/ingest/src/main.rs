#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the event scraper.

use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use event_scrape_ingest::{
    DEFAULT_SOURCES_DIR, IngestClient, Orchestrator, ScrapeOptions, ScrapeResult,
};
use event_scrape_scraper::{crawl::Crawler, inspect};
use event_scrape_source::{
    ConfigError, JsonFileRegistry, export_sources, load_source_configs, sync_sources,
};
use event_scrape_source_models::{SelectorConfig, SourceConfig, SourceDefinition};
use tokio_util::sync::CancellationToken;

const URL_COLUMN_WIDTH: usize = 44;

#[derive(Parser)]
#[command(name = "event_scrape", about = "Public event listing scraper")]
struct Cli {
    /// Base URL of the events ingest API
    #[arg(
        long,
        global = true,
        env = "EVENT_SCRAPE_SERVER_URL",
        default_value = "http://localhost:8080"
    )]
    server: String,
    /// API key for the ingest API (not needed with --dry-run)
    #[arg(
        long,
        global = true,
        env = "EVENT_SCRAPE_API_KEY",
        default_value = "",
        hide_env_values = true
    )]
    api_key: String,
    /// Directory of source definition files
    #[arg(
        long,
        global = true,
        env = "EVENT_SCRAPE_SOURCES_DIR",
        default_value = DEFAULT_SOURCES_DIR
    )]
    sources: PathBuf,
    /// JSON file registry of sources, consulted before the sources directory
    #[arg(long, global = true, env = "EVENT_SCRAPE_REGISTRY")]
    registry: Option<PathBuf>,
    /// Scrape and normalize, but do not submit anything
    #[arg(long, global = true)]
    dry_run: bool,
    /// Normalize at most this many records per source (0 means no limit)
    #[arg(long, global = true)]
    limit: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape JSON-LD events from a single URL
    Url {
        url: String,
    },
    /// List configured sources
    List,
    /// Scrape one configured source by name
    Source {
        name: String,
    },
    /// Scrape every enabled source
    All,
    /// Summarize a page's structure to help write selectors
    Inspect {
        url: String,
    },
    /// Try a set of selectors against a page and print what they match
    Test(TestArgs),
    /// Copy the sources directory into the registry
    Sync,
    /// Write every registry source to a definition file
    Export {
        /// Output directory (defaults to the sources directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TestArgs {
    url: String,
    /// Repeating event container
    #[arg(long)]
    event_list: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    start_date: Option<String>,
    #[arg(long)]
    end_date: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Link to the event's own page
    #[arg(long)]
    url_selector: Option<String>,
    #[arg(long)]
    image: Option<String>,
    /// Link to the next listing page
    #[arg(long)]
    pagination: Option<String>,
    #[arg(long, default_value = "1")]
    max_pages: i64,
}

impl TestArgs {
    fn into_source(self) -> Result<SourceConfig, Box<dyn std::error::Error>> {
        let name = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "selector-test".to_string());

        Ok(SourceDefinition {
            name,
            url: self.url,
            tier: 1,
            max_pages: self.max_pages,
            selectors: SelectorConfig {
                event_list: Some(self.event_list),
                name: self.name,
                start_date: self.start_date,
                end_date: self.end_date,
                location: self.location,
                description: self.description,
                url: self.url_selector,
                image: self.image,
                pagination: self.pagination,
            },
            ..SourceDefinition::default()
        }
        .validate()?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; cancelling");
                cancel.cancel();
            }
        }
    });

    let options = ScrapeOptions {
        dry_run: cli.dry_run,
        limit: cli.limit,
    };

    let needs_api_key = matches!(
        cli.command,
        Commands::Url { .. } | Commands::Source { .. } | Commands::All
    );
    if needs_api_key && !cli.dry_run && cli.api_key.trim().is_empty() {
        return Err("--api-key (or EVENT_SCRAPE_API_KEY) is required unless --dry-run is set".into());
    }

    let registry = cli.registry.map(|path| Arc::new(JsonFileRegistry::new(path)));

    let mut orchestrator =
        Orchestrator::new(IngestClient::new(&cli.server, cli.api_key)?, &cli.sources);
    if let Some(registry) = &registry {
        orchestrator = orchestrator.with_registry(Arc::clone(registry) as _);
    }

    match cli.command {
        Commands::Url { url } => {
            let result = orchestrator.scrape_url(&url, &options, &cancel).await?;
            print_result(result)?;
        }
        Commands::Source { name } => {
            let result = orchestrator.scrape_source(&name, &options, &cancel).await?;
            print_result(result)?;
        }
        Commands::All => {
            let results = orchestrator.scrape_all(&options, &cancel).await?;
            print_table(&results);

            let failed = results.iter().filter(|r| !r.is_success()).count();
            if failed > 0 {
                return Err(format!("{failed} of {} source(s) failed", results.len()).into());
            }
        }
        Commands::List => {
            let sources = match orchestrator.load_sources().await {
                Ok(sources) => sources,
                Err(ConfigError::Invalid { problems, valid }) => {
                    eprintln!("warning: some source definitions are invalid:");
                    for problem in &problems {
                        eprintln!("  {problem}");
                    }
                    valid
                }
                Err(e) => return Err(e.into()),
            };
            print_sources(&sources);
        }
        Commands::Inspect { url } => {
            let result = inspect::inspect(&url).await?;
            print!("{}", inspect::format_inspect_result(&result));
        }
        Commands::Sync => {
            let registry = registry.ok_or("--registry (or EVENT_SCRAPE_REGISTRY) is required")?;
            let sources = match load_source_configs(&cli.sources) {
                Ok(sources) => sources,
                Err(ConfigError::Invalid { problems, valid }) => {
                    eprintln!("warning: skipping invalid source definitions:");
                    for problem in &problems {
                        eprintln!("  {problem}");
                    }
                    valid
                }
                Err(e) => return Err(e.into()),
            };
            if sources.is_empty() {
                println!("No source definitions found in {}", cli.sources.display());
                return Ok(());
            }

            let total = sources.len();
            let report = sync_sources(registry.as_ref(), sources).await;
            println!(
                "Synced {total} source(s) into {}: {} created, {} updated, {} failed",
                registry.path().display(),
                report.created,
                report.updated,
                report.failed
            );
            if report.failed > 0 {
                return Err(format!("{} source(s) could not be stored", report.failed).into());
            }
        }
        Commands::Export { out } => {
            let registry = registry.ok_or("--registry (or EVENT_SCRAPE_REGISTRY) is required")?;
            let out = out.unwrap_or(cli.sources);
            let written = export_sources(registry.as_ref(), &out).await?;
            for path in &written {
                println!("Exported: {}", path.display());
            }
            println!("{} source(s) written to {}", written.len(), out.display());
        }
        Commands::Test(args) => {
            let source = args.into_source()?;
            let events = Crawler::default().crawl(&source, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
            eprintln!("{} event(s) matched", events.len());
        }
    }

    Ok(())
}

fn print_result(mut result: ScrapeResult) -> Result<(), Box<dyn std::error::Error>> {
    if result.dry_run {
        let summary = serde_json::json!({
            "dry_run": true,
            "source": result.source_name,
            "url": result.source_url,
            "found": result.events_found,
            "submitted": result.events_submitted,
        });
        println!("{summary}");
    } else {
        println!("Source:    {}", result.source_name);
        println!("Found:     {}", result.events_found);
        println!("New:       {}", result.events_created);
        println!("Duplicate: {}", result.events_duplicate);
        println!("Failed:    {}", result.events_failed);
    }

    match result.error.take() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_table(results: &[ScrapeResult]) {
    println!(
        "{:<32} {:>6} {:>6} {:>6} {:>7}  STATUS",
        "SOURCE", "FOUND", "NEW", "DUP", "FAILED"
    );
    println!("{}", "-".repeat(72));

    let (mut found, mut created, mut duplicate, mut failed) = (0, 0, 0, 0);

    for result in results {
        let status = if result.is_rate_limited() {
            "rate-limited"
        } else if result.is_success() {
            "ok"
        } else {
            "error"
        };

        println!(
            "{:<32} {:>6} {:>6} {:>6} {:>7}  {status}",
            truncate(&result.source_name, 32),
            result.events_found,
            result.events_created,
            result.events_duplicate,
            result.events_failed,
        );

        found += result.events_found;
        created += result.events_created;
        duplicate += result.events_duplicate;
        failed += result.events_failed;
    }

    println!("{}", "-".repeat(72));
    println!("{:<32} {found:>6} {created:>6} {duplicate:>6} {failed:>7}", "TOTAL");
}

fn print_sources(sources: &[SourceConfig]) {
    println!(
        "{:<28} {:<width$} {:>4} {:>7}  SCHEDULE",
        "NAME",
        "URL",
        "TIER",
        "ENABLED",
        width = URL_COLUMN_WIDTH
    );
    println!("{}", "-".repeat(28 + URL_COLUMN_WIDTH + 25));

    for source in sources {
        println!(
            "{:<28} {:<width$} {:>4} {:>7}  {}",
            truncate(&source.name, 28),
            truncate(&source.url, URL_COLUMN_WIDTH),
            source.tier.as_u8(),
            if source.enabled { "yes" } else { "no" },
            source.schedule,
            width = URL_COLUMN_WIDTH
        );
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
