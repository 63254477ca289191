//! cratedig: scan a music library, classify album directories with a language
//! model, and produce a reorganization plan. Never moves a file.

mod classify;
mod report;
mod scan;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cratedig_core::cache::records::ExecutionRecordStore;
use cratedig_core::cache::response::ResponseCache;
use cratedig_core::config::api_key_from_env;
use cratedig_core::{
    BatchOrchestrator, CacheCoordinator, CallParams, ClientOptions, Config, OpenAiClient,
    SchemaValidator, StructuredCallClient,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cratedig",
    version,
    about = "Classify album directories with an LLM and plan a library reorganization"
)]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover album directories without calling any API
    Scan(ScanArgs),
    /// Classify albums and write the reorganization plan
    Plan(PlanArgs),
    /// Delete expired cache entries from both cache layers
    Sweep,
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Library root to walk
    root: PathBuf,

    /// Emit the album list as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Library root to walk
    root: PathBuf,

    /// Write the full run report here
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write the move plan as CSV here
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the planned library layout as a tree
    #[arg(long)]
    tree: bool,

    /// Classify at most N albums (for testing on a large library)
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Override concurrency.max_workers from the config
    #[arg(long)]
    concurrency: Option<usize>,

    /// Ignore both cache layers and reclassify every album
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{e:#}"), "run failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.cmd {
        Command::Scan(args) => cmd_scan(args, &config),
        Command::Plan(args) => cmd_plan(args, &config).await,
        Command::Sweep => cmd_sweep(&config),
    }
}

fn cmd_scan(args: ScanArgs, config: &Config) -> anyhow::Result<()> {
    let albums = scan::scan_albums(&args.root, &config.library)
        .with_context(|| format!("scanning {}", args.root.display()))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&albums)?);
    } else {
        for a in &albums {
            println!(
                "{:4} tracks  {:2} disc(s)  {}",
                a.track_count,
                a.disc_count,
                a.path.display()
            );
        }
        println!("{} album directories found", albums.len());
    }
    Ok(())
}

fn open_caches(config: &Config, refresh: bool) -> anyhow::Result<Arc<CacheCoordinator>> {
    let expiry = Duration::from_secs(u64::from(config.caching.expiry_days) * 24 * 3600);
    if refresh {
        // Throwaway stores: nothing is skipped, nothing stale is served.
        tracing::info!("refresh requested, ignoring persisted caches");
        return Ok(Arc::new(CacheCoordinator::new(
            ExecutionRecordStore::memory().context("opening in-memory record store")?,
            ResponseCache::in_memory(expiry),
        )));
    }
    let records = ExecutionRecordStore::open(&config.execution_cache_path())
        .context("opening execution record store")?;
    let responses = ResponseCache::open(config.response_cache_path(), expiry);
    Ok(Arc::new(CacheCoordinator::new(records, responses)))
}

async fn cmd_plan(args: PlanArgs, config: &Config) -> anyhow::Result<()> {
    let api_key = api_key_from_env()?;
    let mut albums = scan::scan_albums(&args.root, &config.library)
        .with_context(|| format!("scanning {}", args.root.display()))?;
    if albums.is_empty() {
        println!("no album directories under {}", args.root.display());
        return Ok(());
    }
    tracing::info!(albums = albums.len(), root = %args.root.display(), "scan complete");
    if let Some(limit) = args.limit {
        if limit < albums.len() {
            tracing::info!(limit, total = albums.len(), "limiting this run");
            albums.truncate(limit);
        }
    }

    let caches = open_caches(config, args.refresh)?;
    let service = Arc::new(OpenAiClient::new(api_key));
    let client = Arc::new(StructuredCallClient::new(
        service,
        caches.clone(),
        ClientOptions::from_api_config(&config.api),
    ));
    let validator = SchemaValidator::new(
        classify::SCHEMA_NAME,
        classify::album_schema(&config.categories),
    )?;
    let classifier = Arc::new(classify::AlbumClassifier::new(
        client.clone(),
        validator,
        config.api.model.clone(),
        CallParams {
            temperature: config.api.temperature,
            max_tokens: config.api.max_tokens,
        },
        config.categories.clone(),
    ));

    let orchestrator = BatchOrchestrator::new(caches.clone());
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight albums");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    let workers = args.concurrency.unwrap_or(config.concurrency.max_workers);
    let mut results = orchestrator
        .run_batch(scan::to_work_items(albums), classifier, workers)
        .await;

    cratedig_core::sort_by_identity(&mut results);
    let results = cratedig_core::dedup_by_key(results, classify::canonical_key);

    caches.flush();

    let run_report = report::RunReport::new(&results, client.statistics(), caches.statistics());
    if let Some(path) = &args.json {
        run_report.write_json(path)?;
    }
    if let Some(path) = &args.csv {
        report::write_csv_plan(&results, path)?;
    }
    if args.tree {
        print!("{}", report::render_tree(&results));
    }
    println!("{}", report::render_summary(&run_report));

    for r in results.iter().filter(|r| !r.success) {
        tracing::warn!(
            path = %r.path.display(),
            error = r.error.as_deref().unwrap_or("unknown"),
            "album not classified"
        );
    }
    Ok(())
}

fn cmd_sweep(config: &Config) -> anyhow::Result<()> {
    let caches = open_caches(config, false)?;
    let (records, responses) = caches.sweep(config.caching.retention_days);
    caches.flush();
    println!("removed {records} execution records and {responses} cached responses");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn plan_accepts_limit_concurrency_and_refresh() {
        let cli = Cli::try_parse_from([
            "cratedig",
            "plan",
            "/music",
            "--limit",
            "100",
            "--concurrency",
            "8",
            "--refresh",
        ])
        .unwrap();
        match cli.cmd {
            Command::Plan(args) => {
                assert_eq!(args.root, PathBuf::from("/music"));
                assert_eq!(args.limit, Some(100));
                assert_eq!(args.concurrency, Some(8));
                assert!(args.refresh);
            }
            _ => panic!("expected plan subcommand"),
        }
    }

    #[test]
    fn plan_flags_default_off() {
        let cli = Cli::try_parse_from(["cratedig", "plan", "/music"]).unwrap();
        match cli.cmd {
            Command::Plan(args) => {
                assert_eq!(args.limit, None);
                assert_eq!(args.concurrency, None);
                assert!(!args.refresh);
            }
            _ => panic!("expected plan subcommand"),
        }
    }

    #[test]
    fn refresh_run_uses_throwaway_caches() {
        let config = Config::default();
        let caches = open_caches(&config, true).unwrap();
        // a fresh in-memory coordinator has no records and serves no hits
        assert!(!caches.is_completed(
            std::path::Path::new("/music/album"),
            &cratedig_core::Fingerprint {
                size: 1,
                mtime_secs: 1.0,
            },
        ));
        let stats = caches.statistics();
        assert_eq!(stats.l1_hits, 0);
    }
}
