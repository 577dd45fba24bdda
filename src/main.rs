use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, warn};

use manga_harvest::console::Console;
use manga_harvest::enricher::{AniListEnricher, MetadataEnricher, NoopEnricher};
use manga_harvest::error::{DownloadError, ResolveError};
use manga_harvest::extractor::{ExtractorRegistry, GenericExtractor};
use manga_harvest::history::JsonHistoryStore;
use manga_harvest::mirror::{HttpMirrorHunter, MirrorHunter};
use manga_harvest::models::{OutputFormat, RunConfiguration, SourceType};
use manga_harvest::orchestrator::{DownloadOrchestrator, RunSummary};
use manga_harvest::resolver::SiteResolver;
use manga_harvest::sites::{DEFAULT_SITES_URL, SiteTable};

const HISTORY_FILE: &str = "history.json";
const LISTING_LIMIT: usize = 20;
/// How long shutdown waits for stdin reads and packaging jobs still running after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Download manga chapters from any site in the site database, or from a direct link
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a series by URL, site key or approximate name
    Download(DownloadArgs),
    /// List or search the known sites
    Available(AvailableArgs),
}

#[derive(Debug, Args)]
struct SiteDbArgs {
    /// Remote site database (JSON) tried before anything else
    #[arg(long, default_value = DEFAULT_SITES_URL)]
    sites_url: String,

    /// Skip the remote site database
    #[arg(long)]
    offline: bool,

    /// Local site database used when the remote one is unavailable
    #[arg(long)]
    sites_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// URL, site key or name of the series
    #[arg(short = 'u', long = "url")]
    target: String,

    /// The output directory
    #[arg(short, long, default_value = "downloads")]
    output: PathBuf,

    /// Maximum number of concurrent page downloads
    #[arg(short, long, default_value_t = 8)]
    workers: usize,

    /// Output format for each chapter
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Folder)]
    format: OutputFormat,

    /// Chapter range to download, e.g. "10-20" or "5"
    #[arg(short, long)]
    range: Option<String>,

    /// Proxy for every outgoing request, e.g. http://127.0.0.1:8080
    #[arg(short, long)]
    proxy: Option<String>,

    /// Skip the metadata lookup
    #[arg(long)]
    no_metadata: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    sites: SiteDbArgs,
}

#[derive(Debug, Args)]
struct AvailableArgs {
    /// Only show sites matching this text
    #[arg(short, long)]
    search: Option<String>,

    /// Show every site instead of the first few
    #[arg(long)]
    all: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    sites: SiteDbArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let debug = match &cli.command {
        Command::Download(args) => args.debug,
        Command::Available(args) => args.debug,
    };
    init_logging(debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: could not start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        match cli.command {
            Command::Download(args) => download(args).await,
            Command::Available(args) => available(args).await,
        }
    });
    // An interrupted run may leave a prompt read or a packaging job behind; don't wait on them.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(DownloadError::Resolution(ResolveError::UserCancelled)) => {
            println!("Cancelled.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

async fn load_sites(args: &SiteDbArgs, proxy: Option<&str>) -> Result<SiteTable, DownloadError> {
    let remote = (!args.offline).then_some(args.sites_url.as_str());
    SiteTable::load(remote, args.sites_file.as_deref(), proxy).await
}

async fn download(args: DownloadArgs) -> Result<(), DownloadError> {
    let config = RunConfiguration {
        output_dir: args.output,
        worker_count: args.workers.max(1),
        output_format: args.format,
        chapter_range: args.range,
        proxy: args.proxy,
    };
    let proxy = config.proxy.as_deref();

    if config.output_format == OutputFormat::Pdf && !manga_harvest::pdf::font_available() {
        warn!(
            "No TrueType font found for PDF output; set {} to a .ttf file",
            manga_harvest::pdf::FONT_ENV_VAR
        );
    }

    let sites = Arc::new(load_sites(&args.sites, proxy).await?);
    debug!("{} sites available", sites.len());

    let hunter: Arc<dyn MirrorHunter> = Arc::new(HttpMirrorHunter::new(proxy)?);
    let resolver = SiteResolver::new(sites, Some(hunter));
    let extractors = ExtractorRegistry::new(Arc::new(GenericExtractor::new(proxy)?));
    let enricher: Arc<dyn MetadataEnricher> = if args.no_metadata {
        Arc::new(NoopEnricher)
    } else {
        Arc::new(AniListEnricher::new(proxy)?)
    };
    let history = JsonHistoryStore::open(config.output_dir.join(HISTORY_FILE))?;

    let console = Console::new();
    let started = Instant::now();
    let format = config.output_format;
    let mut orchestrator = DownloadOrchestrator::new(config, resolver, extractors, enricher, Box::new(history));

    let outcome = tokio::select! {
        result = orchestrator.run(&args.target, &console, &console) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let closed = orchestrator.close();
    let summary = match outcome {
        Some(result) => result?,
        None => {
            console.println("Interrupted, stopping.");
            return closed;
        }
    };
    closed?;

    print_summary(&summary, format, started);
    Ok(())
}

fn print_summary(summary: &RunSummary, format: OutputFormat, started: Instant) {
    println!();
    println!("{}", "=".repeat(50));
    println!("Series:      {}", summary.series);
    println!("Duration:    {:.1}s", started.elapsed().as_secs_f64());
    println!("Format:      {}", format);
    println!("Destination: {}", summary.series_dir.display());
    println!(
        "Chapters:    {} completed, {} skipped, {} failed",
        summary.completed, summary.skipped, summary.failed
    );
    for title in &summary.failed_titles {
        println!("  failed: {}", title);
    }
    println!("{}", "=".repeat(50));
}

async fn available(args: AvailableArgs) -> Result<(), DownloadError> {
    let sites = load_sites(&args.sites, None).await?;

    let matches: Vec<_> = match args.search.as_deref() {
        Some(query) => sites.search(query),
        None => sites.iter().collect(),
    };

    if matches.is_empty() {
        println!("No sites found.");
        return Ok(());
    }

    println!("{:<24} {:<32} {:<8} {}", "KEY", "NAME", "TYPE", "DOMAIN");
    let shown = if args.all { matches.len() } else { matches.len().min(LISTING_LIMIT) };
    for source in &matches[..shown] {
        let kind = match source.source_type {
            SourceType::Static => "static",
            SourceType::Dynamic => "dynamic",
        };
        println!("{:<24} {:<32} {:<8} {}", source.key, source.display_name, kind, source.base_domain);
    }

    if shown < matches.len() {
        println!("... and {} more (use --all to list everything)", matches.len() - shown);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_site_database_is_on_by_default() {
        let cli = Cli::try_parse_from(["manga-harvest", "available"]).unwrap();
        let Command::Available(args) = cli.command else { panic!("expected the available command") };
        assert_eq!(args.sites.sites_url, DEFAULT_SITES_URL);
        assert!(!args.sites.offline);

        let cli = Cli::try_parse_from(["manga-harvest", "download", "-u", "berserk", "--offline", "-f", "pdf"]).unwrap();
        let Command::Download(args) = cli.command else { panic!("expected the download command") };
        assert!(args.sites.offline);
        assert_eq!(args.format, OutputFormat::Pdf);
        assert_eq!(args.workers, 8);
    }
}
