use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod config;
mod discover;
mod download;
mod error;
mod models;
mod pageurl;
mod pipeline;
mod session;
mod storage;
mod utils;

use config::Config;
use models::{ChapterTarget, DownloadStatus, PageRange};
use pipeline::{DirectFetch, ScrapePipeline};

#[derive(Parser)]
#[command(name = "mangarip")]
#[command(about = "Download one chapter of a web comic through a real browser session")]
#[command(version)]
struct Cli {
    /// Series slug (e.g., i-can-copy-talents)
    #[arg(long, env = "SLUG")]
    slug: Option<String>,

    /// Chapter id (e.g., chapter-1)
    #[arg(long, env = "CHAPTER")]
    chapter: Option<String>,

    /// Base site URL for chapter pages
    #[arg(long, env = "SITE_URL", default_value = "https://manhuaus.com/manga")]
    site: String,

    /// Output directory root
    #[arg(long, env = "OUT_DIR", default_value = "images")]
    out: String,

    /// Optional start page to filter images
    #[arg(long, env = "START_PAGE")]
    start: Option<u32>,

    /// Optional end page to filter images
    #[arg(long, env = "END_PAGE")]
    end: Option<u32>,

    /// Optional extension filter (jpg/png/webp)
    #[arg(long)]
    ext: Option<String>,

    /// Image host base: construct page URLs directly instead of discovering
    /// them (requires --start and --end)
    #[arg(long, env = "BASE_HOST")]
    image_base: Option<String>,

    /// Zero-pad width for directly constructed filenames
    #[arg(long, default_value_t = 3)]
    pad: usize,

    /// Print the chapter result as JSON after the run
    #[arg(long)]
    json: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Usage faults exit before any network activity.
    let (slug, chapter) = match (cli.slug.as_deref(), cli.chapter.as_deref()) {
        (Some(slug), Some(chapter)) => (slug.to_string(), chapter.to_string()),
        _ => {
            eprintln!("Error: --slug and --chapter are required (or SLUG/CHAPTER env vars)");
            eprintln!("Example: mangarip --slug i-can-copy-talents --chapter chapter-1");
            std::process::exit(2);
        }
    };

    let page_range = match (cli.start, cli.end) {
        (None, None) => None,
        (start, end) => Some(PageRange {
            start: start.unwrap_or(1),
            end: end.unwrap_or(u32::MAX),
        }),
    };

    let direct = match &cli.image_base {
        Some(base) => {
            if cli.start.is_none() || cli.end.is_none() {
                eprintln!("Error: --image-base requires explicit --start and --end");
                std::process::exit(2);
            }
            Some(DirectFetch {
                image_base: base.clone(),
                pad: cli.pad,
                ext: cli.ext.clone().unwrap_or_else(|| "jpg".to_string()),
            })
        }
        None => None,
    };

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.storage.output_root = cli.out.clone();

    let target = ChapterTarget::new(cli.site.clone(), slug, chapter)
        .with_page_range(page_range)
        .with_extension_filter(cli.ext.clone());
    if let Err(e) = target.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    info!("Target: {}", target.chapter_page_url());
    if let Some(range) = &target.page_range {
        info!("Page range: {} - {}", range.start, range.end);
    }

    let pipeline = ScrapePipeline::new(config).with_direct(direct);
    let result = pipeline.scrape_chapter(&target).await?;

    println!("{}", "-".repeat(50));
    for outcome in &result.outcomes {
        if let DownloadStatus::Failed(reason) = &outcome.status {
            println!("❌ page {}: {} ({})", outcome.page_number, reason, outcome.source_url);
        }
    }
    println!(
        "Done: {}/{} images downloaded",
        result.succeeded, result.total
    );
    println!("Saved to: {:?}", result.output_dir);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if result.succeeded == 0 {
        error!("No images were downloaded");
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("mangarip={}", level))
        .with_target(false)
        .init();
}
