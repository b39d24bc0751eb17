// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reelscope: vision-model tagging for downloaded short videos and image sets

use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info, warn};

use reelscope::activity::ActivityLog;
use reelscope::config::{AnalysisSettings, AppConfig, Provider};
use reelscope::db::{Database, ResultFilter, VideoAnalysis};
use reelscope::engine::AnalysisEngine;
use reelscope::media::{
    author_folders, binary_runs, find_cover, scan, FfmpegFrameExtractor, ScanMode, WorkItem,
};
use reelscope::scheduler::Scheduler;
use reelscope::vision::VisionClient;
use reelscope::{ReelscopeError, Result};

/// Reelscope CLI - vision-model tagging for downloaded media
#[derive(Parser, Debug)]
#[command(name = "reelscope")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Tag downloaded videos and image sets with a vision model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for listings
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List videos and image sets waiting for analysis
    Scan {
        /// Folder to scan (default: media_root)
        dir: Option<PathBuf>,

        /// Include items that already have a successful result
        #[arg(long)]
        all: bool,

        /// Use the wider gallery set of video containers
        #[arg(long)]
        gallery: bool,
    },

    /// Analyze a folder with the configured vision backend
    Analyze {
        /// Folder to analyze (default: media_root)
        dir: Option<PathBuf>,

        /// Vision backend (gemini or grok)
        #[arg(long)]
        provider: Option<Provider>,

        /// Model name override
        #[arg(long)]
        model: Option<String>,

        /// Endpoint base URL override
        #[arg(long)]
        endpoint: Option<String>,

        /// Frames sampled per video
        #[arg(long)]
        frames: Option<u32>,

        /// Analyses in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Seconds between requests
        #[arg(long)]
        delay: Option<f64>,

        /// Requests per minute (overrides --delay)
        #[arg(long)]
        rpm: Option<u32>,

        /// Re-analyze items that already have a successful result
        #[arg(long)]
        all: bool,
    },

    /// List author folders of a platform/mode/author library
    Library {
        /// Library root (default: media_root)
        root: Option<PathBuf>,
    },

    /// Stored analysis results
    Results {
        #[command(subcommand)]
        action: ResultsCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show backend, tool and database status
    Status,
}

#[derive(Subcommand, Debug)]
enum ResultsCommands {
    /// List successful results, newest first
    List {
        /// Only results carrying this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Only results in this category
        #[arg(short, long)]
        category: Option<String>,

        /// Minimum level (0-10)
        #[arg(long)]
        min_level: Option<i64>,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show one result, including failed attempts
    Show {
        /// Item id (video stem or image-set prefix)
        id: String,
    },

    /// List all tags and categories
    Facets,

    /// Export successful results to JSON
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Show result counts
    Stats,

    /// Forget a result so the item is analyzed again
    Delete {
        /// Item id
        id: String,
    },

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

/// Per-run overrides from `reelscope analyze`
#[derive(Debug, Default)]
struct AnalyzeOverrides {
    provider: Option<Provider>,
    model: Option<String>,
    endpoint: Option<String>,
    frames: Option<u32>,
    concurrency: Option<usize>,
    delay: Option<f64>,
    rpm: Option<u32>,
}

impl AnalyzeOverrides {
    fn apply(self, settings: &mut AnalysisSettings) {
        if let Some(provider) = self.provider {
            if provider != settings.provider {
                // configured model and endpoint belong to the other backend
                settings.model.clear();
                settings.endpoint.clear();
                settings.api_key.clear();
            }
            settings.provider = provider;
        }
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(endpoint) = self.endpoint {
            settings.endpoint = endpoint;
        }
        if let Some(frames) = self.frames {
            settings.frame_count = frames;
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(delay) = self.delay {
            settings.request_delay_secs = delay;
        }
        if let Some(rpm) = self.rpm {
            settings.rpm = rpm;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json_output = cli.format == "json";

    match cli.command {
        Commands::Scan { dir, all, gallery } => run_scan(config, dir, all, gallery, json_output),
        Commands::Analyze {
            dir,
            provider,
            model,
            endpoint,
            frames,
            concurrency,
            delay,
            rpm,
            all,
        } => {
            let overrides = AnalyzeOverrides {
                provider,
                model,
                endpoint,
                frames,
                concurrency,
                delay,
                rpm,
            };
            run_analyze(config, dir, overrides, all).await
        }
        Commands::Library { root } => run_library(config, root, json_output),
        Commands::Results { action } => run_results_command(config, action, json_output),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Status => run_status(config).await,
    }
}

fn media_root(config: &AppConfig, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| PathBuf::from(&config.media_root))
}

/// Ids to leave out of a scan; empty when skipping is off
fn analyzed_ids(config: &AppConfig, include_analyzed: bool) -> Result<HashSet<String>> {
    if include_analyzed || !config.analysis.skip_analyzed {
        return Ok(HashSet::new());
    }
    let db = Database::open(&config.database.path)?;
    db.get_analyzed_ids()
}

fn describe_item(item: &WorkItem) -> serde_json::Value {
    let (kind, cover) = match item {
        WorkItem::Video { path } => ("video", find_cover(path)),
        WorkItem::ImageSet { prefix, paths } => {
            let cover = paths
                .first()
                .and_then(|p| p.parent())
                .and_then(|folder| find_cover(&folder.join(prefix)));
            ("image_set", cover)
        }
    };
    json!({
        "id": item.id(),
        "kind": kind,
        "name": item.display_name(),
        "path": item.primary_path(),
        "images": item.image_count(),
        "cover": cover,
    })
}

fn run_scan(config: AppConfig, dir: Option<PathBuf>, all: bool, gallery: bool, json_output: bool) -> Result<()> {
    let root = media_root(&config, dir);
    let skip = analyzed_ids(&config, all)?;
    let mode = if gallery { ScanMode::Gallery } else { ScanMode::Analysis };

    let items = scan(&root, mode, Some(&skip));
    if json_output {
        let listing: Vec<_> = items.iter().map(describe_item).collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let sets = items.iter().filter(|i| i.is_image_set()).count();
    println!(
        "{} items in {:?} ({} videos, {} image sets)",
        items.len(),
        root,
        items.len() - sets,
        sets
    );
    for item in &items {
        let kind = if item.is_image_set() { "set  " } else { "video" };
        println!("  {} {}", kind, item.display_name());
    }

    Ok(())
}

async fn run_analyze(config: AppConfig, dir: Option<PathBuf>, overrides: AnalyzeOverrides, all: bool) -> Result<()> {
    let mut settings = config.analysis.clone();
    overrides.apply(&mut settings);

    let mut analysis = settings.to_analysis_config();
    if all {
        analysis.skip_analyzed = false;
    }
    if analysis.api_key.is_empty() {
        return Err(ReelscopeError::Config(format!(
            "No API key for {}: set analysis.api_key or {}",
            analysis.provider.display_name(),
            analysis.provider.env_key()
        )));
    }

    let db = Arc::new(Database::open(&config.database.path)?);
    let skip = if analysis.skip_analyzed {
        db.get_analyzed_ids()?
    } else {
        HashSet::new()
    };

    let root = media_root(&config, dir);
    let items = scan(&root, ScanMode::Analysis, Some(&skip));
    if items.is_empty() {
        println!("Nothing to analyze in {:?}", root);
        return Ok(());
    }

    let frames = Arc::new(FfmpegFrameExtractor::new(&settings.ffmpeg_path, &settings.ffprobe_path));
    if !frames.available().await && items.iter().any(|i| !i.is_image_set()) {
        warn!("ffmpeg/ffprobe not runnable; video items will fail");
    }
    let vision = Arc::new(VisionClient::new(&settings.curl_path)?);
    let engine = Arc::new(AnalysisEngine::new(frames, vision, ActivityLog::new()));
    let scheduler = Scheduler::new(engine, db);

    info!(
        "Analyzing {} items with {} ({})",
        items.len(),
        analysis.provider.display_name(),
        analysis.resolved_model()
    );

    let mut handle = scheduler.run(
        items,
        analysis,
        |p| debug!("Progress {}/{}: {}", p.completed, p.total, p.current),
        |_, _| {},
    )?;

    let summary = tokio::select! {
        joined = &mut handle => joined?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, waiting for in-flight analyses to finish...");
            scheduler.stop();
            handle.await?
        }
    };

    println!(
        "Analysis {}: {} succeeded, {} failed{}",
        summary.run_id,
        summary.success,
        summary.failed,
        if summary.cancelled { " (stopped early)" } else { "" }
    );

    Ok(())
}

fn run_library(config: AppConfig, root: Option<PathBuf>, json_output: bool) -> Result<()> {
    let root = media_root(&config, root);
    let skip = analyzed_ids(&config, false)?;

    let mut rows = Vec::new();
    for folder in author_folders(&root) {
        let pending = scan(&folder.path, ScanMode::Analysis, Some(&skip)).len();
        rows.push((folder, pending));
    }

    if json_output {
        let listing: Vec<_> = rows
            .iter()
            .map(|(f, pending)| {
                json!({
                    "platform": f.platform,
                    "mode": f.mode,
                    "author": f.author,
                    "path": f.path,
                    "pending": pending,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Library {:?}: {} authors", root, rows.len());
    for (f, pending) in &rows {
        println!("  {}/{}/{} - {} pending", f.platform, f.mode, f.author, pending);
    }

    Ok(())
}

fn print_result(record: &VideoAnalysis) {
    match &record.error {
        Some(error) => println!("  {}  failed: {}", record.aweme_id, error),
        None => println!(
            "  {}  [{}] level {} ({})  {}",
            record.aweme_id,
            record.category,
            record.sexy_level,
            record.level_label(),
            record.tags.join(", ")
        ),
    }
}

fn run_results_command(config: AppConfig, action: ResultsCommands, json_output: bool) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        ResultsCommands::List { tag, category, min_level, limit } => {
            let filter = ResultFilter {
                tag,
                category,
                min_level,
                limit: Some(limit),
            };
            let records = db.query(&filter)?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{} results:", records.len());
                for record in &records {
                    print_result(record);
                }
            }
        }
        ResultsCommands::Show { id } => match db.get_analysis(&id)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("No result for '{}'", id),
        },
        ResultsCommands::Facets => {
            let facets = db.facets()?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&facets)?);
            } else {
                println!("Categories: {}", facets.categories.join(", "));
                println!("Tags ({}):", facets.tags.len());
                for tag in &facets.tags {
                    println!("  {}", tag);
                }
            }
        }
        ResultsCommands::Export { output } => {
            let records = db.get_all_analysis()?;
            let json = serde_json::to_string_pretty(&records)?;
            std::fs::write(&output, json)?;
            println!("Exported {} results to {:?}", records.len(), output);
        }
        ResultsCommands::Stats => {
            let stats = db.get_stats()?;
            println!("Database Statistics:");
            println!("  Total: {}", stats.total);
            println!("  Succeeded: {}", stats.succeeded);
            println!("  Failed: {}", stats.failed);
        }
        ResultsCommands::Delete { id } => {
            if db.delete_analysis(&id)? {
                println!("Deleted '{}'; it will be analyzed on the next run", id);
            } else {
                println!("No result for '{}'", id);
            }
        }
        ResultsCommands::Vacuum => {
            db.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Media root: {}", config.media_root);
            println!("  Provider: {}", config.analysis.provider);
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "missing"
    }
}

async fn run_status(config: AppConfig) -> Result<()> {
    let analysis = config.analysis.to_analysis_config();
    let settings = &config.analysis;

    println!("Reelscope v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    println!("\nBackend:");
    println!("  Provider: {}", analysis.provider.display_name());
    println!("  Endpoint: {}", analysis.resolved_endpoint());
    println!("  Model: {}", analysis.resolved_model());
    println!(
        "  API key: {}",
        if analysis.api_key.is_empty() {
            format!("missing (set analysis.api_key or {})", analysis.provider.env_key())
        } else {
            "present".to_string()
        }
    );
    println!(
        "  Pacing: concurrency {}, {:.1}s between requests",
        analysis.concurrency,
        analysis.effective_delay().as_secs_f64()
    );

    println!("\nTools:");
    println!("  ffmpeg: {}", mark(binary_runs(&settings.ffmpeg_path, "-version").await));
    println!("  ffprobe: {}", mark(binary_runs(&settings.ffprobe_path, "-version").await));
    println!("  curl: {}", mark(binary_runs(&settings.curl_path, "--version").await));

    match Database::open(&config.database.path) {
        Ok(db) => {
            let stats = db.get_stats()?;
            println!("\nDatabase ({}):", config.database.path);
            println!("  Results: {} ({} failed)", stats.total, stats.failed);
        }
        Err(e) => println!("\nDatabase: Error - {}", e),
    }

    Ok(())
}
