// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use url::Url;

use podcore::catalog::Catalog;
use podcore::logging::init_logging;
use podcore::playback::format_clock;
use podcore::{
    CheckpointStore, Config, DownloadError, DownloadManager, DownloadStatus, Episode, Feed, ItunesCatalog,
    JsonCheckpointStore, JsonDownloadRegistry, JsonLibraryStore, LibraryStore,
    LibrarySyncCoordinator, NoopReporter, PlaybackSettings, ProgressEvent, ProgressReporter, ReqwestClient,
    SharedProgressReporter, SyncOptions, fetch_feed, is_url, parse_feed_file,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

const DEFAULT_CONFIG: &str = "podcore.json";

/// Podcast library, download and playback-state tool
#[derive(Parser, Debug)]
#[command(name = "podcore")]
#[command(about = "Manage a podcast library: follow shows, download episodes, sync metadata")]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Override the data directory from the configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a show to the library from its RSS feed URL or a local RSS file
    Follow { feed: String },

    /// Fill in missing show metadata from the catalog
    Sync {
        /// Look up every show at once instead of in throttled chunks
        #[arg(long)]
        unbounded: bool,
    },

    /// Download episodes of a feed
    Download {
        /// RSS feed URL or path to local RSS file
        feed: String,

        /// Maximum number of concurrent downloads
        #[arg(short = 'c', long, default_value = "3")]
        concurrent: usize,

        /// Maximum number of episodes to download, newest first
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Reconcile downloads with the disk and show the resume point
    Status,

    /// Search the catalog for shows
    Search {
        term: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List the episodes of a feed
    Episodes {
        /// RSS feed URL or path to local RSS file
        feed: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let cut: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

/// Sync-pass reporter using indicatif for terminal output
struct IndicatifSyncReporter {
    bar: ProgressBar,
}

impl IndicatifSyncReporter {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(style("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}"));
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressReporter for IndicatifSyncReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::SyncStarted {
                total_shows,
                targets,
            } => {
                self.bar.set_length(targets as u64);
                self.bar.set_message(format!(
                    "{SEARCH}{} of {} shows need metadata",
                    targets.to_string().yellow(),
                    total_shows.to_string().cyan()
                ));
            }
            ProgressEvent::ChunkStarted {
                index,
                total_chunks,
                ..
            } => {
                self.bar.set_message(format!(
                    "{SEARCH}Looking up batch {}/{}",
                    (index + 1).to_string().cyan(),
                    total_chunks.to_string().cyan()
                ));
            }
            ProgressEvent::Throttling { delay } => {
                self.bar
                    .set_message(format!("Waiting {}ms for the catalog", delay.as_millis()));
            }
            ProgressEvent::LookupFinished {
                title, resolved, ..
            } => {
                self.bar.inc(1);
                if !resolved {
                    self.bar.println(format!(
                        "  {CROSS}{}",
                        truncate_title(&title, 60).yellow()
                    ));
                }
            }
            ProgressEvent::LibraryUpdated { updated } => {
                self.bar
                    .set_message(format!("Saving {} enriched shows", updated.to_string().green()));
            }
            ProgressEvent::SyncCompleted {
                updated,
                unresolved,
            } => {
                self.bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} updated, {} unresolved",
                    "Sync complete:".bold().green(),
                    updated.to_string().green().bold(),
                    if unresolved > 0 {
                        unresolved.to_string().yellow()
                    } else {
                        unresolved.to_string().green()
                    }
                );
            }
        }
    }
}

/// One progress bar per running download
struct DownloadBars {
    multi: Option<MultiProgress>,
    bars: Mutex<HashMap<Url, ProgressBar>>,
}

impl DownloadBars {
    fn new(quiet: bool) -> Self {
        Self {
            multi: (!quiet).then(MultiProgress::new),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn start(&self, source: &Url, index: usize, total: usize, title: &str) {
        let Some(multi) = &self.multi else {
            return;
        };
        let bar = multi.add(ProgressBar::new(1000));
        bar.set_style(
            style(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{percent:>3}}% {{wide_msg}}"
            ))
            .progress_chars("█▓░"),
        );
        bar.set_message(format!(
            "[{}/{}] {}",
            (index + 1).to_string().cyan(),
            total.to_string().cyan(),
            truncate_title(title, 40)
        ));
        self.lock().insert(source.clone(), bar);
    }

    fn progress(&self, source: &Url, fraction: f64) {
        if let Some(bar) = self.lock().get(source) {
            bar.set_position((fraction * 1000.0) as u64);
        }
    }

    fn succeed(&self, source: &Url, title: &str) {
        if let Some(bar) = self.lock().remove(source) {
            bar.set_position(1000);
            bar.finish_with_message(format!("{SUCCESS}{}", truncate_title(title, 40).green()));
        }
    }

    fn fail(&self, source: &Url, title: &str, error: &str) {
        if let Some(bar) = self.lock().remove(source) {
            bar.abandon_with_message(format!(
                "{FAILURE}{} - {}",
                truncate_title(title, 30).red(),
                error.red()
            ));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Url, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct DownloadSummary {
    downloaded: usize,
    existing: usize,
    failed: Vec<(String, String)>,
}

struct Running {
    title: String,
}

/// Outcome of one running download, if the status is terminal
enum Settled {
    Downloaded,
    Failed(String),
    Cancelled,
}

fn settled(status: &DownloadStatus) -> Option<Settled> {
    match status {
        DownloadStatus::Downloading(_) => None,
        DownloadStatus::Downloaded(_) => Some(Settled::Downloaded),
        DownloadStatus::Failed(e) => Some(Settled::Failed(e.to_string())),
        DownloadStatus::NotDownloaded => Some(Settled::Cancelled),
    }
}

fn finish(
    running: &mut HashMap<Url, Running>,
    summary: &mut DownloadSummary,
    bars: &DownloadBars,
    source: &Url,
    outcome: Settled,
) {
    let Some(Running { title }) = running.remove(source) else {
        return;
    };
    match outcome {
        Settled::Downloaded => {
            summary.downloaded += 1;
            bars.succeed(source, &title);
        }
        Settled::Failed(error) => {
            bars.fail(source, &title, &error);
            summary.failed.push((title, error));
        }
        Settled::Cancelled => bars.fail(source, &title, "cancelled"),
    }
}

async fn download_episodes(
    manager: &DownloadManager,
    episodes: Vec<Episode>,
    concurrent: usize,
    bars: &DownloadBars,
) -> DownloadSummary {
    let mut events = manager.subscribe();
    let total = episodes.len();
    let mut queue: VecDeque<(usize, Episode)> = episodes.into_iter().enumerate().collect();
    let mut running: HashMap<Url, Running> = HashMap::new();
    let mut summary = DownloadSummary::default();

    loop {
        while running.len() < concurrent.max(1) {
            let Some((index, episode)) = queue.pop_front() else {
                break;
            };
            let Some(source) = episode.source_url() else {
                let error = DownloadError::NoSource {
                    title: episode.title.clone(),
                };
                summary.failed.push((episode.title.clone(), error.to_string()));
                continue;
            };
            if running.contains_key(&source) {
                continue;
            }
            if manager.has_local_file(&episode).await.is_some() {
                summary.existing += 1;
                continue;
            }

            bars.start(&source, index, total, &episode.title);
            running.insert(
                source,
                Running {
                    title: episode.title.clone(),
                },
            );
            manager.start_download(&episode).await;
        }

        if running.is_empty() {
            break;
        }

        match events.recv().await {
            Ok(event) => {
                if !running.contains_key(&event.source) {
                    continue;
                }
                match settled(&event.status) {
                    Some(outcome) => {
                        finish(&mut running, &mut summary, bars, &event.source, outcome)
                    }
                    None => {
                        if let DownloadStatus::Downloading(fraction) = event.status {
                            bars.progress(&event.source, fraction);
                        }
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "download events lagged, reading snapshot");
                let sources: Vec<Url> = running.keys().cloned().collect();
                for source in sources {
                    if manager.is_in_flight(&source) {
                        continue;
                    }
                    if let Some(outcome) = settled(&manager.status(&source)) {
                        finish(&mut running, &mut summary, bars, &source, outcome);
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    summary
}

async fn load_feed(client: &ReqwestClient, source: &str) -> Result<Feed> {
    if is_url(source) {
        fetch_feed(client, source)
            .await
            .with_context(|| format!("Failed to fetch feed {source}"))
    } else {
        parse_feed_file(std::path::Path::new(source))
            .await
            .with_context(|| format!("Failed to read feed file {source}"))
    }
}

fn newest_first(mut episodes: Vec<Episode>, limit: Option<usize>) -> Vec<Episode> {
    episodes.sort_by(|a, b| b.release_date.cmp(&a.release_date));
    if let Some(limit) = limit {
        episodes.truncate(limit);
    }
    episodes
}

fn banner(quiet: bool) {
    if !quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podcore".bold().magenta(),
            "- Podcast Library".dimmed()
        );
    }
}

async fn follow(config: &Config, feed_source: &str, quiet: bool) -> Result<()> {
    let client = ReqwestClient::with_timeout(config.catalog.request_timeout());
    let feed = load_feed(&client, feed_source).await?;
    let library = JsonLibraryStore::new(config.library_path());

    let mut shows = library
        .load_shows()
        .await
        .context("Failed to read library")?;

    if shows
        .iter()
        .any(|s| s.id == feed.show.id || s.feed_url == feed.show.feed_url)
    {
        if !quiet {
            println!("{HEADPHONES}Already following {}", feed.show.title.bold());
        }
        return Ok(());
    }

    shows.push(feed.show.clone());
    library
        .replace_all(&shows)
        .await
        .context("Failed to write library")?;

    if !quiet {
        println!(
            "{SUCCESS}Following {} ({} episodes)",
            feed.show.title.bold().green(),
            feed.episodes.len().to_string().cyan()
        );
    }
    Ok(())
}

async fn sync(config: &Config, unbounded: bool, quiet: bool) -> Result<()> {
    let client = ReqwestClient::with_timeout(config.catalog.request_timeout());
    let catalog = ItunesCatalog::new(
        client,
        &config.catalog.base_url,
        config.catalog.request_timeout(),
    )
    .context("Invalid catalog configuration")?;

    let mut options = SyncOptions::from(&config.sync);
    if unbounded {
        options.concurrency = podcore::LookupConcurrency::Unbounded;
    }

    let reporter: SharedProgressReporter = if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifSyncReporter::new())
    };

    let coordinator = LibrarySyncCoordinator::new(
        Arc::new(catalog),
        Arc::new(JsonLibraryStore::new(config.library_path())),
        options,
        reporter,
    );

    coordinator
        .sync_missing_metadata()
        .await
        .context("Failed to sync library")?;
    Ok(())
}

async fn download(
    config: &Config,
    feed_source: &str,
    concurrent: usize,
    limit: Option<usize>,
    quiet: bool,
) -> Result<()> {
    let client = ReqwestClient::new();
    let feed = load_feed(&client, feed_source).await?;

    if !quiet {
        println!(
            "{HEADPHONES}{} • {} episodes",
            feed.show.title.bold().green(),
            feed.episodes.len().to_string().cyan()
        );
    }

    let manager = DownloadManager::new(
        Arc::new(client),
        config.downloads_dir(),
        Arc::new(JsonDownloadRegistry::new(config.registry_path())),
    );
    manager.reconcile().await;

    let episodes = newest_first(feed.episodes, limit);
    let bars = DownloadBars::new(quiet);
    let summary = download_episodes(&manager, episodes, concurrent, &bars).await;

    if !quiet {
        println!(
            "\n{PARTY}{} {} downloaded, {} already present, {} failed",
            "Download complete:".bold().green(),
            summary.downloaded.to_string().green().bold(),
            summary.existing.to_string().yellow(),
            if summary.failed.is_empty() {
                "0".green()
            } else {
                summary.failed.len().to_string().red().bold()
            }
        );

        if !summary.failed.is_empty() {
            println!("\n{}", "Failed episodes:".red().bold());
            for (title, error) in &summary.failed {
                println!("  {}{} - {}", CROSS, title.yellow(), error.dimmed());
            }
        }

        println!(
            "\n{FOLDER}Output: {}\n",
            manager.downloads_dir().display().to_string().cyan()
        );
    }

    if !summary.failed.is_empty() && summary.downloaded == 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let manager = DownloadManager::new(
        Arc::new(ReqwestClient::new()),
        config.downloads_dir(),
        Arc::new(JsonDownloadRegistry::new(config.registry_path())),
    );
    let report = manager.reconcile().await;

    println!(
        "{DOWNLOAD}{} downloads on disk, {} stale entries dropped, {} partial files removed",
        report.restored.to_string().green().bold(),
        report.dropped.to_string().yellow(),
        report.partial_files_cleaned.to_string().yellow()
    );

    let mut downloaded: Vec<(Url, PathBuf)> = manager
        .statuses()
        .into_iter()
        .filter_map(|(source, status)| match status {
            DownloadStatus::Downloaded(path) => Some((source, path)),
            _ => None,
        })
        .collect();
    downloaded.sort();
    for (source, path) in &downloaded {
        println!("  {} {}", path.display().to_string().cyan(), source.as_str().dimmed());
    }

    let checkpoints = JsonCheckpointStore::new(config.checkpoint_path());
    match checkpoints
        .load()
        .await
        .context("Failed to read checkpoint")?
    {
        Some(checkpoint) => {
            let duration = checkpoint.episode.duration();
            let settings = PlaybackSettings::from(&config.playback);
            // Without a feed duration the near-end guard cannot be judged here
            let resumable = duration == 0.0
                || settings.should_checkpoint(checkpoint.position_secs, duration);
            let label = if resumable {
                "Resume"
            } else {
                "Last played"
            };
            println!(
                "\n{HEADPHONES}{label} {} - {} at {} / {}",
                checkpoint.show_title.bold(),
                checkpoint.episode.title.green(),
                format_clock(checkpoint.position_secs).cyan(),
                format_clock(duration).dimmed()
            );
        }
        None => println!("\n{HEADPHONES}{}", "Nothing to resume".dimmed()),
    }
    Ok(())
}

async fn search(config: &Config, term: &str, limit: usize) -> Result<()> {
    let catalog = ItunesCatalog::new(
        ReqwestClient::with_timeout(config.catalog.request_timeout()),
        &config.catalog.base_url,
        config.catalog.request_timeout(),
    )
    .context("Invalid catalog configuration")?;

    let shows = catalog
        .search_shows(term, limit)
        .await
        .with_context(|| format!("Search for '{term}' failed"))?;

    if shows.is_empty() {
        println!("{SEARCH}{}", "No shows found".dimmed());
    }
    for show in shows {
        println!(
            "{SEARCH}{} {}",
            show.title.bold(),
            show.artist.unwrap_or_default().dimmed()
        );
        if let Some(feed_url) = show.feed_url {
            println!("     {}", feed_url.cyan());
        }
    }
    Ok(())
}

async fn episodes(feed_source: &str, limit: Option<usize>) -> Result<()> {
    let client = ReqwestClient::new();
    let feed = load_feed(&client, feed_source).await?;

    println!("{HEADPHONES}{}", feed.show.title.bold().green());
    for episode in newest_first(feed.episodes, limit) {
        let date = episode
            .release_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!(
            "  {} {:>8} {}",
            date.dimmed(),
            format_clock(episode.duration()).cyan(),
            episode.title
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    match args.command {
        Command::Follow { feed } => {
            banner(args.quiet);
            follow(&config, &feed, args.quiet).await
        }
        Command::Sync { unbounded } => {
            banner(args.quiet);
            sync(&config, unbounded, args.quiet).await
        }
        Command::Download {
            feed,
            concurrent,
            limit,
        } => {
            banner(args.quiet);
            download(&config, &feed, concurrent, limit, args.quiet).await
        }
        Command::Status => status(&config).await,
        Command::Search { term, limit } => search(&config, &term, limit).await,
        Command::Episodes { feed, limit } => episodes(&feed, limit).await,
    }
}
