mod app_config;
mod collector;
mod db;
mod export;
mod fetch;
mod notify;
mod page;
mod parser;
mod record;
mod settings;
mod storage;
mod summary;

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use app_config::AppConfig;
use collector::CollectorHandle;
use fetch::{LoadedPage, PageLoader};
use notify::NotificationArea;
use page::{Appearance, PageController};
use parser::{CivitaiExtractor, ExtractError, Extractor, Page};
use record::ImageRecord;
use storage::LocalStorage;
use summary::{SummaryPanel, CLEAR_PROMPT};

#[derive(Parser)]
#[command(name = "civitai_collector", about = "Collect generation data from Civitai image pages")]
struct Cli {
    /// SQLite database path (overrides COLLECTOR_DB_PATH / collector.toml)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and store generation data from saved pages or URLs
    Collect {
        /// HTML files or http(s) URLs of image detail pages
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Page address to use for a single saved file
        #[arg(long)]
        url: Option<String>,
    },
    /// Show collected image count and collection state
    Status,
    /// Turn collection on
    Enable,
    /// Turn collection off
    Disable,
    /// Flip collection on/off
    Toggle,
    /// Write all records to a timestamped JSON file
    Export {
        /// Output directory (default: export_dir from config)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Remove all collected records
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Interactive session: a page with its collect button next to the summary panel
    Session,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let storage = LocalStorage::open(&config.db_path)
        .with_context(|| format!("Failed to open storage at {}", config.db_path.display()))?;

    match cli.command {
        Commands::Collect { inputs, url } => {
            if url.is_some() && inputs.len() > 1 {
                bail!("--url can only be used with a single input");
            }
            if !settings::is_enabled(&storage)? {
                println!("Collection is disabled. Run 'enable' first.");
                return Ok(());
            }
            let collector = collector::start(storage.clone())?;
            let loader = PageLoader::new(&config)?;
            collect_inputs(&collector, &loader, &inputs, url.as_deref()).await
        }
        Commands::Status => {
            let panel = SummaryPanel::new(storage.clone(), collector::start(storage)?);
            println!("Collected: {}", panel.count()?);
            println!(
                "Collection: {}",
                if panel.is_enabled()? { "Enabled" } else { "Disabled" }
            );
            Ok(())
        }
        Commands::Enable => {
            settings::set_enabled(&storage, true)?;
            println!("Collection enabled");
            Ok(())
        }
        Commands::Disable => {
            settings::set_enabled(&storage, false)?;
            println!("Collection disabled");
            Ok(())
        }
        Commands::Toggle => {
            let panel = SummaryPanel::new(storage.clone(), collector::start(storage)?);
            println!("{}", panel.toggle());
            Ok(())
        }
        Commands::Export { out } => {
            let panel = SummaryPanel::new(storage.clone(), collector::start(storage)?);
            let dir = out.unwrap_or(config.export_dir);
            let note = panel.export(&dir);
            if note.is_error() {
                bail!(note.message);
            }
            println!("{}", note);
            Ok(())
        }
        Commands::Clear { yes } => {
            let panel = SummaryPanel::new(storage.clone(), collector::start(storage)?);
            let confirmed = if yes || !panel.has_data()? {
                true
            } else {
                confirm_stdin(CLEAR_PROMPT)?
            };
            if let Some(note) = panel.clear(confirmed).await {
                println!("{}", note);
            }
            Ok(())
        }
        Commands::Session => run_session(storage, &config).await,
    }
}

/// Load every input, extract in parallel, then submit records one by one.
async fn collect_inputs(
    collector: &CollectorHandle,
    loader: &PageLoader,
    inputs: &[String],
    url: Option<&str>,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let t0 = Instant::now();
    let mut pages: Vec<LoadedPage> = Vec::with_capacity(inputs.len());
    let mut failed = 0usize;
    for input in inputs {
        match loader.load(input).await {
            Ok(mut page) => {
                if let Some(u) = url {
                    page.address = Some(u.to_string());
                }
                pages.push(page);
            }
            Err(e) => {
                eprintln!("Skipping {}: {}", input, e);
                failed += 1;
            }
        }
    }

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let extracted: Vec<(String, Result<ImageRecord, ExtractError>)> = pages
        .par_iter()
        .map(|p| {
            let page = Page::resolve(p.address.as_deref(), &p.source, &p.html);
            let result = CivitaiExtractor.extract(&page);
            pb.inc(1);
            (p.source.clone(), result)
        })
        .collect();
    pb.finish_and_clear();

    let mut added = 0usize;
    let mut updated = 0usize;
    for (source, result) in extracted {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Skipping {}: {}", source, e);
                failed += 1;
                continue;
            }
        };
        let image_id = record.image_id.clone();
        let reply = collector.collect(record).await?;
        match (reply.success, reply.is_duplicate) {
            (true, false) => added += 1,
            (true, true) => updated += 1,
            (false, _) => {
                eprintln!("Failed to save image {} from {}", image_id, source);
                failed += 1;
            }
        }
    }

    println!(
        "Collected {} new, {} updated, {} failed ({} total stored) in {:.1}s",
        added,
        updated,
        failed,
        collector.count().await?,
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

fn confirm_stdin(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

const SESSION_HELP: &str = "\
Commands:
  open <file|url> [address]   load a page (later opens navigate in place)
  collect                     click the Collect Data button
  toggle                      enable/disable collection
  status                      show count and collection state
  export [dir]                export collected data as JSON
  clear                       clear all collected data
  help                        show this help
  quit                        leave the session";

/// The three contexts in one process: page controller, collector, summary.
async fn run_session(storage: LocalStorage, config: &AppConfig) -> anyhow::Result<()> {
    let collector = collector::start(storage.clone())?;
    let enabled = settings::watch_enabled(&storage)?;
    let mut controller = PageController::new(CivitaiExtractor, collector.clone(), enabled);
    let mut enabled_changes = controller.enabled_changes();
    let panel = SummaryPanel::new(storage, collector);
    let mut count = panel.watch_count()?;
    let loader = PageLoader::new(config)?;
    let mut notes = NotificationArea::default();

    println!("{}", SESSION_HELP);
    println!("[summary] {} images collected", *count.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let flash_ends = controller.trigger().and_then(|t| t.flash_ends_at());
        let note_expires = notes.next_expiry();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut words = line.split_whitespace();
                let Some(command) = words.next() else { continue };
                match command {
                    "open" => {
                        let Some(input) = words.next() else {
                            println!("usage: open <file|url> [address]");
                            continue;
                        };
                        let loaded = match loader.load(input).await {
                            Ok(loaded) => loaded,
                            Err(e) => {
                                println!("[error] {}", e);
                                continue;
                            }
                        };
                        let explicit = words.next().map(str::to_string).or(loaded.address);
                        let page = Page::resolve(explicit.as_deref(), &loaded.source, &loaded.html);
                        if controller.page().is_none() {
                            controller.load(page);
                        } else if controller.navigate(page) {
                            println!("[page] content replaced, button re-attached");
                        }
                        print_trigger(&controller);
                    }
                    "collect" => match controller.trigger().map(|t| t.is_visible()) {
                        Some(true) => {
                            let note = controller.activate().await;
                            println!("{}", note);
                            notes.show(note, Instant::now());
                            print_trigger(&controller);
                        }
                        Some(false) => println!("[page] the Collect Data button is hidden"),
                        None => println!("[page] open a page first"),
                    },
                    "toggle" => println!("{}", panel.toggle()),
                    "status" => {
                        println!("[summary] {} images collected", panel.count()?);
                        println!(
                            "[summary] collection {}",
                            if panel.is_enabled()? { "enabled" } else { "disabled" }
                        );
                    }
                    "export" => {
                        let dir = words.next().map(PathBuf::from).unwrap_or_else(|| config.export_dir.clone());
                        println!("{}", panel.export(&dir));
                    }
                    "clear" => {
                        let mut confirmed = false;
                        if panel.has_data()? {
                            print!("{} [y/N] ", CLEAR_PROMPT);
                            std::io::stdout().flush()?;
                            confirmed = lines.next_line().await?.is_some_and(|a| is_yes(&a));
                        }
                        if let Some(note) = panel.clear(confirmed).await {
                            println!("{}", note);
                        }
                    }
                    "help" => println!("{}", SESSION_HELP),
                    "quit" | "exit" => break,
                    other => println!("unknown command '{}', try 'help'", other),
                }
            }
            Ok(()) = enabled_changes.changed() => {
                controller.sync_visibility();
                print_trigger(&controller);
            }
            Ok(()) = count.changed() => {
                println!("[summary] {} images collected", *count.borrow_and_update());
            }
            _ = tokio::time::sleep_until(deadline(flash_ends)), if flash_ends.is_some() => {
                if controller.settle_trigger(Instant::now()) {
                    print_trigger(&controller);
                }
            }
            _ = tokio::time::sleep_until(deadline(note_expires)), if note_expires.is_some() => {
                for note in notes.expire(Instant::now()) {
                    println!("[page] notification closed: {}", note.message);
                }
            }
        }
    }

    Ok(())
}

fn deadline(at: Option<Instant>) -> tokio::time::Instant {
    tokio::time::Instant::from_std(at.unwrap_or_else(Instant::now))
}

fn print_trigger<E: Extractor>(controller: &PageController<E>) {
    let label = page::Trigger::LABEL;
    match controller.trigger() {
        Some(t) if !t.is_visible() => println!("[page] [{}] button hidden", label),
        Some(t) => match t.appearance_at(Instant::now()) {
            Appearance::Collected => println!("[page] [{}] button shown (collected)", label),
            Appearance::Idle => println!("[page] [{}] button shown", label),
        },
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
