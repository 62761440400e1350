//! CLI command implementations.

use crate::settings::{self, FileConfig, Settings};
use colored::Colorize;
use grove_core::ChangeKind;
use grove_index::{Severity, WorkspaceIndex};
use grove_pool::WorkspacePool;
use grove_watcher::{time_until, StrategyPreset, WatchService, WatchState, WatchStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// How often the watch loop polls when no timer is pending.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Initialize Grove in a directory.
pub fn init(path: &Path) -> Result<()> {
    let config_path = settings::config_path(path);

    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    fs::create_dir_all(settings::state_dir(path))?;
    let config = FileConfig::default();
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    println!("{} Initialized Grove in {}", "✓".green(), path.display());
    println!("  Edit {} to add ignore patterns", config_path.display().to_string().cyan());
    println!("  Run {} to index your workspace", "grove scan".cyan());

    Ok(())
}

/// Opens `path` in a fresh single-workspace pool.
async fn open(path: &Path, strategy: Option<StrategyPreset>) -> Result<(WorkspacePool, PathBuf)> {
    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let file = settings::load(&root)?;
    let mut settings = Settings::resolve(&root, &file);
    if let Some(strategy) = strategy {
        settings.watch.strategy = strategy;
    }

    let watcher = WatchService::new(settings.watch);
    let mut pool = WorkspacePool::new(settings.pool, watcher);
    pool.get_or_create(&root).await?;
    Ok((pool, root))
}

fn index_of<'a>(pool: &'a mut WorkspacePool, root: &Path) -> Result<&'a mut WorkspaceIndex> {
    pool.get_mut(root)
        .ok_or_else(|| format!("workspace {} is not open", root.display()).into())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// Scan a workspace and report what was indexed.
pub async fn scan(path: &Path) -> Result<()> {
    println!("{}", "Scanning workspace...".cyan());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Walking directories...");

    let (mut pool, root) = open(path, Some(StrategyPreset::Disabled)).await?;
    spinner.finish_and_clear();

    let index = index_of(&mut pool, &root)?;
    let summary = index.summary();
    let report = summary.last_scan.unwrap_or_default();

    println!(
        "{} Indexed {} files in {} directories in {}ms",
        "✓".green(),
        report.files_indexed.to_string().cyan(),
        report.directories,
        report.duration.as_millis()
    );

    let skipped = report.skipped_ignored + report.skipped_binary + report.skipped_large;
    if skipped > 0 {
        println!(
            "  {}",
            format!(
                "skipped {} ignored, {} binary, {} too large",
                report.skipped_ignored, report.skipped_binary, report.skipped_large
            )
            .dimmed()
        );
    }
    if report.limit_reached {
        eprintln!(
            "\n{} Index limit of {} files reached; add ignore patterns to {}",
            "⚠ Warning:".yellow(),
            summary.cache.max_size,
            settings::config_path(&root).display()
        );
    }
    if report.errors > 0 {
        println!("{} {} entries couldn't be read", "⚠".yellow(), report.errors);
    }
    if let Some(project) = summary.project {
        println!("  {}", project.summary());
    }

    pool.shutdown();
    Ok(())
}

/// Search indexed files.
pub async fn search(path: &Path, query: &str, limit: usize) -> Result<()> {
    let (mut pool, root) = open(path, Some(StrategyPreset::Disabled)).await?;
    let index = index_of(&mut pool, &root)?;
    let results = index.search_files(query, limit);

    if results.is_empty() {
        println!("No matches found for \"{}\"", query);
        return Ok(());
    }

    println!("Found {} matches:\n", results.len());
    for record in results {
        println!(
            "  {} {} {}",
            format!("{:>5.1}", record.relevance).yellow(),
            relative(&root, &record.path).cyan(),
            record.language.unwrap_or_default().dimmed()
        );
    }

    pool.shutdown();
    Ok(())
}

/// Build a context document and print it to stdout.
pub async fn context(path: &Path, query: &str, files: &[PathBuf], max_tokens: usize) -> Result<()> {
    let (mut pool, root) = open(path, Some(StrategyPreset::Disabled)).await?;
    let working: Vec<PathBuf> = files
        .iter()
        .map(|f| f.canonicalize().unwrap_or_else(|_| root.join(f)))
        .collect();

    let index = index_of(&mut pool, &root)?;
    let context = index.build_context(query, &working, max_tokens);
    let tokens = grove_index::count_tokens(&context);

    let budget = if max_tokens == 0 {
        "unlimited".to_string()
    } else {
        max_tokens.to_string()
    };

    print!("{}", context);
    eprintln!("{}", format!("~{} tokens (budget: {})", tokens, budget).dimmed());

    pool.shutdown();
    Ok(())
}

/// Show index and watch status.
pub async fn status(path: &Path, json: bool) -> Result<()> {
    let initialized = settings::config_path(path).exists();
    let (mut pool, root) = open(path, None).await?;
    let watch_stats = pool.watcher().stats();
    let index = index_of(&mut pool, &root)?;
    let summary = index.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        pool.shutdown();
        return Ok(());
    }

    println!("{}", "📊 Grove Status".cyan().bold());
    println!();
    if !initialized {
        println!("  {} not initialized, run {}", "•".blue(), "grove init".cyan());
    }
    if let Some(project) = &summary.project {
        println!("  {} {}", "Project:".dimmed(), project.project_type);
        if let Some(framework) = &project.framework {
            println!("  {} {}", "Framework:".dimmed(), framework);
        }
        println!("  {} {}", "Files:".dimmed(), project.total_files);
        println!(
            "  {} {}",
            "Languages:".dimmed(),
            if project.languages.is_empty() {
                "(none)".to_string()
            } else {
                project.languages.iter().take(8).cloned().collect::<Vec<_>>().join(", ")
            }
        );
        println!("  {} {}", "Entry points:".dimmed(), project.entry_points.len());
    }
    println!(
        "  {} {}/{} entries",
        "Cache:".dimmed(),
        summary.cache.size,
        summary.cache.max_size
    );
    match &summary.watch {
        Some(handle) => println!(
            "  {} {} ({} strategy)",
            "Watch:".dimmed(),
            handle.state,
            watch_stats.strategy
        ),
        None => println!("  {} not registered", "Watch:".dimmed()),
    }

    pool.shutdown();
    Ok(())
}

/// Watch a workspace and print changes until Ctrl+C.
pub async fn watch(path: &Path, strategy: Option<StrategyPreset>) -> Result<()> {
    let (mut pool, root) = open(path, strategy).await?;
    let watcher = pool.watcher().clone();

    let index = index_of(&mut pool, &root)?;
    let files = index.get_statistics().map_or(0, |p| p.total_files);
    let listener_root = root.clone();
    let _subscription = index.on_file_change(move |kind, path| {
        let marker = match kind {
            ChangeKind::Add => "+".green(),
            ChangeKind::Modify => "~".yellow(),
            ChangeKind::Remove => "-".red(),
        };
        println!("  {} {}", marker, relative(&listener_root, path));
    });

    println!("{} Indexed {} files in {}", "✓".green(), files, root.display());
    match watcher.status(&root).map(|s| s.state) {
        Some(state @ (WatchState::ActiveNative | WatchState::ActivePolling)) => {
            println!("{} Watching ({})", "✓".green(), state);
        }
        Some(state) => {
            println!("{} Not watching live: {}", "⚠".yellow(), state);
            println!("  Changes are picked up by periodic manual refresh");
        }
        None => println!("{} Not watching", "⚠".yellow()),
    }
    println!("  Press {} to stop", "Ctrl+C".cyan());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_refresh = Instant::now();

    loop {
        let wait = time_until(pool.next_deadline(), Instant::now(), IDLE_POLL);
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        pool.tick();

        // Inert roots still see changes, just less promptly.
        let live = watcher
            .status(&root)
            .map_or(false, |s| s.state.is_active());
        if !live && last_refresh.elapsed() >= Duration::from_secs(5) {
            last_refresh = Instant::now();
            if let Some(index) = pool.get_mut(&root) {
                index.manual_refresh()?;
            }
        }
    }

    println!("\n{} Stopped", "✓".green());
    pool.shutdown();
    watcher.shutdown();
    Ok(())
}

fn watch_summary(watch: &WatchStats) -> String {
    format!(
        "Watch service: {} active, {} inert, {} failed{}",
        watch.active,
        watch.inert,
        watch.failed,
        if watch.fallback { " (fallback mode)" } else { "" }
    )
}

/// Check index health and memory use.
pub async fn doctor(path: &Path) -> Result<()> {
    println!("{}", "🔍 Grove Health Check".cyan().bold());
    println!("{}", "═".repeat(50));

    let (mut pool, root) = open(path, None).await?;
    let watch = pool.watcher().stats();
    let index = index_of(&mut pool, &root)?;
    let memory = index.get_memory_stats();
    let leaks = index.detect_memory_leaks();

    if settings::config_path(&root).exists() {
        println!("{} Grove initialized (.grove/ exists)", "✓".green());
    } else {
        println!("{} Grove not initialized (run 'grove init')", "⚠".yellow());
    }
    println!(
        "{} Resident memory {} MiB",
        "•".blue(),
        memory.heap_used / (1024 * 1024)
    );
    println!(
        "{} Cache {}/{} entries (~{} KiB), {} listeners, {} timers",
        "•".blue(),
        memory.cache_size,
        memory.cache_max_size,
        memory.cache_bytes / 1024,
        memory.listener_count,
        memory.active_timer_count
    );
    println!("{} {}", "•".blue(), watch_summary(&watch));

    println!("{}", "═".repeat(50));

    if leaks.issues.is_empty() {
        println!("{} No issues found", "🚀".green().bold());
    } else {
        let severity = match leaks.severity {
            Severity::Low => leaks.severity.to_string().blue(),
            Severity::Medium => leaks.severity.to_string().yellow(),
            Severity::High => leaks.severity.to_string().red(),
        };
        println!("{} Severity: {}", "⚠".yellow(), severity);
        for (issue, recommendation) in leaks.issues.iter().zip(&leaks.recommendations) {
            println!("  {} {}", "-".dimmed(), issue);
            println!("    {}", recommendation.dimmed());
        }
    }

    pool.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_summary_counts_each_failed_root_once() {
        let stats = WatchStats {
            roots: 3,
            handles: 3,
            max_watchers: 64,
            active: 1,
            inert: 0,
            failed: 2,
            permanently_failed: 2,
            fallback: false,
            pending_timers: 0,
            strategy: StrategyPreset::Conservative,
        };
        assert_eq!(
            watch_summary(&stats),
            "Watch service: 1 active, 0 inert, 2 failed"
        );
    }
}
