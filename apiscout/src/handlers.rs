use anyhow::{Context, Result, bail};
use apiscout_core::crawl::{CrawlOptions, execute_crawl};
use apiscout_core::data::{Database, DatabaseStats, EndpointRecord};
use apiscout_scanner::config::{DEFAULT_CONFIG_TOML, ScanConfig};
use apiscout_scanner::{CancelFlag, CrawlSummary};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, debug, warn};
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "apiscout.db";
const DEFAULT_CONFIG_DIR: &str = "~/.config/apiscout";

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(line)
        && url.host_str().is_some()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.contains(' '))
    {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

/// Install the fmt subscriber. `-v` forces debug; otherwise `level` comes
/// from `[logging].level` and falls back to info.
pub fn init_logging(level: &str, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        level.parse::<Level>().unwrap_or(Level::INFO)
    };

    // A second init (tests, repeated handlers) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_DIR).as_ref()).join(CONFIG_FILE_NAME)
}

/// Load `path`, or the default config file when it exists, or the built-in
/// defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<ScanConfig> {
    let path = match path {
        Some(path) => path.clone(),
        None => {
            let default = default_config_path();
            if !default.exists() {
                debug!("No config file found, using built-in defaults");
                return Ok(ScanConfig::default());
            }
            default
        }
    };

    debug!("Loading config from {}", path.display());
    ScanConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// `--db` if given, else the configured database path.
pub fn resolve_db_path(args: &ArgMatches, config: &ScanConfig) -> PathBuf {
    match args.get_one::<PathBuf>("db") {
        Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()),
        None => config.database_path(),
    }
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

/// Write the bundled default config into `dir`. An existing file is kept
/// unless `force` is set. Returns the path and whether it was written.
pub fn write_default_config(dir: &Path, force: bool) -> Result<(PathBuf, bool)> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(CONFIG_FILE_NAME);

    if path.exists() && !force {
        return Ok((path, false));
    }

    let content = DEFAULT_CONFIG_TOML.replace(
        "path = \"~/.config/apiscout/apiscout.db\"",
        &format!("path = {:?}", dir.join(DATABASE_FILE_NAME).display().to_string()),
    );
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok((path, true))
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  APISCOUT INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_DIR);
    let force = args.get_flag("force");
    let config_dir = PathBuf::from(shellexpand::tilde(dir).as_ref());

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );

    let (config_path, written) = write_default_config(&config_dir, force)?;
    if written {
        println!(
            "{} Wrote {}",
            "✓".green().bold(),
            config_path.display().to_string().bright_white()
        );
    } else {
        println!(
            "{} Keeping existing {} (use --force to overwrite)",
            "→".yellow().bold(),
            config_path.display()
        );
    }

    let db_path = config_dir.join(DATABASE_FILE_NAME);
    if force && Database::exists(&db_path) {
        Database::remove(&db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    open_database(&db_path)?;
    println!(
        "{} Database ready at {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    Ok(())
}

pub async fn handle_crawl(args: &ArgMatches, cancel: CancelFlag, verbose: bool) -> Result<()> {
    let mut config = load_config(args.get_one::<PathBuf>("config"))?;
    init_logging(&config.logging.level, verbose);

    if let Some(depth) = args.get_one::<usize>("depth") {
        config.crawl.max_depth = *depth;
    }
    if args.get_flag("ignore-robots") {
        config.crawl.respect_robots = false;
    }

    let raw_url = args
        .get_one::<String>("url")
        .context("--url is required")?;
    let Some(url) = parse_url_line(raw_url) else {
        bail!("Invalid URL '{}'", raw_url);
    };

    // Fail on bad patterns before anything is requested.
    let compiled = config.compile().context("Invalid configuration")?;
    let db_path = resolve_db_path(args, &config);
    let db = open_database(&db_path)?;

    println!("\n🕷️  Crawling {}", url.bright_white());
    println!("Max depth: {}", compiled.max_depth);
    println!("Page delay: {:?}", compiled.page_delay);
    println!(
        "robots.txt: {}",
        if compiled.respect_robots { "respected" } else { "ignored" }
    );
    println!("Database: {}\n", db_path.display());

    let options = CrawlOptions {
        url,
        config: compiled,
        show_progress_bars: !args.get_flag("no-progress"),
    };

    let report = execute_crawl(options, &db, cancel)
        .await
        .context("Crawl failed")?;

    print!("{}", format_crawl_summary(&report.summary));
    Ok(())
}

pub fn format_crawl_summary(summary: &CrawlSummary) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!("{}\n", "═".repeat(60)));
    out.push_str(&format!(
        "{}\n",
        if summary.cancelled {
            "Crawl cancelled"
        } else {
            "Crawl complete"
        }
    ));
    out.push_str(&format!("  Pages crawled:    {}\n", summary.pages_visited));
    out.push_str(&format!("  Pages failed:     {}\n", summary.pages_failed));
    out.push_str(&format!("  APIs found:       {}\n", summary.captures.total_captured));
    out.push_str(&format!(
        "  Unique endpoints: {}\n",
        summary.captures.unique_endpoint_count()
    ));
    for (method, count) in &summary.captures.methods {
        out.push_str(&format!("    {:<7} {}\n", method, count));
    }
    out.push_str(&format!("  Still queued:     {}\n", summary.frontier.queued));
    out
}

pub fn handle_stats(args: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(args.get_one::<PathBuf>("config"))?;
    init_logging(&config.logging.level, verbose);

    let db_path = resolve_db_path(args, &config);
    if !Database::exists(&db_path) {
        bail!(
            "No database at {} (run `apiscout init` or `apiscout crawl` first)",
            db_path.display()
        );
    }
    let db = open_database(&db_path)?;

    let stats = db.get_stats()?;
    let endpoints = db.get_all_endpoints()?;
    print!("{}", format_stats_report(&stats, &endpoints));
    Ok(())
}

/// Totals plus the ten most called endpoints.
pub fn format_stats_report(stats: &DatabaseStats, endpoints: &[EndpointRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "═".repeat(60).bright_blue().bold()));
    out.push_str(&format!("{}\n", "  APISCOUT STATISTICS".bright_white().bold()));
    out.push_str(&format!("{}\n\n", "═".repeat(60).bright_blue().bold()));

    out.push_str(&format!(
        "  {:<18} {}\n",
        "Total endpoints".cyan(),
        stats.total_endpoints.to_string().green()
    ));
    out.push_str(&format!(
        "  {:<18} {}\n",
        "Total API calls".cyan(),
        stats.total_calls.to_string().green()
    ));
    out.push_str(&format!(
        "  {:<18} {}\n",
        "Database size".cyan(),
        format!("{} MB", stats.database_size_mb()).green()
    ));
    for (method, count) in &stats.methods {
        out.push_str(&format!("    {:<7} {}\n", method, count));
    }

    if !endpoints.is_empty() {
        out.push_str(&format!("\n{}\n", "Top 10 endpoints".yellow().bold()));
        for (i, endpoint) in endpoints.iter().take(10).enumerate() {
            let url: String = endpoint.url.chars().take(80).collect();
            out.push_str(&format!(
                "  {:>2}. {:<7} {} {}\n",
                i + 1,
                endpoint.method.cyan(),
                url.blue(),
                format!("({} calls)", endpoint.call_count).green()
            ));
        }
    }

    out
}

pub fn handle_clear(args: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(args.get_one::<PathBuf>("config"))?;
    init_logging(&config.logging.level, verbose);

    let db_path = resolve_db_path(args, &config);
    if !Database::exists(&db_path) {
        println!("Nothing to clear: no database at {}", db_path.display());
        return Ok(());
    }

    if !args.get_flag("yes") {
        let response = print_prompt(&format!(
            "Delete all captured data in {}? [y/N]:",
            db_path.display()
        ))?;
        if response != "y" && response != "yes" {
            println!("{} Cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    let db = open_database(&db_path)?;
    db.clear_all_data()?;
    println!("{} All data cleared", "✓".green().bold());
    Ok(())
}
