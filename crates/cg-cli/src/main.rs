//! ContentGuard CLI
//!
//! CLI tool for compiling rule lists, managing allow-lists and classifying
//! URLs against the tracker database.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Instant, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use cg_blocker::{BlockerConfig, ContentBlocker, ContentBlockerTab, TabSettings};
use cg_compiler::lifecycle::RuleListHost;
use cg_compiler::marker::BLOCKER_FILE_DATE_KEY;
use cg_compiler::store::CompiledRuleList;
use cg_compiler::{JsonMarkerStore, MarkerStore};
use cg_core::types::{AllowListKind, BlocklistName};

#[derive(Parser)]
#[command(name = "cg-cli")]
#[command(about = "ContentGuard rule compiler and tracker tools")]
struct Cli {
    /// JSON config file; overrides --resources and --state
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of bundled rule lists and the tracker database
    #[arg(long, global = true, default_value = "resources")]
    resources: PathBuf,

    /// Directory for allow-lists, compiled rules and markers
    #[arg(long, global = true, default_value = "state")]
    state: PathBuf,

    /// Public Suffix List for eTLD+1 extraction
    #[arg(long, global = true)]
    psl: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every rule list missing from the store
    Compile {
        /// Drop all compiled lists first
        #[arg(long)]
        force: bool,
    },

    /// Show store, allow-list and tracker database state
    Info,

    /// Classify URLs against the tracker database
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Simulate a page load and print its stats and status
    Page {
        /// URL of the page
        #[arg(short, long)]
        url: String,

        /// Resource URLs reported by the page
        #[arg(short, long)]
        resource: Vec<String>,

        /// Enable popup blocking for the tab
        #[arg(long)]
        popups: bool,
    },

    /// Manage allow-lists
    Allowlist {
        #[command(subcommand)]
        action: AllowlistAction,
    },
}

#[derive(Subcommand)]
enum AllowlistAction {
    /// Allow-list the host of a URL
    Add {
        /// ads, tracking or popups
        kind: AllowListKind,
        url: String,
    },
    /// Remove the host of a URL from an allow-list
    Remove {
        kind: AllowListKind,
        url: String,
    },
    /// Print allow-listed domains
    List {
        kind: Option<AllowListKind>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match load_config(&cli) {
        Ok(config) => {
            let blocker = Arc::new(ContentBlocker::from_config(config));
            match cli.command {
                Commands::Compile { force } => cmd_compile(&blocker, force).await,
                Commands::Info => cmd_info(&blocker).await,
                Commands::Classify { urls } => cmd_classify(&blocker, &urls).await,
                Commands::Page {
                    url,
                    resource,
                    popups,
                } => cmd_page(&blocker, &url, &resource, popups).await,
                Commands::Allowlist { action } => cmd_allowlist(&blocker, action).await,
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<BlockerConfig, String> {
    let mut config = match &cli.config {
        Some(path) => BlockerConfig::from_file(path).map_err(|e| e.to_string())?,
        None => BlockerConfig::with_root(&cli.resources, &cli.state),
    };
    if cli.psl.is_some() {
        config.psl_path = cli.psl.clone();
    }
    if !config.resources_dir.is_dir() {
        return Err(format!(
            "Resources directory '{}' does not exist",
            config.resources_dir.display()
        ));
    }
    Ok(config)
}

fn list_names(lists: &[BlocklistName]) -> String {
    if lists.is_empty() {
        return "-".to_string();
    }
    lists.iter().map(|l| l.filename()).collect::<Vec<_>>().join(", ")
}

async fn cmd_compile(blocker: &ContentBlocker, force: bool) -> Result<(), String> {
    let start = Instant::now();
    if force {
        let removed = blocker.compiler().remove_all_rules_in_store().await;
        println!("Removed {} compiled lists", removed);
    }

    let report = blocker.start().await;
    let total_time = start.elapsed();

    println!("Rule lists in '{}'", blocker.config().store_dir.display());
    println!("  Compiled:    {}", list_names(&report.compiled));
    println!("  Up to date:  {}", list_names(&report.already_installed));
    println!("  Failed:      {}", list_names(&report.failed));
    println!("  Trackers:    {} domains", blocker.tracker_db().len());
    println!("  Time:        {:.1}ms", total_time.as_secs_f64() * 1000.0);

    if !report.failed.is_empty() {
        return Err(format!("{} rule lists failed to compile", report.failed.len()));
    }
    Ok(())
}

async fn cmd_info(blocker: &ContentBlocker) -> Result<(), String> {
    let config = blocker.config();
    let installed = blocker.compiler().installed_lists().await;
    let markers = JsonMarkerStore::open(&config.marker_path);

    println!("Store: {}", config.store_dir.display());
    for list in BlocklistName::ALL {
        let state = if installed.contains(&list) { "compiled" } else { "missing" };
        println!("  {:<26} {}", list.filename(), state);
    }
    println!();

    let marker = markers
        .date(BLOCKER_FILE_DATE_KEY)
        .and_then(|date| date.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|| "unset".to_string());
    let bundle = blocker
        .compiler()
        .newest_bundle_date()
        .and_then(|date| date.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("Dates (ms since epoch):");
    println!("  Marker:      {}", marker);
    println!("  Bundle:      {}", bundle);
    println!();

    println!("Allow-lists: {}", config.documents_dir.display());
    for kind in AllowListKind::ALL {
        println!(
            "  {:<10} {} domains",
            kind.as_str(),
            blocker.allow_list_domains(kind).len()
        );
    }

    Ok(())
}

async fn cmd_classify(blocker: &ContentBlocker, urls: &[String]) -> Result<(), String> {
    let config = blocker.config();
    blocker
        .tracker_db()
        .startup(Arc::clone(blocker.compiler().bundle()), &config.tracker_db_resource)
        .await
        .map_err(|e| format!("Tracker database load failed: {}", e))?;
    if !blocker.tracker_db().is_ready() {
        return Err(format!(
            "Tracker database '{}' could not be loaded",
            config.tracker_db_resource
        ));
    }

    let pending: Vec<_> = urls.iter().map(|url| blocker.classify(url)).collect();
    let mut results = Vec::with_capacity(urls.len());
    for (url, classification) in urls.iter().zip(pending) {
        let tracker = classification.await;
        results.push(serde_json::json!({ "url": url, "tracker": tracker }));
    }

    let output = serde_json::to_string_pretty(&results)
        .map_err(|e| format!("Failed to encode results: {}", e))?;
    println!("{}", output);
    Ok(())
}

/// Headless tab used to simulate page loads.
struct CliTab {
    url: String,
    installed: Mutex<Vec<String>>,
}

impl RuleListHost for CliTab {
    fn install_rule_list(&self, list: &CompiledRuleList) {
        if let Ok(mut installed) = self.installed.lock() {
            installed.push(list.identifier().to_string());
        }
    }

    fn uninstall_all_rule_lists(&self) {
        if let Ok(mut installed) = self.installed.lock() {
            installed.clear();
        }
    }
}

impl ContentBlockerTab for CliTab {
    fn current_url(&self) -> Option<String> {
        Some(self.url.clone())
    }
}

async fn cmd_page(
    blocker: &Arc<ContentBlocker>,
    url: &str,
    resources: &[String],
    popups: bool,
) -> Result<(), String> {
    blocker.start().await;

    let tab = Arc::new(CliTab {
        url: url.to_string(),
        installed: Mutex::new(Vec::new()),
    });
    let settings = TabSettings {
        popup_blocking: popups,
        ..TabSettings::default()
    };
    let tab_blocker = blocker.tab(1, tab.clone(), settings);
    tab_blocker.setup_for_tab().await;

    for resource in resources {
        let payload = serde_json::json!({ "url": resource });
        tab_blocker.handle_message(&payload).await;
    }

    let stats = tab_blocker.stats();
    let installed = tab.installed.lock().map(|l| l.clone()).unwrap_or_default();
    let output = serde_json::json!({
        "url": url,
        "status": tab_blocker.status(),
        "installed": installed,
        "total": stats.total(),
        "by_category": stats
            .by_category()
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), serde_json::Value::from(count)))
            .collect::<serde_json::Map<String, serde_json::Value>>(),
        "trackers": stats.trackers(),
    });

    let text = serde_json::to_string_pretty(&output)
        .map_err(|e| format!("Failed to encode page stats: {}", e))?;
    println!("{}", text);
    Ok(())
}

async fn cmd_allowlist(blocker: &ContentBlocker, action: AllowlistAction) -> Result<(), String> {
    match action {
        AllowlistAction::Add { kind, url } => set_allow_listed(blocker, kind, true, &url).await,
        AllowlistAction::Remove { kind, url } => set_allow_listed(blocker, kind, false, &url).await,
        AllowlistAction::List { kind } => {
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => AllowListKind::ALL.to_vec(),
            };
            for kind in kinds {
                for domain in blocker.allow_list_domains(kind) {
                    println!("{}\t{}", kind.as_str(), domain);
                }
            }
            Ok(())
        }
    }
}

async fn set_allow_listed(
    blocker: &ContentBlocker,
    kind: AllowListKind,
    enabled: bool,
    url: &str,
) -> Result<(), String> {
    if !blocker.set_allow_listed(kind, enabled, url).await {
        return Err(format!("'{}' has no host to allow-list", url));
    }

    let verb = if enabled { "Added" } else { "Removed" };
    println!(
        "{} {} on the {} allow-list; recompiled {}",
        verb,
        url,
        kind.as_str(),
        list_names(kind.dependent_lists())
    );
    Ok(())
}
