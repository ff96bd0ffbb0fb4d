//! addonctl - Main entry point.
//!
//! Usage: addonctl <COMMAND> [OPTIONS]
//!
//! Commands:
//!   resolve <slug>          Show the dependency plan of an addon
//!   install <slug>          Install an addon and its dependencies
//!   uninstall <slug>        Remove an installed addon
//!   updates                 List available updates
//!   update [slug]           Update one addon, or all with updates
//!   list                    List installed addons
//!   scan                    Record addons found in the addon directory
//!   refresh                 Force a catalog refresh
//!   repo add <owner/repo>   Track a GitHub repository
//!   repo remove <owner/repo>
//!   repo list
//!   github <owner/repo>     Install straight from a GitHub repository
//!
//! Options:
//!   --version, -v           Show version
//!   --json                  Machine-readable output for resolve and updates
//!   --branch <name>         Branch for repo add / github
//!   --type <release|branch> Tracking mode for repo add / github

use std::env;
use std::process;

use addonctl::addons::{
    AddonManager, CancelToken, EventSink, InstallEvent, InstallStatus, OutcomeStatus,
    PackageOutcome, ReleaseType, SourceKind, TomlRecordStore, missing_dependencies,
};
use addonctl::catalog::CatalogClient;
use addonctl::config::{Config, paths};
use addonctl::logging;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Resolve { slug: String, json: bool },
    Install { slug: String },
    Uninstall { slug: String },
    Updates { json: bool },
    Update { slug: Option<String> },
    List,
    Scan,
    Refresh,
    RepoAdd { repo: String, branch: Option<String>, release_type: ReleaseType },
    RepoRemove { repo: String },
    RepoList,
    Github { repo: String, branch: Option<String>, release_type: ReleaseType },
    Version,
    Help,
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--branch" || arg == "--type" {
            skip_next = true;
            continue;
        }
        if !arg.starts_with('-') {
            out.push(arg.as_str());
        }
    }
    out
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    if args.iter().any(|a| a == "--version" || a == "-v") {
        return Ok(Command::Version);
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(Command::Help);
    }

    let json = args.iter().any(|a| a == "--json");
    let branch = flag_value(args, "--branch");
    let release_type = flag_value(args, "--type")
        .map(|t| ReleaseType::parse(&t))
        .unwrap_or_else(|| {
            if branch.is_some() {
                ReleaseType::Branch
            } else {
                ReleaseType::Release
            }
        });

    let pos = positionals(args);
    let arg = |i: usize, what: &str| {
        pos.get(i)
            .map(|s| (*s).to_string())
            .ok_or_else(|| format!("missing {}", what))
    };

    match pos.first().copied() {
        None | Some("help") => Ok(Command::Help),
        Some("resolve") => Ok(Command::Resolve {
            slug: arg(1, "<slug>")?,
            json,
        }),
        Some("install") => Ok(Command::Install {
            slug: arg(1, "<slug>")?,
        }),
        Some("uninstall" | "remove") => Ok(Command::Uninstall {
            slug: arg(1, "<slug>")?,
        }),
        Some("updates") => Ok(Command::Updates { json }),
        Some("update") => Ok(Command::Update {
            slug: pos.get(1).map(|s| (*s).to_string()),
        }),
        Some("list") => Ok(Command::List),
        Some("scan") => Ok(Command::Scan),
        Some("refresh") => Ok(Command::Refresh),
        Some("repo") => match pos.get(1).copied() {
            Some("add") => Ok(Command::RepoAdd {
                repo: arg(2, "<owner/repo>")?,
                branch,
                release_type,
            }),
            Some("remove") => Ok(Command::RepoRemove {
                repo: arg(2, "<owner/repo>")?,
            }),
            Some("list") | None => Ok(Command::RepoList),
            Some(other) => Err(format!("unknown repo command '{}'", other)),
        },
        Some("github") => Ok(Command::Github {
            repo: arg(1, "<owner/repo>")?,
            branch,
            release_type,
        }),
        Some(other) => Err(format!("unknown command '{}'", other)),
    }
}

fn print_usage() {
    println!("addonctl v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: addonctl <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  resolve <slug>            Show the dependency plan of an addon");
    println!("  install <slug>            Install an addon and its dependencies");
    println!("  uninstall <slug>          Remove an installed addon");
    println!("  updates                   List available updates");
    println!("  update [slug]             Update one addon, or all with updates");
    println!("  list                      List installed addons");
    println!("  scan                      Record addons found in the addon directory");
    println!("  refresh                   Force a catalog refresh");
    println!("  repo add|remove|list      Manage tracked GitHub repositories");
    println!("  github <owner/repo>       Install straight from GitHub");
    println!();
    println!("Options:");
    println!("  --json                    Machine-readable output");
    println!("  --branch <name>           Branch for repo add / github");
    println!("  --type <release|branch>   Tracking mode for repo add / github");
    println!("  --version, -v             Show version");
}

/// Prints install events to stderr until the sink is dropped.
fn spawn_event_printer(mut rx: UnboundedReceiver<InstallEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.status {
                InstallStatus::Downloading(progress) => {
                    if let Some(fraction) = progress.fraction() {
                        eprint!("\r  {} downloading {:>3.0}%", event.slug, fraction * 100.0);
                    } else if progress.received() > 0 {
                        eprint!("\r  {} downloading {} KB", event.slug, progress.received() / 1024);
                    }
                }
                InstallStatus::SourceFailed { kind, reason } => {
                    eprintln!("\r  {} {} source failed: {}", event.slug, kind, reason);
                }
                InstallStatus::Extracting => eprintln!("\r  {} extracting", event.slug),
                InstallStatus::Complete => eprintln!("  {} done", event.slug),
                InstallStatus::Failed(reason) => eprintln!("  {} failed: {}", event.slug, reason),
            }
        }
    })
}

/// Cancels `cancel` on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            cancel.cancel();
        }
    });
}

fn print_outcomes(outcomes: &[PackageOutcome]) -> bool {
    let mut ok = true;
    for outcome in outcomes {
        match &outcome.status {
            OutcomeStatus::Installed { version } => {
                println!("  installed {} {}", outcome.slug, version);
            }
            OutcomeStatus::Failed { reason } => {
                ok = false;
                println!("  FAILED    {}: {}", outcome.slug, reason);
            }
            OutcomeStatus::Skipped { reason } => {
                ok = false;
                println!("  skipped   {} ({})", outcome.slug, reason);
            }
        }
    }
    ok
}

async fn load_catalog(manager: &AddonManager, client: &CatalogClient) -> CliResult<()> {
    let count = manager.refresh_catalog(client, false).await?;
    tracing::info!("Catalog loaded ({} entries)", count);
    Ok(())
}

async fn run(command: Command, config: &Config) -> CliResult<bool> {
    let addon_root = paths::addon_root_directory(config.addon_directory.as_deref());
    if addon_root.is_none() {
        tracing::warn!("No addon directory found");
    }

    std::fs::create_dir_all(paths::data_directory())?;
    let store = TomlRecordStore::open(paths::records_path())?;
    let manager = AddonManager::new(Box::new(store), addon_root, config.download_timeout());
    let client = CatalogClient::new(
        &config.index_url,
        paths::cache_directory(),
        config.catalog_ttl(),
    );

    let needs_catalog = matches!(
        command,
        Command::Resolve { .. }
            | Command::Install { .. }
            | Command::Updates { .. }
            | Command::Update { .. }
    );
    if needs_catalog || config.check_updates_on_startup {
        load_catalog(&manager, &client).await?;
    }

    if config.check_updates_on_startup && !matches!(command, Command::Updates { .. }) {
        let updates = manager.check_for_updates()?;
        if !updates.is_empty() {
            eprintln!("{} update(s) available, run `addonctl updates`", updates.len());
        }
    }

    let cancel = CancelToken::new();
    spawn_interrupt_handler(cancel.clone());

    match command {
        Command::Resolve { slug, json } => {
            let plan = manager.resolve_dependencies(&slug)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
                return Ok(true);
            }
            println!("{} {}", plan.root.name, plan.root.version_label());
            for node in &plan.resolved {
                println!("  install   {} (depth {})", node.slug, node.depth);
            }
            for node in &plan.already_installed {
                println!("  present   {}", node.slug);
            }
            for node in &plan.unresolved {
                println!("  missing   {}", node.slug);
            }
            for name in &plan.optional {
                println!("  optional  {}", name);
            }
            for cycle in &plan.cycles_broken {
                println!("  cycle     {}", cycle);
            }
            Ok(plan.unresolved.is_empty())
        }
        Command::Install { slug } => {
            let (sink, rx) = EventSink::channel();
            let printer = spawn_event_printer(rx);
            let report = manager.install_with_dependencies(&slug, &sink, &cancel).await;
            drop(sink);
            let _ = printer.await;

            let report = report?;
            let ok = print_outcomes(&report.outcomes);
            for missing in &report.unresolved {
                println!("  missing   {} (not in catalog)", missing);
            }
            Ok(ok)
        }
        Command::Uninstall { slug } => {
            let record = manager.uninstall_package(&slug)?;
            println!("Removed {} {}", record.name, record.installed_version);
            Ok(true)
        }
        Command::Updates { json } => {
            let mut updates = manager.check_for_updates()?;
            updates.extend(manager.check_github_updates().await?);
            if json {
                println!("{}", serde_json::to_string_pretty(&updates)?);
            } else if updates.is_empty() {
                println!("Everything is up to date.");
            } else {
                for update in &updates {
                    println!(
                        "  {:<32} {} -> {} ({})",
                        update.name, update.current_version, update.new_version, update.source_kind
                    );
                }
            }
            Ok(true)
        }
        Command::Update { slug } => {
            let (sink, rx) = EventSink::channel();
            let printer = spawn_event_printer(rx);
            let result = match slug {
                Some(slug) => manager
                    .update_package(&slug, &sink, &cancel)
                    .await
                    .map(|record| {
                        vec![PackageOutcome {
                            slug: record.slug,
                            status: OutcomeStatus::Installed {
                                version: record.installed_version,
                            },
                        }]
                    }),
                None => manager.update_all(&sink, &cancel).await,
            };
            drop(sink);
            let _ = printer.await;

            let outcomes = result?;
            if outcomes.is_empty() {
                println!("Everything is up to date.");
            }
            Ok(print_outcomes(&outcomes))
        }
        Command::List => {
            let records = manager.installed()?;
            if records.is_empty() {
                println!("No addons installed.");
            }
            for record in records {
                let origin = match record.source_kind {
                    SourceKind::Github => record.source_repo.unwrap_or_default(),
                    kind => kind.to_string(),
                };
                println!(
                    "  {:<32} {:<16} {}",
                    record.name, record.installed_version, origin
                );
            }
            Ok(true)
        }
        Command::Scan => {
            let imported = manager.sync_local_addons()?;
            println!("Recorded {} local addon(s).", imported.len());
            for record in imported {
                println!("  {} {}", record.name, record.installed_version);
            }

            let local = manager.local_addons()?;
            for addon in &local {
                let manifest = &addon.manifest;
                if !manifest.dependencies.is_empty() {
                    let required = manifest.dependencies.join(" ");
                    println!("  {:<32} depends on {}", addon.folder, required);
                }
                if !manifest.optional_dependencies.is_empty() {
                    let optional = manifest.optional_dependencies.join(" ");
                    println!("  {:<32} optionally uses {}", addon.folder, optional);
                }
                if !manifest.saved_variables.is_empty() {
                    let saved = manifest.saved_variables.join(" ");
                    println!("  {:<32} saves {}", addon.folder, saved);
                }
            }

            let missing = missing_dependencies(&local);
            if !missing.is_empty() {
                println!("Missing dependencies:");
                for m in &missing {
                    println!("  {} needs {}", m.addon, m.dependency);
                }
            }
            Ok(true)
        }
        Command::Refresh => {
            let count = manager.refresh_catalog(&client, true).await?;
            println!("Catalog refreshed: {} addons.", count);
            for (category, n) in manager.catalog().category_counts() {
                println!("  {:<24} {}", category, n);
            }
            Ok(true)
        }
        Command::RepoAdd {
            repo,
            branch,
            release_type,
        } => {
            let tracked = manager
                .add_custom_repo(&repo, branch.as_deref(), release_type)
                .await?;
            println!("Tracking {} ({})", tracked.repo, tracked.branch);
            Ok(true)
        }
        Command::RepoRemove { repo } => {
            if manager.remove_custom_repo(&repo)? {
                println!("Stopped tracking {}", repo);
                Ok(true)
            } else {
                println!("{} is not tracked", repo);
                Ok(false)
            }
        }
        Command::RepoList => {
            for repo in manager.list_custom_repos()? {
                println!("  {:<40} {:<12} {:?}", repo.repo, repo.branch, repo.release_type);
            }
            Ok(true)
        }
        Command::Github {
            repo,
            branch,
            release_type,
        } => {
            let (sink, rx) = EventSink::channel();
            let printer = spawn_event_printer(rx);
            let result = manager
                .install_from_github(&repo, branch.as_deref(), release_type, &sink, &cancel)
                .await;
            drop(sink);
            let _ = printer.await;

            let record = result?;
            println!("Installed {} {}", record.name, record.installed_version);
            Ok(true)
        }
        Command::Version | Command::Help => Ok(true),
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match parse_command(&args) {
        Ok(Command::Version) => {
            println!("addonctl v{}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Ok(Command::Help) => {
            print_usage();
            return;
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            process::exit(2);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: could not read ~/.addonrc ({}), using defaults", e);
            Config::default()
        }
    };

    let _log_guard = match logging::init(&config.log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled ({})", e);
            None
        }
    };

    match run(command, &config).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
