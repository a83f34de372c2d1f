//! # loctrail
//!
//! A CLI for tracking lines of code per commit across a repository's history.
//!
//! ## Overview
//!
//! loctrail is built on top of loctraillib. It keeps a set of tracked
//! repositories in a data directory, clones them into a workspace, and stores
//! one line-count snapshot per commit.
//!
//! ## Usage
//!
//! ```bash
//! # Track a repository
//! loctrail add https://github.com/rust-lang/log.git
//!
//! # Analyze every commit that has no snapshot yet
//! loctrail analyze rust-lang/log
//!
//! # Recompute snapshots that recorded no change, or start over
//! loctrail analyze rust-lang/log --force
//! loctrail analyze rust-lang/log --clear
//!
//! # Inspect results
//! loctrail snapshots rust-lang/log
//! loctrail snapshots rust-lang/log --output json
//! loctrail failures
//!
//! # Retry failed commits once, or keep retrying in the background
//! loctrail retry
//! loctrail watch
//! ```

mod render;

use render::OutputMode;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use loctraillib::{
    AnalyzeOptions, EngineConfig, EnvCredentials, GixGateway, JsonFileStore, RepoId,
    RepositorySynchronizer, RetryExecutor, RetryScheduler, Store, TrackedRepository,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const STORE_FILE: &str = "store.json";

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_parser(["auto", "term", "text", "term-debug", "json"])
        .default_value("auto")
        .help("Output mode (auto styles only when writing to a terminal)")
}

fn repo_arg() -> Arg {
    Arg::new("repo")
        .required(true)
        .help("Repository id or owner/name")
}

/// Build the clap Command structure
fn build_command() -> Command {
    Command::new("loctrail")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Arthur Debert")
        .about("Track lines of code per commit across a repository's full history")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .global(true)
                .default_value(".loctrail")
                .help("Directory holding the store and the working copies"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .subcommand(
            Command::new("add")
                .about("Track a repository")
                .arg(Arg::new("url").required(true).help("Clone URL or local path"))
                .arg(
                    Arg::new("owner")
                        .long("owner")
                        .help("Owner (defaults to the URL's second to last segment)"),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Name (defaults to the URL's last segment)"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List tracked repositories")
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Stop tracking a repository and drop its data")
                .arg(repo_arg()),
        )
        .subcommand(
            Command::new("analyze")
                .about("Sync a repository and snapshot every commit")
                .arg(repo_arg())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Recompute snapshots that recorded no change"),
                )
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(ArgAction::SetTrue)
                        .help("Delete existing snapshots before analyzing"),
                )
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("snapshots")
                .about("Show per-commit snapshots, oldest first")
                .arg(repo_arg())
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("failures")
                .about("Show the failed-operation ledger")
                .arg(Arg::new("repo").help("Repository id or owner/name"))
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("retry")
                .about("Retry every due failed operation once")
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("watch").about("Retry failed operations in the background until Ctrl-C"),
        )
}

/// Shared state for every subcommand.
struct Engine {
    config: EngineConfig,
    data_dir: PathBuf,
    store: Arc<JsonFileStore>,
}

impl Engine {
    async fn open(matches: &ArgMatches) -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(
            matches
                .get_one::<String>("data-dir")
                .map(|s| s.as_str())
                .unwrap_or(".loctrail"),
        );
        let config = match matches.get_one::<String>("config") {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        let store = JsonFileStore::open(data_dir.join(STORE_FILE))
            .await
            .with_context(|| format!("failed to open store in {}", data_dir.display()))?;

        Ok(Self {
            config,
            data_dir,
            store: Arc::new(store),
        })
    }

    fn synchronizer(&self) -> anyhow::Result<RepositorySynchronizer> {
        Ok(RepositorySynchronizer::new(
            self.store.clone(),
            Arc::new(GixGateway::new()),
            Arc::new(self.config.analyzer()?),
            self.config.workspace_root_in(&self.data_dir),
        )
        .with_credentials(Arc::new(EnvCredentials)))
    }

    fn scheduler(&self) -> anyhow::Result<RetryScheduler> {
        let executor = RetryExecutor::new(
            self.store.clone(),
            Arc::new(GixGateway::new()),
            Arc::new(self.config.analyzer()?),
        );
        Ok(RetryScheduler::new(
            self.store.clone(),
            executor,
            self.config.retry,
        ))
    }

    /// Find a repository by id or `owner/name`.
    async fn resolve(&self, key: &str) -> anyhow::Result<TrackedRepository> {
        if let Ok(id) = key.parse::<RepoId>() {
            if let Some(repo) = self.store.get_repository(id).await? {
                return Ok(repo);
            }
        }
        let mut matching: Vec<TrackedRepository> = self
            .store
            .list_repositories()
            .await?
            .into_iter()
            .filter(|repo| repo.full_name().eq_ignore_ascii_case(key))
            .collect();
        match matching.len() {
            0 => bail!("no tracked repository matches '{}'", key),
            1 => Ok(matching.remove(0)),
            n => bail!("'{}' matches {} repositories, use the id instead", key, n),
        }
    }
}

/// Owner and name from a clone URL or local path.
fn owner_and_name(url: &str) -> Option<(String, String)> {
    let path = match Url::parse(url) {
        Ok(parsed) if parsed.scheme() != "file" || parsed.path().len() > 1 => {
            parsed.path().to_string()
        }
        // scp-like `git@host:owner/name.git` and local paths
        _ => url.replace(['\\', ':'], "/"),
    };
    let mut segments = path
        .trim_end_matches('/')
        .rsplit('/')
        .filter(|s| !s.is_empty());
    let name = segments.next()?.trim_end_matches(".git").to_string();
    let owner = segments.next().unwrap_or("local").to_string();
    if name.is_empty() {
        return None;
    }
    Some((owner, name))
}

fn output_mode(matches: &ArgMatches) -> OutputMode {
    matches
        .get_one::<String>("output")
        .map(|s| match s.as_str() {
            "json" => OutputMode::Json,
            "text" => OutputMode::Text,
            "term-debug" => OutputMode::TermDebug,
            "term" => OutputMode::Term,
            _ => OutputMode::Auto,
        })
        .unwrap_or(OutputMode::Auto)
}

/// Print rendered output, ending it with a newline.
fn emit(rendered: Result<String, Box<dyn std::error::Error>>) -> anyhow::Result<()> {
    let output = rendered.map_err(|e| anyhow!("failed to render output: {e}"))?;
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
    Ok(())
}

/// Handler for add command
async fn add_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let url = matches
        .get_one::<String>("url")
        .ok_or_else(|| anyhow!("missing url"))?;
    let (default_owner, default_name) = owner_and_name(url)
        .ok_or_else(|| anyhow!("cannot derive a repository name from '{}'", url))?;
    let owner = matches
        .get_one::<String>("owner")
        .cloned()
        .unwrap_or(default_owner);
    let name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or(default_name);

    // local paths are stored absolute so later runs work from any directory
    let clone_url = if Path::new(url).exists() {
        std::fs::canonicalize(url)?.to_string_lossy().into_owned()
    } else {
        url.clone()
    };

    let repo = TrackedRepository::new(owner, name, clone_url);
    if engine
        .store
        .list_repositories()
        .await?
        .iter()
        .any(|existing| existing.full_name().eq_ignore_ascii_case(&repo.full_name()))
    {
        bail!("{} is already tracked", repo.full_name());
    }
    engine.store.insert_repository(repo.clone()).await?;
    println!("Tracking {} as {}", repo.full_name(), repo.id);
    Ok(())
}

async fn list_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let repos = engine.store.list_repositories().await?;
    emit(render::render_repositories(&repos, output_mode(matches)))
}

async fn remove_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let repo = engine.resolve(repo_key(matches)?).await?;
    engine.store.delete_repository(repo.id).await?;
    println!("Removed {}", repo.full_name());
    Ok(())
}

/// Handler for analyze command
async fn analyze_handler(
    engine: &Engine,
    matches: &ArgMatches,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let repo = engine.resolve(repo_key(matches)?).await?;
    let options = AnalyzeOptions {
        force_reanalysis: matches.get_flag("force"),
        clear_existing_data: matches.get_flag("clear"),
    };

    let report = engine
        .synchronizer()?
        .analyze_repository(repo.id, options, cancel)
        .await
        .with_context(|| format!("analysis of {} failed", repo.full_name()))?;

    emit(render::render_report(&repo, &report, output_mode(matches)))
}

async fn snapshots_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let repo = engine.resolve(repo_key(matches)?).await?;
    let snapshots = engine.store.list_snapshots(repo.id).await?;
    emit(render::render_snapshots(&snapshots, output_mode(matches)))
}

async fn failures_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let repo_id = match matches.get_one::<String>("repo") {
        Some(key) => Some(engine.resolve(key).await?.id),
        None => None,
    };
    let ops = engine.store.list_failures(repo_id).await?;
    emit(render::render_failures(
        &ops,
        &engine.config.retry,
        Utc::now(),
        output_mode(matches),
    ))
}

async fn retry_handler(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    let summary = engine.scheduler()?.run_once(Utc::now()).await?;
    emit(render::render_retry_summary(&summary, output_mode(matches)))
}

async fn watch_handler(engine: &Engine, cancel: &CancellationToken) -> anyhow::Result<()> {
    let scheduler = Arc::new(engine.scheduler()?);
    info!(
        poll_interval_secs = engine.config.retry.poll_interval.as_secs(),
        "Watching failed operations"
    );
    eprintln!("Retrying failed operations in the background, Ctrl-C to stop");
    scheduler.spawn(cancel.clone()).await?;
    Ok(())
}

fn repo_key(matches: &ArgMatches) -> anyhow::Result<&str> {
    matches
        .get_one::<String>("repo")
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("missing repository"))
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let engine = Engine::open(&matches).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match matches.subcommand() {
        Some(("add", sub)) => add_handler(&engine, sub).await,
        Some(("list", sub)) => list_handler(&engine, sub).await,
        Some(("remove", sub)) => remove_handler(&engine, sub).await,
        Some(("analyze", sub)) => analyze_handler(&engine, sub, &cancel).await,
        Some(("snapshots", sub)) => snapshots_handler(&engine, sub).await,
        Some(("failures", sub)) => failures_handler(&engine, sub).await,
        Some(("retry", sub)) => retry_handler(&engine, sub).await,
        Some(("watch", _)) => watch_handler(&engine, &cancel).await,
        _ => unreachable!("subcommand_required is set"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = build_command().get_matches();
    init_logging(matches.get_count("verbose"));

    match run(matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        build_command().debug_assert();
    }

    #[test]
    fn test_owner_and_name_from_urls() {
        assert_eq!(
            owner_and_name("https://github.com/rust-lang/log.git"),
            Some(("rust-lang".to_string(), "log".to_string()))
        );
        assert_eq!(
            owner_and_name("https://gitlab.com/group/sub/project/"),
            Some(("sub".to_string(), "project".to_string()))
        );
        assert_eq!(
            owner_and_name("/srv/git/tools"),
            Some(("git".to_string(), "tools".to_string()))
        );
        assert_eq!(
            owner_and_name("tools"),
            Some(("local".to_string(), "tools".to_string()))
        );
        assert_eq!(
            owner_and_name("git@github.com:acme/widgets.git"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
        assert_eq!(owner_and_name("/"), None);
    }

    #[test]
    fn test_analyze_flags() {
        let matches = build_command()
            .try_get_matches_from(["loctrail", "analyze", "acme/widgets", "--force", "--clear"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "analyze");
        assert!(sub.get_flag("force"));
        assert!(sub.get_flag("clear"));
        assert_eq!(sub.get_one::<String>("repo").unwrap(), "acme/widgets");
    }

    #[test]
    fn test_output_modes() {
        let mode = |args: &[&str]| {
            let matches = build_command().try_get_matches_from(args).unwrap();
            output_mode(matches.subcommand().unwrap().1)
        };
        assert!(matches!(mode(&["loctrail", "list"]), OutputMode::Auto));
        assert!(matches!(mode(&["loctrail", "list", "-o", "json"]), OutputMode::Json));
        assert!(matches!(mode(&["loctrail", "retry", "--output", "text"]), OutputMode::Text));
        assert!(build_command()
            .try_get_matches_from(["loctrail", "list", "--output", "table"])
            .is_err());
    }
}
