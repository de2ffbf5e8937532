//! CLI mode for shellcache: drives the worker lifecycle from the command line
//! against an on-disk store.

mod progress;

use std::path::PathBuf;
use std::time::Instant;

use indicatif::{HumanBytes, HumanDuration};

use crate::{
    AppConfig, Command, DiskStorage, Error, HttpFetcher, Lifecycle, Manifest, Request, Resolution,
    ServiceWorker, WorkerState,
};

use progress::{BarProgress, print_message, print_status, print_sync, print_upgrade};

/// What the CLI was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Fetch the core shell, then activate unless `skip_waiting` is off.
    Install,
    /// Activate the current manifest.
    Activate,
    /// Resolve one URL as an intercepted request.
    Resolve(String),
    /// Fetch every declared resource that is not cached.
    Sync,
    /// Print what is stored.
    Status,
    /// Deliver a command on the message channel.
    Message(Command),
    /// Run the HTTP host.
    Serve,
    /// Print usage.
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: CliCommand,
    pub config: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub origin: Option<String>,
    pub store: Option<PathBuf>,
}

fn usage_error(msg: impl Into<String>) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.into()))
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns an error for unknown flags, missing flag values or a missing
/// subcommand argument.
pub fn parse_args(args: &[String]) -> crate::Result<CliArgs> {
    let mut config = None;
    let mut manifest = None;
    let mut origin = None;
    let mut store = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i).cloned().ok_or_else(|| usage_error(format!("{flag} requires a value")))
        };
        match flag {
            "-c" | "--config" => config = Some(PathBuf::from(value()?)),
            "-m" | "--manifest" => manifest = Some(PathBuf::from(value()?)),
            "-o" | "--origin" => origin = Some(value()?),
            "-s" | "--store" => store = Some(PathBuf::from(value()?)),
            "-h" | "--help" => positional.insert(0, "help".to_string()),
            f if f.starts_with('-') => return Err(usage_error(format!("unknown option: {f}"))),
            _ => positional.push(flag.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("help") => CliCommand::Help,
        Some("install") => CliCommand::Install,
        Some("activate") => CliCommand::Activate,
        Some("sync") => CliCommand::Sync,
        Some("status") => CliCommand::Status,
        Some("serve") => CliCommand::Serve,
        Some("resolve") => CliCommand::Resolve(
            positional
                .next()
                .ok_or_else(|| usage_error("resolve requires a URL"))?,
        ),
        Some("message") => CliCommand::Message(
            positional
                .next()
                .ok_or_else(|| usage_error("message requires a command"))?
                .parse()?,
        ),
        Some(other) => return Err(usage_error(format!("unknown command: {other}"))),
    };

    Ok(CliArgs {
        command,
        config,
        manifest,
        origin,
        store,
    })
}

/// Loads configuration and applies command-line overrides.
fn load_config(args: &CliArgs) -> crate::Result<AppConfig> {
    let path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&path)?;
    if let Some(manifest) = &args.manifest {
        config.paths.manifest.clone_from(manifest);
    }
    if let Some(origin) = &args.origin {
        config.cache.origin.clone_from(origin);
    }
    if let Some(store) = &args.store {
        config.paths.store_dir.clone_from(store);
    }
    Ok(config)
}

/// Runs one CLI command.
///
/// # Errors
///
/// Returns an error if configuration, the manifest or the store cannot be
/// loaded, or the command itself fails.
pub async fn run(args: CliArgs) -> crate::Result<()> {
    let config = load_config(&args)?;

    let manifest = Manifest::load(&config.paths.manifest).await?;
    log::info!(
        "Loaded manifest with {} resource(s) from {}",
        manifest.len(),
        config.paths.manifest.display()
    );
    let storage = DiskStorage::new(config.paths.store_dir.clone());
    let fetcher = HttpFetcher::from_config(&config.fetch)?;
    let mut worker = ServiceWorker::new(storage, fetcher, manifest, &config.cache)?;
    let state = worker.restore().await?;

    match args.command {
        CliCommand::Help => {}
        CliCommand::Install => {
            println!("Installing core shell from {}...", config.cache.origin);
            worker.install().await?;
            match worker.state() {
                WorkerState::Activated => println!("Installed and activated."),
                _ => println!("Installed; run `shellcache message skipWaiting` to activate."),
            }
        }
        CliCommand::Activate => print_upgrade(&worker.activate().await?),
        CliCommand::Resolve(url) => {
            let before = worker.manager().stats().snapshot();
            match worker.fetch(&Request::get(&url)).await? {
                Resolution::Respond(response) => {
                    let source = if worker.manager().stats().snapshot().cache_hits > before.cache_hits {
                        "cache"
                    } else {
                        "network"
                    };
                    println!(
                        "{} {} {} from {source}",
                        response.status,
                        response.content_type.as_deref().unwrap_or("-"),
                        HumanBytes(response.body.len() as u64)
                    );
                }
                Resolution::Declined if state == WorkerState::Activated => {
                    println!("Not handled: {url} is not declared in the manifest");
                }
                Resolution::Declined => println!("Not handled: worker is not activated"),
            }
        }
        CliCommand::Sync => {
            let start = Instant::now();
            let progress = BarProgress::new();
            let result = worker.manager().sync_all(&progress).await;
            progress.finish();
            print_sync(&result?);
            println!("Done in {}", HumanDuration(start.elapsed()));
        }
        CliCommand::Status => {
            let status = worker.manager().status().await?;
            print_status(state, &status, &worker.manager().stats().snapshot());
        }
        CliCommand::Message(command) => print_message(&worker.message(command).await?),
        CliCommand::Serve => serve(worker, &config).await?,
    }
    Ok(())
}

/// Brings a worker up to the state a long-running host serves from.
///
/// A failed activation still leaves the worker activated with empty caches,
/// so it is logged and the host keeps serving from the network. Install
/// failures are returned.
#[cfg(feature = "server")]
async fn prepare<S, F>(worker: &mut ServiceWorker<S, F>, skip_waiting: bool) -> crate::Result<()>
where
    S: crate::CacheStorage,
    F: crate::Fetcher,
{
    let result = match worker.state() {
        WorkerState::Parsed | WorkerState::Redundant => worker.install().await,
        WorkerState::Installed if skip_waiting => worker.activate().await.map(drop),
        WorkerState::Installed | WorkerState::Activated => Ok(()),
    };
    match result {
        Err(e @ Error::UpgradeFailed(_)) if worker.state() == WorkerState::Activated => {
            log::error!("Activation failed, serving from the network only: {e}");
            Ok(())
        }
        other => other,
    }
}

#[cfg(feature = "server")]
async fn serve(mut worker: ServiceWorker<DiskStorage, HttpFetcher>, config: &AppConfig) -> crate::Result<()> {
    prepare(&mut worker, config.cache.skip_waiting).await?;
    let worker = std::sync::Arc::new(tokio::sync::RwLock::new(worker));
    crate::server::run_server(worker, &config.server.host, config.server.port).await
}

#[cfg(not(feature = "server"))]
async fn serve(_worker: ServiceWorker<DiskStorage, HttpFetcher>, _config: &AppConfig) -> crate::Result<()> {
    Err(usage_error("HTTP host support not compiled in"))
}
