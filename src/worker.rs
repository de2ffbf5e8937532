//! Lifecycle dispatch.
//!
//! A host drives the cache through four signals: install, activate, fetch
//! and message. [`ServiceWorker`] maps each one onto the [`CacheManager`]
//! and tracks where in its lifecycle it is.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Request};
use crate::manager::{CacheManager, NoProgress, Resolution};
use crate::manifest::Manifest;
use crate::stats::{SyncReport, UpgradeReport};
use crate::store::CacheStorage;

/// Commands accepted on the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate a pending install immediately.
    SkipWaiting,
    /// Fetch every declared resource that is not cached yet.
    DownloadOffline,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "skipWaiting" | "skip-waiting" => Ok(Self::SkipWaiting),
            "downloadOffline" | "download-offline" => Ok(Self::DownloadOffline),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SkipWaiting => "skipWaiting",
            Self::DownloadOffline => "downloadOffline",
        })
    }
}

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created; install has not run.
    Parsed,
    /// Core shell is in the holding area; waiting to activate.
    Installed,
    /// Activation ran; the worker intercepts requests.
    Activated,
    /// Install failed; the worker will never activate.
    Redundant,
}

/// What a message produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// The pending install was activated.
    Activated(UpgradeReport),
    /// Nothing was waiting to activate.
    NothingPending,
    /// A sync ran.
    Synced(SyncReport),
}

/// One method per lifecycle signal a host delivers.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Install phase.
    async fn install(&mut self) -> Result<()>;

    /// Activate phase.
    async fn activate(&mut self) -> Result<UpgradeReport>;

    /// An intercepted read request.
    async fn fetch(&self, request: &Request) -> Result<Resolution>;

    /// An out-of-band command.
    async fn message(&mut self, command: Command) -> Result<MessageOutcome>;
}

/// A cache manager bound to one manifest version and its lifecycle.
pub struct ServiceWorker<S: CacheStorage, F: Fetcher> {
    manager: CacheManager<S, F>,
    version: Manifest,
    core_shell: Vec<String>,
    skip_waiting: bool,
    state: WorkerState,
}

impl<S: CacheStorage, F: Fetcher> ServiceWorker<S, F> {
    /// Creates a worker for `version` from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured origin is invalid.
    pub fn new(storage: S, fetcher: F, version: Manifest, config: &CacheConfig) -> Result<Self> {
        let manager = CacheManager::new(storage, fetcher, config.origin()?, version.clone())
            .with_names(config.names.clone());
        Ok(Self {
            manager,
            version,
            core_shell: config.core_shell.clone(),
            skip_waiting: config.skip_waiting,
            state: WorkerState::Parsed,
        })
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Derives the lifecycle state from what is already in storage, for
    /// hosts that restart between signals.
    ///
    /// Pending holding-area entries mean an install is waiting; a stored
    /// manifest equal to this version means it was already activated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn restore(&mut self) -> Result<WorkerState> {
        let status = self.manager.status().await?;
        self.state = if status.pending > 0 {
            WorkerState::Installed
        } else if self.manager.stored_manifest().await?.as_ref() == Some(&self.version) {
            WorkerState::Activated
        } else {
            WorkerState::Parsed
        };
        log::debug!("Restored worker state: {:?}", self.state);
        Ok(self.state)
    }

    /// Returns the underlying manager.
    #[must_use]
    pub const fn manager(&self) -> &CacheManager<S, F> {
        &self.manager
    }
}

#[async_trait]
impl<S: CacheStorage, F: Fetcher> Lifecycle for ServiceWorker<S, F> {
    async fn install(&mut self) -> Result<()> {
        if let Err(e) = self.manager.initialize(&self.core_shell).await {
            log::error!("Install failed: {e}");
            self.state = WorkerState::Redundant;
            return Err(e);
        }
        self.state = WorkerState::Installed;

        if self.skip_waiting {
            self.activate().await?;
        } else {
            log::info!("Installed; waiting for skipWaiting");
        }
        Ok(())
    }

    async fn activate(&mut self) -> Result<UpgradeReport> {
        // A failed upgrade has already dropped every cache. The worker still
        // activates so requests keep reaching the network.
        let result = self.manager.upgrade(self.version.clone()).await;
        self.state = WorkerState::Activated;
        result
    }

    async fn fetch(&self, request: &Request) -> Result<Resolution> {
        if self.state != WorkerState::Activated {
            return Ok(Resolution::Declined);
        }
        self.manager.resolve(request).await
    }

    async fn message(&mut self, command: Command) -> Result<MessageOutcome> {
        log::info!("Received message: {command}");
        match command {
            Command::SkipWaiting if self.state == WorkerState::Installed => {
                Ok(MessageOutcome::Activated(self.activate().await?))
            }
            Command::SkipWaiting => Ok(MessageOutcome::NothingPending),
            Command::DownloadOffline => Ok(MessageOutcome::Synced(self.manager.sync_all(&NoProgress).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use crate::store::MemoryStorage;
    use crate::testing::{MockFetcher, origin};

    fn config(skip_waiting: bool) -> CacheConfig {
        CacheConfig::new()
            .with_origin("https://app.test")
            .with_core_shell(["index.html", "main.dart.js"])
            .with_skip_waiting(skip_waiting)
    }

    fn version() -> Manifest {
        Manifest::new()
            .with("/", "r")
            .with("index.html", "i")
            .with("main.dart.js", "m")
            .with("logo.png", "l")
    }

    fn worker(skip_waiting: bool) -> ServiceWorker<MemoryStorage, MockFetcher> {
        let fetcher = MockFetcher::new();
        for key in version().keys() {
            fetcher.serve(&origin().resource_url(key), Response::ok(key.to_string()));
        }
        ServiceWorker::new(MemoryStorage::new(), fetcher, version(), &config(skip_waiting)).unwrap()
    }

    #[test]
    fn command_parsing() {
        assert_eq!("skipWaiting".parse::<Command>().unwrap(), Command::SkipWaiting);
        assert_eq!("download-offline".parse::<Command>().unwrap(), Command::DownloadOffline);
        assert!(matches!("reboot".parse::<Command>(), Err(Error::UnknownCommand(c)) if c == "reboot"));
        assert_eq!(Command::DownloadOffline.to_string(), "downloadOffline");
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let result = ServiceWorker::new(
            MemoryStorage::new(),
            MockFetcher::new(),
            version(),
            &CacheConfig::new().with_origin("nope"),
        );
        assert!(matches!(result, Err(Error::InvalidOrigin(_))));
    }

    #[tokio::test]
    async fn install_with_skip_waiting_activates() {
        let mut w = worker(true);
        w.install().await.unwrap();
        assert_eq!(w.state(), WorkerState::Activated);

        let status = w.manager().status().await.unwrap();
        assert_eq!(status.cached, 2);
        assert!(status.has_stored_manifest);
    }

    #[tokio::test]
    async fn install_without_skip_waiting_waits_for_message() {
        let mut w = worker(false);
        w.install().await.unwrap();
        assert_eq!(w.state(), WorkerState::Installed);

        let request = Request::get("https://app.test/logo.png");
        assert_eq!(w.fetch(&request).await.unwrap(), Resolution::Declined);

        let outcome = w.message(Command::SkipWaiting).await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Activated(ref r) if r.first_install && r.promoted == 2));
        assert_eq!(w.state(), WorkerState::Activated);

        assert_eq!(w.message(Command::SkipWaiting).await.unwrap(), MessageOutcome::NothingPending);
        assert!(matches!(w.fetch(&request).await.unwrap(), Resolution::Respond(_)));
    }

    #[tokio::test]
    async fn restore_reads_state_from_storage() {
        let mut first = worker(false);
        first.install().await.unwrap();

        // Share the installed storage with a fresh worker of the same version.
        let storage = MemoryStorage::new();
        for key in first.manager().storage().keys("app-temp-cache").await.unwrap() {
            let value = first.manager().storage().get("app-temp-cache", &key).await.unwrap().unwrap();
            storage.put("app-temp-cache", &key, value).await.unwrap();
        }
        let mut second = ServiceWorker::new(storage, MockFetcher::new(), version(), &config(false)).unwrap();
        assert_eq!(second.restore().await.unwrap(), WorkerState::Installed);

        second.message(Command::SkipWaiting).await.unwrap();
        assert_eq!(second.restore().await.unwrap(), WorkerState::Activated);

        let mut other_version = ServiceWorker::new(
            MemoryStorage::new(),
            MockFetcher::new(),
            version().with("new.js", "n"),
            &config(false),
        )
        .unwrap();
        assert_eq!(other_version.restore().await.unwrap(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn failed_install_is_redundant() {
        let mut w = worker(true);
        w.manager().fetcher().set_offline(true);

        assert!(w.install().await.is_err());
        assert_eq!(w.state(), WorkerState::Redundant);
        assert_eq!(w.message(Command::SkipWaiting).await.unwrap(), MessageOutcome::NothingPending);
    }

    #[tokio::test]
    async fn download_offline_message_syncs() {
        let mut w = worker(true);
        w.install().await.unwrap();

        let outcome = w.message(Command::DownloadOffline).await.unwrap();
        let MessageOutcome::Synced(report) = outcome else {
            panic!("expected sync, got {outcome:?}");
        };
        assert_eq!(report.fetched, 2);
        assert!(w.manager().status().await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn activated_worker_serves_offline() {
        let mut w = worker(true);
        w.install().await.unwrap();
        w.message(Command::DownloadOffline).await.unwrap();
        w.manager().fetcher().set_offline(true);

        for url in ["https://app.test/", "https://app.test/main.dart.js", "https://app.test/logo.png"] {
            let resolution = w.fetch(&Request::get(url)).await.unwrap();
            assert!(matches!(resolution, Resolution::Respond(r) if r.is_success()), "{url}");
        }
    }

    #[tokio::test]
    async fn new_version_keeps_unchanged_resources() {
        let storage = MemoryStorage::new();
        let mut v1 = worker(true);
        v1.install().await.unwrap();
        v1.message(Command::DownloadOffline).await.unwrap();

        // Move v1's caches into a fresh storage shared with v2.
        for cache in ["app-cache", "app-manifest"] {
            for key in v1.manager().storage().keys(cache).await.unwrap() {
                let value = v1.manager().storage().get(cache, &key).await.unwrap().unwrap();
                storage.put(cache, &key, value).await.unwrap();
            }
        }

        let v2_manifest = version().with("main.dart.js", "m2");
        let fetcher = MockFetcher::new();
        fetcher.serve(&origin().resource_url("index.html"), Response::ok("index-v2"));
        fetcher.serve(&origin().resource_url("main.dart.js"), Response::ok("main-v2"));
        let mut v2 = ServiceWorker::new(storage, fetcher, v2_manifest, &config(true)).unwrap();

        v2.install().await.unwrap();
        let status = v2.manager().status().await.unwrap();
        // "/" and logo.png survived; index.html and main.dart.js came from install.
        assert!(status.is_complete());

        v2.manager().fetcher().set_offline(true);
        let logo = v2.fetch(&Request::get("https://app.test/logo.png")).await.unwrap();
        assert_eq!(logo.into_response().unwrap().body, "logo.png");
        let main = v2.fetch(&Request::get("https://app.test/main.dart.js")).await.unwrap();
        assert_eq!(main.into_response().unwrap().body, "main-v2");
    }
}
