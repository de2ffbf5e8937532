//! The offline resource cache manager.
//!
//! Three caches live in the injected [`CacheStorage`]:
//!
//! - the live content cache, keyed by request URL, that requests are served
//!   from;
//! - a temporary holding area that install fills with the core shell;
//! - a manifest cache holding the JSON of the last activated manifest, which
//!   the next upgrade diffs against.

use std::collections::HashSet;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};

use crate::config::CacheNames;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Request};
use crate::key::Origin;
use crate::manifest::{Manifest, ROOT_KEY};
use crate::response::Response;
use crate::stats::{ResolveStats, SyncReport, UpgradeReport};
use crate::store::CacheStorage;

/// Key of the single entry in the manifest cache.
const MANIFEST_ENTRY: &str = "manifest";

/// Decision for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The manager answers the request with this response.
    Respond(Response),
    /// The manager does not handle the request; the host serves it.
    Declined,
}

impl Resolution {
    /// Returns the response if the request was handled.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Respond(response) => Some(response),
            Self::Declined => None,
        }
    }
}

/// Trait for receiving sync progress updates.
///
/// All methods have default no-op implementations.
pub trait SyncProgress: Send + Sync {
    /// Called once with the number of resources that will be fetched.
    fn on_sync_start(&self, _missing: usize) {}

    /// Called before a resource is fetched.
    fn on_fetch_start(&self, _key: &str) {}

    /// Called after a resource was fetched successfully.
    fn on_fetched(&self, _key: &str, _bytes: u64) {}

    /// Called when a resource could not be fetched. The sync stops here.
    fn on_error(&self, _key: &str, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// Summary of what is currently stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatus {
    /// Resources declared by the active manifest.
    pub declared: usize,
    /// Declared resources present in the live cache.
    pub cached: usize,
    /// Entries waiting in the holding area.
    pub pending: usize,
    /// Total body bytes of cached declared resources.
    pub cached_bytes: u64,
    /// Whether a previously activated manifest is stored.
    pub has_stored_manifest: bool,
}

impl CacheStatus {
    /// Returns true if every declared resource is available offline.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.cached == self.declared
    }
}

/// Keeps a local cache consistent with a manifest and resolves requests
/// against it.
pub struct CacheManager<S: CacheStorage, F: Fetcher> {
    storage: S,
    fetcher: F,
    origin: Origin,
    manifest: Manifest,
    names: CacheNames,
    stats: ResolveStats,
}

impl<S: CacheStorage, F: Fetcher> CacheManager<S, F> {
    /// Creates a manager for `manifest` with the default cache names.
    #[must_use]
    pub fn new(storage: S, fetcher: F, origin: Origin, manifest: Manifest) -> Self {
        Self {
            storage,
            fetcher,
            origin,
            manifest,
            names: CacheNames::default(),
            stats: ResolveStats::new(),
        }
    }

    /// Overrides the cache names.
    #[must_use]
    pub fn with_names(mut self, names: CacheNames) -> Self {
        self.names = names;
        self
    }

    /// Returns the active manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the origin resource keys are relative to.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Returns the underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the underlying fetcher.
    #[must_use]
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Returns the resolve counters.
    #[must_use]
    pub const fn stats(&self) -> &ResolveStats {
        &self.stats
    }

    /// Fetches every core shell key, bypassing HTTP caches, into the
    /// holding area.
    ///
    /// Nothing is written unless every fetch succeeds with a 2xx status.
    /// Returns the number of entries stored.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or store failure.
    pub async fn initialize<K: AsRef<str>>(&self, core_shell: &[K]) -> Result<usize> {
        let fetched: Vec<(String, Response)> = stream::iter(core_shell)
            .then(|key| async move {
                let url = self.origin.resource_url(key.as_ref());
                let response = self.fetcher.fetch(&Request::get(url.clone()).reload()).await?;
                if !response.is_success() {
                    return Err(Error::FetchStatus {
                        url,
                        status: response.status,
                    });
                }
                Ok::<_, Error>((url, response))
            })
            .try_collect()
            .await?;

        if let Err(e) = self.hold(&fetched).await {
            // A partial holding area would be promoted by the next activate.
            if let Err(drop_err) = self.storage.drop_cache(&self.names.temp).await {
                log::error!("Failed to discard partial holding area: {drop_err}");
            }
            return Err(e);
        }
        log::info!("Installed {} core shell resource(s)", fetched.len());
        Ok(fetched.len())
    }

    async fn hold(&self, fetched: &[(String, Response)]) -> Result<()> {
        let temp = self.storage.open(&self.names.temp);
        for (url, response) in fetched {
            temp.put(url, response.encode()?).await?;
        }
        Ok(())
    }

    /// Activates `new_manifest`: evicts entries whose fingerprint changed,
    /// promotes the holding area and records the manifest for the next
    /// upgrade.
    ///
    /// # Errors
    ///
    /// Any failure drops the live cache, the holding area and the stored
    /// manifest, and is returned as [`Error::UpgradeFailed`].
    pub async fn upgrade(&mut self, new_manifest: Manifest) -> Result<UpgradeReport> {
        self.manifest = new_manifest;
        match self.reconcile().await {
            Ok(report) => {
                log::info!(
                    "Upgrade complete: {} retained, {} evicted, {} promoted{}",
                    report.retained,
                    report.evicted,
                    report.promoted,
                    if report.first_install { " (first install)" } else { "" }
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Failed to upgrade cache: {e}");
                self.invalidate().await;
                Err(Error::UpgradeFailed(Box::new(e)))
            }
        }
    }

    async fn reconcile(&self) -> Result<UpgradeReport> {
        let content = self.storage.open(&self.names.content);
        let manifests = self.storage.open(&self.names.manifest);

        let mut report = UpgradeReport::default();
        match manifests.get(MANIFEST_ENTRY).await? {
            None => {
                self.storage.drop_cache(&self.names.content).await?;
                report.first_install = true;
            }
            Some(stored) => {
                let previous = Manifest::from_json(&stored)?;
                for url in content.keys().await? {
                    let unchanged = self
                        .origin
                        .cache_key(&url)
                        .is_some_and(|key| self.manifest.unchanged_since(&previous, &key));
                    if unchanged {
                        report.retained += 1;
                    } else {
                        log::debug!("Evicting {url}");
                        content.delete(&url).await?;
                        report.evicted += 1;
                    }
                }
            }
        }

        report.promoted = self.promote().await?;
        manifests
            .put(MANIFEST_ENTRY, Bytes::from(self.manifest.to_json()?))
            .await?;
        Ok(report)
    }

    /// Moves every holding-area entry into the live cache, then drops the
    /// holding area.
    async fn promote(&self) -> Result<usize> {
        let temp = self.storage.open(&self.names.temp);
        let content = self.storage.open(&self.names.content);

        let mut promoted = 0;
        for url in temp.keys().await? {
            if let Some(entry) = temp.get(&url).await? {
                content.put(&url, entry).await?;
                promoted += 1;
            }
        }
        self.storage.drop_cache(&self.names.temp).await?;
        Ok(promoted)
    }

    /// Drops all three caches. Failures are logged; there is nothing left
    /// to fall back to.
    async fn invalidate(&self) {
        for name in [&self.names.content, &self.names.temp, &self.names.manifest] {
            if let Err(e) = self.storage.drop_cache(name).await {
                log::error!("Failed to drop cache {name}: {e}");
            }
        }
    }

    /// Decides how to answer an intercepted request.
    ///
    /// Non-`GET` requests, requests outside the origin and resources the
    /// manifest does not declare are declined. The root document is
    /// fetched network-first; everything else is served cache-first.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when neither the network nor the cache can
    /// answer.
    pub async fn resolve(&self, request: &Request) -> Result<Resolution> {
        let key = request
            .is_get()
            .then(|| self.origin.request_key(&request.url))
            .flatten()
            .filter(|key| self.manifest.contains(key));

        let Some(key) = key else {
            self.stats.record_declined();
            return Ok(Resolution::Declined);
        };

        let response = if key == ROOT_KEY {
            self.network_first(request).await?
        } else {
            self.cache_first(request).await?
        };
        Ok(Resolution::Respond(response))
    }

    async fn network_first(&self, request: &Request) -> Result<Response> {
        self.stats.record_fetch();
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&request.url, &response).await;
                }
                Ok(response)
            }
            Err(e) => match self.lookup(&request.url).await {
                Ok(Some(cached)) => {
                    log::warn!("Network unavailable for {}, serving cached copy: {e}", request.url);
                    self.stats.record_fallback();
                    Ok(cached)
                }
                Ok(None) => Err(e),
                Err(lookup_err) => {
                    log::warn!("Cached copy of {} unreadable: {lookup_err}", request.url);
                    Err(e)
                }
            },
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        match self.lookup(&request.url).await {
            Ok(Some(cached)) => {
                log::debug!("Cache hit: {}", request.url);
                self.stats.record_hit();
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Refetching unreadable cache entry {}: {e}", request.url),
        }

        self.stats.record_fetch();
        let response = self.fetcher.fetch(request).await?;
        if response.is_success() {
            self.store(&request.url, &response).await;
        }
        Ok(response)
    }

    async fn lookup(&self, url: &str) -> Result<Option<Response>> {
        let content = self.storage.open(&self.names.content);
        content
            .get(url)
            .await?
            .map(|bytes| Response::decode(url, &bytes))
            .transpose()
    }

    /// Writes a response into the live cache. A failed write leaves the
    /// previous entry in place and does not fail the request.
    async fn store(&self, url: &str, response: &Response) {
        let content = self.storage.open(&self.names.content);
        let result = match response.encode() {
            Ok(encoded) => content.put(url, encoded).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.stats.record_store(),
            Err(e) => log::warn!("Failed to cache {url}: {e}"),
        }
    }

    /// Fetches and stores every declared resource not yet in the live cache.
    ///
    /// The batch is all-or-nothing: every fetch must succeed with a 2xx
    /// status before anything is written.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or store failure.
    pub async fn sync_all(&self, progress: &dyn SyncProgress) -> Result<SyncReport> {
        let cached = self.cached_keys().await?;
        let missing: Vec<&str> = self
            .manifest
            .keys()
            .filter(|key| !cached.contains(*key))
            .collect();

        progress.on_sync_start(missing.len());
        let fetched: Vec<(String, Response)> = stream::iter(missing)
            .then(|key| async move {
                progress.on_fetch_start(key);
                let url = self.origin.resource_url(key);
                let result = match self.fetcher.fetch(&Request::get(url.clone())).await {
                    Ok(response) if response.is_success() => Ok(response),
                    Ok(response) => Err(Error::FetchStatus {
                        url: url.clone(),
                        status: response.status,
                    }),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(response) => {
                        progress.on_fetched(key, response.body.len() as u64);
                        Ok((url, response))
                    }
                    Err(e) => {
                        progress.on_error(key, &e.to_string());
                        Err(e)
                    }
                }
            })
            .try_collect()
            .await?;

        let content = self.storage.open(&self.names.content);
        let mut report = SyncReport {
            already_cached: self.manifest.len() - fetched.len(),
            ..SyncReport::default()
        };
        for (url, response) in &fetched {
            content.put(url, response.encode()?).await?;
            report.fetched += 1;
            report.total_bytes += response.body.len() as u64;
        }
        log::info!("Synced {} resource(s), {} already cached", report.fetched, report.already_cached);
        Ok(report)
    }

    /// Resource keys of everything in the live cache.
    async fn cached_keys(&self) -> Result<HashSet<String>> {
        let content = self.storage.open(&self.names.content);
        Ok(content
            .keys()
            .await?
            .iter()
            .filter_map(|url| self.origin.cache_key(url))
            .collect())
    }

    /// Reads the manifest recorded by the last successful upgrade.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the entry is not a
    /// manifest.
    pub async fn stored_manifest(&self) -> Result<Option<Manifest>> {
        self.storage
            .open(&self.names.manifest)
            .get(MANIFEST_ENTRY)
            .await?
            .map(|bytes| Manifest::from_json(&bytes))
            .transpose()
    }

    /// Summarizes the stored caches against the active manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn status(&self) -> Result<CacheStatus> {
        let content = self.storage.open(&self.names.content);
        let mut status = CacheStatus {
            declared: self.manifest.len(),
            pending: self.storage.open(&self.names.temp).keys().await?.len(),
            has_stored_manifest: self
                .storage
                .open(&self.names.manifest)
                .get(MANIFEST_ENTRY)
                .await?
                .is_some(),
            ..CacheStatus::default()
        };

        let mut seen = HashSet::new();
        for url in content.keys().await? {
            let Some(key) = self.origin.cache_key(&url) else { continue };
            if !self.manifest.contains(&key) || !seen.insert(key) {
                continue;
            }
            status.cached += 1;
            if let Some(entry) = content.get(&url).await? {
                status.cached_bytes += Response::decode(&url, &entry).map_or(0, |r| r.body.len() as u64);
            }
        }
        Ok(status)
    }
}
