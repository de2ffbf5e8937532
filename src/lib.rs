//! shellcache - an offline cache for web application shells.
//!
//! Keeps a local copy of an application's resources consistent with a
//! content-hash manifest produced by its build step. Resources are served
//! cache-first, the root document network-first, and a new manifest only
//! evicts the entries whose fingerprint changed.
//!
//! Storage and network access are injected through [`CacheStorage`] and
//! [`Fetcher`], so the whole lifecycle can run against in-memory doubles.
//!
//! # Example
//!
//! ```no_run
//! use shellcache::{
//!     CacheConfig, DiskStorage, HttpFetcher, Lifecycle, Manifest, Request, Resolution,
//!     ServiceWorker,
//! };
//!
//! # async fn example() -> shellcache::Result<()> {
//! let config = CacheConfig::new().with_origin("https://app.example");
//! let manifest = Manifest::load("build/web/manifest.json".as_ref()).await?;
//! let fetcher = HttpFetcher::new(reqwest::Client::new());
//!
//! let mut worker = ServiceWorker::new(DiskStorage::new("cache"), fetcher, manifest, &config)?;
//! worker.install().await?;
//!
//! match worker.fetch(&Request::get("https://app.example/main.dart.js")).await? {
//!     Resolution::Respond(response) => println!("{} bytes", response.body.len()),
//!     Resolution::Declined => println!("not handled"),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod key;
pub mod manager;
pub mod manifest;
pub mod response;
pub mod stats;
pub mod store;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub mod server;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{AppConfig, CacheConfig, CacheNames, FetchConfig, PathConfig, ServerConfig};
pub use error::{Error, Result};
pub use fetch::{CacheMode, Fetcher, HttpFetcher, Request};
pub use key::Origin;
pub use manager::{CacheManager, CacheStatus, NoProgress, Resolution, SyncProgress};
pub use manifest::{Manifest, ROOT_KEY};
pub use response::Response;
pub use stats::{ResolveSnapshot, ResolveStats, SyncReport, UpgradeReport};
pub use store::{Cache, CacheStorage, DiskStorage, MemoryStorage};
pub use worker::{Command, Lifecycle, MessageOutcome, ServiceWorker, WorkerState};
