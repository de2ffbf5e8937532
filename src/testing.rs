//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Request};
use crate::key::Origin;
use crate::response::Response;
use crate::store::{CacheStorage, MemoryStorage};

pub fn origin() -> Origin {
    Origin::parse("https://app.test").unwrap()
}

/// A mock network: serves registered URLs, answers 404 otherwise, and
/// fails every request while offline.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<Request>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, response: Response) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.requests.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("offline: {}", request.url)));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Response::with_status(404, "not found")))
    }
}

/// Memory storage whose writes to selected caches fail.
#[derive(Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    /// Cache name -> puts still allowed before every further put fails.
    failing: Mutex<HashMap<String, usize>>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts_to(&self, cache: &str) {
        self.fail_puts_after(cache, 0);
    }

    pub fn fail_puts_after(&self, cache: &str, allowed: usize) {
        self.failing.lock().unwrap().insert(cache.to_string(), allowed);
    }
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn get(&self, cache: &str, key: &str) -> io::Result<Option<Bytes>> {
        self.inner.get(cache, key).await
    }

    async fn put(&self, cache: &str, key: &str, value: Bytes) -> io::Result<()> {
        if let Some(allowed) = self.failing.lock().unwrap().get_mut(cache) {
            if *allowed == 0 {
                return Err(io::Error::other("disk full"));
            }
            *allowed -= 1;
        }
        self.inner.put(cache, key, value).await
    }

    async fn delete(&self, cache: &str, key: &str) -> io::Result<bool> {
        self.inner.delete(cache, key).await
    }

    async fn keys(&self, cache: &str) -> io::Result<Vec<String>> {
        self.inner.keys(cache).await
    }

    async fn drop_cache(&self, cache: &str) -> io::Result<bool> {
        self.inner.drop_cache(cache).await
    }
}
