//! Named key-value cache storage.
//!
//! The manager never touches persistent state directly. It goes through a
//! [`CacheStorage`], which holds any number of named caches, each a flat map
//! of string keys to byte blobs.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Suffix of entry files that have not been renamed into place yet.
const TMP_SUFFIX: &str = ".tmp";

/// Longest encoded key used directly as a file name. Longer keys are stored
/// under a digest so names stay below `NAME_MAX` (255) with room for the
/// temp suffix.
const MAX_PLAIN_NAME: usize = 200;

/// Marks digest-named entry files. Not part of the URL-safe base64 alphabet.
const HASHED_PREFIX: char = '~';

/// Abstraction over the persistent store holding caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Reads an entry.
    async fn get(&self, cache: &str, key: &str) -> io::Result<Option<Bytes>>;

    /// Writes an entry, replacing any previous value. Creates the cache if
    /// it does not exist yet.
    async fn put(&self, cache: &str, key: &str, value: Bytes) -> io::Result<()>;

    /// Removes an entry. Returns whether it existed.
    async fn delete(&self, cache: &str, key: &str) -> io::Result<bool>;

    /// Lists the keys of a cache. A missing cache has no keys.
    async fn keys(&self, cache: &str) -> io::Result<Vec<String>>;

    /// Removes a whole cache. Returns whether it existed.
    async fn drop_cache(&self, cache: &str) -> io::Result<bool>;

    /// Opens a handle bound to one named cache.
    fn open<'a>(&'a self, name: &'a str) -> Cache<'a, Self>
    where
        Self: Sized,
    {
        Cache { storage: self, name }
    }
}

/// A handle to one named cache inside a [`CacheStorage`].
pub struct Cache<'a, S: ?Sized> {
    storage: &'a S,
    name: &'a str,
}

impl<S: CacheStorage + ?Sized> Cache<'_, S> {
    /// Returns the cache name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, key: &str) -> io::Result<Option<Bytes>> {
        self.storage.get(self.name, key).await
    }

    /// Writes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn put(&self, key: &str, value: Bytes) -> io::Result<()> {
        self.storage.put(self.name, key, value).await
    }

    /// Removes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn delete(&self, key: &str) -> io::Result<bool> {
        self.storage.delete(self.name, key).await
    }

    /// Lists the keys of this cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn keys(&self) -> io::Result<Vec<String>> {
        self.storage.keys(self.name).await
    }
}

/// In-memory storage. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    caches: Mutex<HashMap<String, BTreeMap<String, Bytes>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_caches<T>(&self, f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Bytes>>) -> T) -> T {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut caches)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn get(&self, cache: &str, key: &str) -> io::Result<Option<Bytes>> {
        Ok(self.with_caches(|c| c.get(cache).and_then(|entries| entries.get(key).cloned())))
    }

    async fn put(&self, cache: &str, key: &str, value: Bytes) -> io::Result<()> {
        self.with_caches(|c| {
            c.entry(cache.to_string()).or_default().insert(key.to_string(), value);
        });
        Ok(())
    }

    async fn delete(&self, cache: &str, key: &str) -> io::Result<bool> {
        Ok(self.with_caches(|c| c.get_mut(cache).is_some_and(|entries| entries.remove(key).is_some())))
    }

    async fn keys(&self, cache: &str) -> io::Result<Vec<String>> {
        Ok(self.with_caches(|c| c.get(cache).map(|entries| entries.keys().cloned().collect()).unwrap_or_default()))
    }

    async fn drop_cache(&self, cache: &str) -> io::Result<bool> {
        Ok(self.with_caches(|c| c.remove(cache).is_some()))
    }
}

/// On-disk storage using `tokio::fs`.
///
/// Each cache is a directory under the root; each entry is a file whose name
/// is the URL-safe base64 encoding of its key. Keys too long for that are
/// stored in a file named `~` + base64(SHA-256(key)) whose contents start
/// with the length-prefixed key. Writes go to a temporary file that is
/// renamed into place.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> io::Result<PathBuf> {
        if cache.is_empty() || cache.starts_with('.') || cache.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache name: {cache:?}"),
            ));
        }
        Ok(self.root.join(cache))
    }

    fn entry_file(&self, cache: &str, key: &str) -> io::Result<EntryFile> {
        let dir = self.cache_dir(cache)?;
        let name = URL_SAFE_NO_PAD.encode(key);
        if name.len() <= MAX_PLAIN_NAME {
            return Ok(EntryFile::Plain(dir.join(name)));
        }
        let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()));
        Ok(EntryFile::Hashed(dir.join(format!("{HASHED_PREFIX}{digest}"))))
    }
}

/// Where an entry lives and how its contents are laid out.
enum EntryFile {
    /// Contents are the value.
    Plain(PathBuf),
    /// Contents are `u32` BE key length, key, value.
    Hashed(PathBuf),
}

impl EntryFile {
    fn path(&self) -> &Path {
        match self {
            Self::Plain(path) | Self::Hashed(path) => path,
        }
    }
}

/// Splits a digest-named file into its stored key and value.
fn split_hashed(data: Bytes) -> io::Result<(String, Bytes)> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "truncated hashed cache entry");
    let prefix: [u8; 4] = data.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(invalid)?;
    let end = 4 + u32::from_be_bytes(prefix) as usize;
    let key = data.get(4..end).ok_or_else(invalid)?;
    let key = String::from_utf8(key.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok((key, data.slice(end..)))
}

/// Maps `NotFound` to `Ok(false)`.
fn existed(result: io::Result<()>) -> io::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn get(&self, cache: &str, key: &str) -> io::Result<Option<Bytes>> {
        let entry = self.entry_file(cache, key)?;
        let data = match tokio::fs::read(entry.path()).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match entry {
            EntryFile::Plain(_) => Ok(Some(data)),
            EntryFile::Hashed(_) => {
                let (stored, value) = split_hashed(data)?;
                // Digest collision: the file belongs to another key.
                Ok((stored == key).then_some(value))
            }
        }
    }

    async fn put(&self, cache: &str, key: &str, value: Bytes) -> io::Result<()> {
        tokio::fs::create_dir_all(self.cache_dir(cache)?).await?;
        let entry = self.entry_file(cache, key)?;
        let contents = match entry {
            EntryFile::Plain(_) => value,
            EntryFile::Hashed(_) => {
                let len = u32::try_from(key.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "cache key too long"))?;
                let mut buf = Vec::with_capacity(4 + key.len() + value.len());
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(key.as_bytes());
                buf.extend_from_slice(&value);
                Bytes::from(buf)
            }
        };

        let path = entry.path();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        tokio::fs::write(&tmp, &contents).await?;
        tokio::fs::rename(&tmp, path).await
    }

    async fn delete(&self, cache: &str, key: &str) -> io::Result<bool> {
        let entry = self.entry_file(cache, key)?;
        if matches!(entry, EntryFile::Hashed(_)) && self.get(cache, key).await?.is_none() {
            return Ok(false);
        }
        existed(tokio::fs::remove_file(entry.path()).await)
    }

    async fn keys(&self, cache: &str) -> io::Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(self.cache_dir(cache)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            if name.starts_with(HASHED_PREFIX) {
                let data = Bytes::from(tokio::fs::read(entry.path()).await?);
                match split_hashed(data) {
                    Ok((key, _)) => keys.push(key),
                    Err(e) => log::warn!("Ignoring unreadable entry in cache {cache}: {name}: {e}"),
                }
                continue;
            }
            match URL_SAFE_NO_PAD.decode(name).map(String::from_utf8) {
                Ok(Ok(key)) => keys.push(key),
                _ => log::warn!("Ignoring foreign file in cache {cache}: {name}"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn drop_cache(&self, cache: &str) -> io::Result<bool> {
        existed(tokio::fs::remove_dir_all(self.cache_dir(cache)?).await)
    }
}
