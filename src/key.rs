//! Origin handling and request URL normalization.

use std::fmt;

use crate::error::{Error, Result};
use crate::manifest::ROOT_KEY;

/// Suffix the build step appends to cache-busted requests.
const VERSION_QUERY: &str = "?v=";

/// The origin that resource keys are relative to, e.g. `https://app.example`.
///
/// Always serialized without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin(String);

impl Origin {
    /// Parses an origin from any absolute http(s) URL, discarding path,
    /// query and fragment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] if `url` is not an absolute http(s) URL.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url).map_err(|_| Error::InvalidOrigin(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidOrigin(url.to_string()));
        }
        Ok(Self(parsed.origin().ascii_serialization()))
    }

    /// Returns the serialized origin.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the absolute URL for a resource key.
    #[must_use]
    pub fn resource_url(&self, key: &str) -> String {
        if key == ROOT_KEY {
            format!("{}/", self.0)
        } else {
            format!("{}/{key}", self.0)
        }
    }

    /// Maps an intercepted request URL to its resource key.
    ///
    /// Strips the `?v=` version suffix. The bare origin, fragment-only
    /// navigations (`origin/#...`) and the empty path all map to
    /// [`ROOT_KEY`]. Returns `None` for URLs outside this origin.
    #[must_use]
    pub fn request_key(&self, url: &str) -> Option<String> {
        if url == self.0 {
            return Some(ROOT_KEY.to_string());
        }
        let rest = url.strip_prefix(self.0.as_str())?.strip_prefix('/')?;
        if rest.starts_with('#') {
            return Some(ROOT_KEY.to_string());
        }
        let key = rest.split(VERSION_QUERY).next().unwrap_or_default();
        if key.is_empty() {
            Some(ROOT_KEY.to_string())
        } else {
            Some(key.to_string())
        }
    }

    /// Maps a stored cache key (a request URL) back to its resource key.
    ///
    /// Unlike [`request_key`](Self::request_key) the query string is kept,
    /// so a cache-busted entry never matches a manifest key.
    #[must_use]
    pub fn cache_key(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(self.0.as_str())?;
        if rest.is_empty() {
            return Some(ROOT_KEY.to_string());
        }
        let key = rest.strip_prefix('/')?;
        if key.is_empty() {
            Some(ROOT_KEY.to_string())
        } else {
            Some(key.to_string())
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
