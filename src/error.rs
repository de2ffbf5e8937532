//! Error types for the shellcache library.

use thiserror::Error;

/// Errors that can occur while managing the offline cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A fetch completed but did not return a successful status.
    #[error("Fetch of {url} failed with status {status}")]
    FetchStatus {
        /// URL that was requested.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// Network failure reported by a non-HTTP fetcher.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O error from the cache store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest JSON could not be parsed or serialized.
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A stored cache entry could not be decoded.
    #[error("Corrupt cache entry: {key}")]
    CorruptEntry {
        /// Cache key of the unreadable entry.
        key: String,
    },

    /// The configured origin is not an absolute http(s) origin.
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// Configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// A request carried a method that is not a valid HTTP token.
    #[error("Invalid request method: {0:?}")]
    InvalidMethod(String),

    /// A message did not name a known command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Upgrade failed; all cache state was dropped.
    #[error("Upgrade failed, cache invalidated: {0}")]
    UpgradeFailed(#[source] Box<Error>),
}

impl Error {
    /// Returns true if this error came from the network rather than from
    /// local state.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Network(_))
    }
}

/// A specialized `Result` type for shellcache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_classification() {
        assert!(Error::Network("offline".into()).is_network());
        assert!(!Error::UnknownCommand("x".into()).is_network());
        assert!(
            !Error::FetchStatus {
                url: "https://app.test/a.js".into(),
                status: 404,
            }
            .is_network()
        );
    }

    #[test]
    fn upgrade_failure_keeps_source() {
        use std::error::Error as _;
        let err = Error::UpgradeFailed(Box::new(Error::Io(std::io::Error::other("disk"))));
        assert!(err.to_string().contains("cache invalidated"));
        assert!(err.source().is_some());
    }
}
