//! Response values and their storage encoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A response returned by a fetch or served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

/// Metadata stored in front of the body of every cache entry.
#[derive(Serialize, Deserialize)]
struct EntryHeader {
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

impl Response {
    /// Creates a `200 OK` response with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::with_status(200, body)
    }

    /// Creates a response with an explicit status.
    #[must_use]
    pub fn with_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Encodes the response for storage.
    ///
    /// Layout: big-endian `u32` header length, JSON header, raw body.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be serialized.
    pub fn encode(&self) -> Result<Bytes> {
        let header = serde_json::to_vec(&EntryHeader {
            status: self.status,
            content_type: self.content_type.clone(),
        })?;
        let header_len =
            u32::try_from(header.len()).map_err(|_| Error::Io(std::io::Error::other("entry header too large")))?;

        let mut buf = BytesMut::with_capacity(4 + header.len() + self.body.len());
        buf.put_u32(header_len);
        buf.put_slice(&header);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Decodes a stored entry. `key` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] if the bytes were not produced by
    /// [`encode`](Self::encode).
    pub fn decode(key: &str, bytes: &Bytes) -> Result<Self> {
        let corrupt = || Error::CorruptEntry {
            key: key.to_string(),
        };

        let len_bytes: [u8; 4] = bytes.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(corrupt)?;
        let header_len = u32::from_be_bytes(len_bytes) as usize;
        let body_start = header_len.checked_add(4).ok_or_else(corrupt)?;
        let header_bytes = bytes.get(4..body_start).ok_or_else(corrupt)?;
        let header: EntryHeader = serde_json::from_slice(header_bytes).map_err(|_| corrupt())?;

        Ok(Self {
            status: header.status,
            content_type: header.content_type,
            body: bytes.slice(body_start..),
        })
    }
}
