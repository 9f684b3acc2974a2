//! Backend client contract
//!
//! Every backend is reached through the same narrow interface. Backend
//! differences the planner cares about live in the capability registry, not
//! in this trait. A client is bound to one bucket (or filesystem root) when it
//! is constructed, so keys here are bucket-relative.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::Serialize;

use crate::error::Result;

/// Stream of object bytes, in order
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Metadata about one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    /// ETag or content checksum, opaque
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Whether `other` has the same content as far as metadata can tell
    pub fn same_content(&self, other: &ObjectDescriptor) -> bool {
        self.size == other.size
            && match (&self.etag, &other.etag) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Destination for one object's bytes
///
/// Writers must call either [`finish`](ObjectSink::finish) or
/// [`abort`](ObjectSink::abort); dropping a sink leaves the destination in a
/// backend-defined state.
#[async_trait]
pub trait ObjectSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Commit the object, returning the total bytes it now holds
    async fn finish(self: Box<Self>) -> Result<u64>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Operations a storage backend exposes to the planner and executor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetch one page of objects whose keys start with `prefix`
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    /// Metadata for `key`, or `None` if it does not exist
    async fn stat(&self, key: &str) -> Result<Option<ObjectDescriptor>>;

    /// Stream the object's bytes starting at `offset`
    ///
    /// Backends without ranged reads only accept `offset == 0`.
    async fn open_read(&self, key: &str, offset: u64) -> Result<ByteStream>;

    /// Open a sink for `key`, continuing after `offset` bytes already written
    ///
    /// Backends without resumable writes only accept `offset == 0`.
    async fn open_write(&self, key: &str, offset: u64) -> Result<Box<dyn ObjectSink>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
