//! In-memory backend
//!
//! Mainly useful for tests and dry runs: nothing is persisted. Objects are
//! kept in a sorted map so listings page in key order like S3.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use jiff::Timestamp;

use crate::client::{BackendClient, ByteStream, ListPage, ObjectDescriptor, ObjectSink};
use crate::error::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 1000;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: Timestamp,
}

impl StoredObject {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            last_modified: Timestamp::now(),
        }
    }

    fn descriptor(&self, key: &str) -> ObjectDescriptor {
        let mut hasher = DefaultHasher::new();
        self.data.hash(&mut hasher);
        ObjectDescriptor {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: Some(format!("{:016x}", hasher.finish())),
            last_modified: Some(self.last_modified),
        }
    }
}

/// Number of calls made against a [`MemoryClient`], per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub stat: usize,
    pub read: usize,
    pub write: usize,
    pub delete: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.list + self.stat + self.read + self.write + self.delete
    }
}

#[derive(Debug, Default)]
struct Counters {
    list: AtomicUsize,
    stat: AtomicUsize,
    read: AtomicUsize,
    write: AtomicUsize,
    delete: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    counters: Counters,
}

impl Shared {
    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map-backed client; clones share the same objects
#[derive(Debug, Clone)]
pub struct MemoryClient {
    shared: Arc<Shared>,
    page_size: usize,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store an object directly, bypassing the sink
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.shared
            .write_objects()
            .insert(key.into(), StoredObject::new(data.into()));
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.shared.read_objects().get(key).map(|o| o.data.clone())
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.shared.read_objects().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.read_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.shared.counters;
        CallCounts {
            list: c.list.load(Ordering::SeqCst),
            stat: c.stat.load(Ordering::SeqCst),
            read: c.read.load(Ordering::SeqCst),
            write: c.write.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl BackendClient for MemoryClient {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        self.shared.counters.list.fetch_add(1, Ordering::SeqCst);

        let objects = self.shared.read_objects();
        let lower = match &continuation_token {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut matching = objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        let page: Vec<ObjectDescriptor> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| object.descriptor(key))
            .collect();

        let next_token = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectDescriptor>> {
        self.shared.counters.stat.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.read_objects().get(key).map(|o| o.descriptor(key)))
    }

    async fn open_read(&self, key: &str, offset: u64) -> Result<ByteStream> {
        self.shared.counters.read.fetch_add(1, Ordering::SeqCst);

        let data = self
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let rest = data.slice(start..);

        let chunks: Vec<Result<Bytes>> = (0..rest.len())
            .step_by(READ_CHUNK)
            .map(|at| Ok(rest.slice(at..(at + READ_CHUNK).min(rest.len()))))
            .collect();

        Ok(stream::iter(chunks).boxed())
    }

    async fn open_write(&self, key: &str, offset: u64) -> Result<Box<dyn ObjectSink>> {
        self.shared.counters.write.fetch_add(1, Ordering::SeqCst);

        let mut buffer = Vec::new();
        if offset > 0 {
            let existing = self.get(key).unwrap_or_default();
            if (existing.len() as u64) < offset {
                return Err(Error::Integrity(format!(
                    "cannot resume {key} at byte {offset}: only {} bytes present",
                    existing.len()
                )));
            }
            buffer.extend_from_slice(&existing[..offset as usize]);
        }

        Ok(Box::new(MemorySink {
            shared: self.shared.clone(),
            key: key.to_string(),
            buffer,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.shared.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.shared
            .write_objects()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }
}

/// Buffers the object and stores it on `finish`
///
/// `abort` stores what was written so far, the same way a partial local file
/// stays on disk.
struct MemorySink {
    shared: Arc<Shared>,
    key: String,
    buffer: Vec<u8>,
}

impl MemorySink {
    fn commit(self) -> u64 {
        let len = self.buffer.len() as u64;
        self.shared
            .write_objects()
            .insert(self.key, StoredObject::new(Bytes::from(self.buffer)));
        len
    }
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        Ok(self.commit())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.commit();
        Ok(())
    }
}
