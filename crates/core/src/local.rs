//! Local filesystem backend

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use jiff::Timestamp;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::client::{BackendClient, ByteStream, ListPage, ObjectDescriptor, ObjectSink};
use crate::error::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Filesystem-backed client
///
/// Keys are paths. With an empty root (the default) a key is used as-is,
/// so local locators map straight onto the filesystem.
#[derive(Debug, Clone)]
pub struct LocalClient {
    root: PathBuf,
    page_size: usize,
    read_chunk: usize,
    dir_reads: Arc<AtomicUsize>,
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClient {
    pub fn new() -> Self {
        Self {
            root: PathBuf::new(),
            page_size: DEFAULT_PAGE_SIZE,
            read_chunk: DEFAULT_READ_CHUNK,
            dir_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Resolve keys below `root` instead of the working directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            PathBuf::from(key)
        } else {
            // Keep keys below the root
            self.root.join(key.trim_start_matches('/'))
        }
    }

    /// Number of directories read by listings so far
    pub fn directories_read(&self) -> usize {
        self.dir_reads.load(Ordering::Relaxed)
    }

    /// Entries of one directory, in key order
    ///
    /// Directories sort as `name/` so a depth-first walk emits keys in the
    /// same order as comparing full key strings. Symlinks to files are
    /// listed; symlinks to directories are not followed.
    async fn read_level(&self, dir: &Path) -> Result<Vec<Entry>> {
        self.dir_reads.fetch_add(1, Ordering::Relaxed);
        let mut entries = Vec::new();
        let mut reader = fs::read_dir(dir).await?;

        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = fs::symlink_metadata(&path).await?;

            let kind = if meta.file_type().is_symlink() {
                match fs::metadata(&path).await {
                    Ok(target) if target.is_file() => EntryKind::File(target),
                    Ok(_) => {
                        tracing::debug!(path = %path.display(), "Not following directory symlink");
                        continue;
                    }
                    // Dangling link
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            } else if meta.is_dir() {
                EntryKind::Dir
            } else if meta.is_file() {
                EntryKind::File(meta)
            } else {
                continue;
            };

            let order = match kind {
                EntryKind::Dir => format!("{name}/"),
                EntryKind::File(_) => name.clone(),
            };
            entries.push(Entry {
                name,
                order,
                path,
                kind,
            });
        }

        entries.sort_by(|a, b| a.order.cmp(&b.order));
        Ok(entries)
    }
}

enum EntryKind {
    File(std::fs::Metadata),
    Dir,
}

struct Entry {
    name: String,
    /// Sort key: the name, with a trailing `/` for directories
    order: String,
    path: PathBuf,
    kind: EntryKind,
}

/// A directory being walked, with its not yet visited entries
struct Level {
    key: String,
    entries: std::vec::IntoIter<Entry>,
}

fn descriptor(key: &str, meta: &std::fs::Metadata) -> ObjectDescriptor {
    ObjectDescriptor {
        key: key.to_string(),
        size: meta.len(),
        etag: None,
        last_modified: meta
            .modified()
            .ok()
            .and_then(|t| Timestamp::try_from(t).ok()),
    }
}

#[async_trait]
impl BackendClient for LocalClient {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let base = self.key_to_path(prefix);
        let meta = match fs::metadata(&base).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ListPage::default()),
            Err(e) => return Err(e.into()),
        };

        // A prefix naming a file lists just that file
        if meta.is_file() {
            let objects = match continuation_token {
                None => vec![descriptor(prefix, &meta)],
                Some(_) => Vec::new(),
            };
            return Ok(ListPage {
                objects,
                next_token: None,
            });
        }

        // The token is the last key of the previous page. The walk skips
        // whole subtrees that sort before it instead of re-reading them.
        let after = continuation_token.as_deref();
        let root_key = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };

        let mut stack = vec![Level {
            key: root_key,
            entries: self.read_level(&base).await?.into_iter(),
        }];
        let mut objects: Vec<ObjectDescriptor> = Vec::new();
        let mut next_token = None;

        while let Some(level) = stack.last_mut() {
            let Some(entry) = level.entries.next() else {
                stack.pop();
                continue;
            };
            let key = format!("{}{}", level.key, entry.name);

            match entry.kind {
                EntryKind::File(meta) => {
                    if after.is_some_and(|t| key.as_str() <= t) {
                        continue;
                    }
                    if objects.len() == self.page_size {
                        next_token = objects.last().map(|o| o.key.clone());
                        break;
                    }
                    objects.push(descriptor(&key, &meta));
                }
                EntryKind::Dir => {
                    let dir_key = format!("{key}/");
                    // Every key below sorts before the token
                    if after.is_some_and(|t| dir_key.as_str() < t && !t.starts_with(&dir_key)) {
                        continue;
                    }
                    let entries = self.read_level(&entry.path).await?;
                    stack.push(Level {
                        key: dir_key,
                        entries: entries.into_iter(),
                    });
                }
            }
        }

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectDescriptor>> {
        match fs::metadata(self.key_to_path(key)).await {
            Ok(meta) if meta.is_file() => Ok(Some(descriptor(key, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_read(&self, key: &str, offset: u64) -> Result<ByteStream> {
        let path = self.key_to_path(key);
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(key.to_string())
            } else {
                Error::Io(e)
            }
        })?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(ReaderStream::with_capacity(file, self.read_chunk)
            .map(|chunk| chunk.map_err(Error::Io))
            .boxed())
    }

    async fn open_write(&self, key: &str, offset: u64) -> Result<Box<dyn ObjectSink>> {
        let path = self.key_to_path(key);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let file = if offset == 0 {
            fs::File::create(&path).await?
        } else {
            let mut file = fs::OpenOptions::new().write(true).open(&path).await?;
            let existing = file.metadata().await?.len();
            if existing < offset {
                return Err(Error::Integrity(format!(
                    "cannot resume {key} at byte {offset}: only {existing} bytes present"
                )));
            }
            file.set_len(offset).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            file
        };

        Ok(Box::new(LocalSink {
            file,
            path,
            written: offset,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        fs::remove_file(self.key_to_path(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(key.to_string())
            } else {
                Error::Io(e)
            }
        })
    }
}

/// Writes straight into the destination file
///
/// An aborted sink leaves the partial file in place so a later attempt can
/// resume from its length.
struct LocalSink {
    file: fs::File,
    path: PathBuf,
    written: u64,
}

#[async_trait]
impl ObjectSink for LocalSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tracing::trace!(path = %self.path.display(), bytes = self.written, "Local write finished");
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = self.written,
            "Local write aborted, partial file kept"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn put(client: &LocalClient, key: &str, data: &'static [u8]) {
        let mut sink = client.open_write(key, 0).await.unwrap();
        sink.write(Bytes::from_static(data)).await.unwrap();
        sink.finish().await.unwrap();
    }

    async fn get(client: &LocalClient, key: &str, offset: u64) -> Vec<u8> {
        let chunks: Vec<Bytes> = client
            .open_read(key, offset)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path());

        put(&client, "a/b/c.txt", b"hello world").await;
        assert_eq!(get(&client, "a/b/c.txt", 0).await, b"hello world");
        assert_eq!(get(&client, "a/b/c.txt", 6).await, b"world");

        let stat = client.stat("a/b/c.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 11);
        assert!(stat.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path());

        assert!(client.stat("nope").await.unwrap().is_none());
        assert!(matches!(
            client.open_read("nope", 0).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(client.delete("nope").await, Err(Error::NotFound(_))));

        let page = client.list_page("missing/", None).await.unwrap();
        assert!(page.objects.is_empty());
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn test_paginated_listing() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path()).page_size(2);

        for key in ["d/3", "d/1", "d/sub/2", "other/x"] {
            put(&client, key, b"x").await;
        }

        let first = client.list_page("d/", None).await.unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["d/1", "d/3"]);
        let token = first.next_token.clone();
        assert!(token.is_some());

        let second = client.list_page("d/", token).await.unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["d/sub/2"]);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_pages_resume_without_rewalking() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path()).page_size(1);
        for i in 0..10 {
            put(&client, &format!("d/s{i}/f"), b"x").await;
        }

        let mut keys = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = client.list_page("d/", token).await.unwrap();
            pages += 1;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        let expected: Vec<String> = (0..10).map(|i| format!("d/s{i}/f")).collect();
        assert_eq!(keys, expected);
        assert_eq!(pages, 10);
        // A full re-walk per page would read all 11 directories every time
        assert!(
            client.directories_read() <= 4 * pages,
            "read {} directories",
            client.directories_read()
        );
    }

    #[tokio::test]
    async fn test_key_order_matches_string_order() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path());
        for key in ["p/a/b", "p/a-c", "p/a.d"] {
            put(&client, key, b"x").await;
        }

        let page = client.list_page("p/", None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["p/a-c", "p/a.d", "p/a/b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_symlink_cycle_is_not_followed() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path());
        put(&client, "d/f.txt", b"data").await;
        std::os::unix::fs::symlink(dir.path().join("d"), dir.path().join("d/loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("d/f.txt"), dir.path().join("d/link.txt"))
            .unwrap();

        let page = client.list_page("d/", None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["d/f.txt", "d/link.txt"]);
        assert_eq!(page.objects[1].size, 4);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn test_resume_write() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new().with_root(dir.path());

        let mut sink = client.open_write("r.bin", 0).await.unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        sink.abort().await.unwrap();

        let mut sink = client.open_write("r.bin", 3).await.unwrap();
        sink.write(Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(sink.finish().await.unwrap(), 6);

        assert_eq!(get(&client, "r.bin", 0).await, b"abcdef");

        // Cannot resume past what is on disk
        assert!(matches!(
            client.open_write("r.bin", 100).await,
            Err(Error::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_absolute_keys_without_root() {
        let dir = TempDir::new().unwrap();
        let client = LocalClient::new();
        let key = dir.path().join("f.txt").to_string_lossy().into_owned();

        put(&client, &key, b"data").await;
        let prefix = format!("{}/", dir.path().display());
        let page = client.list_page(&prefix, None).await.unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, key);

        client.delete(&key).await.unwrap();
        assert!(client.stat(&key).await.unwrap().is_none());
    }
}
