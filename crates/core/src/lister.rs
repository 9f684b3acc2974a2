//! Paginated object enumeration
//!
//! [`ObjectLister`] pulls one page at a time through an explicit
//! [`ListCursor`]. A failed fetch leaves the cursor where it was, so the
//! caller can retry the same page; [`ObjectLister::reset`] starts over.
//! Objects come out in the backend's order and are never re-sorted.

use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};

use crate::client::{BackendClient, ListPage, ObjectDescriptor};
use crate::error::{Error, Result};
use crate::locator::Locator;

/// Enumeration state between page fetches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCursor {
    prefix: String,
    continuation_token: Option<String>,
    pages_fetched: u64,
    exhausted: bool,
}

impl ListCursor {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Lazy listing of the objects a locator covers
pub struct ObjectLister {
    client: Arc<dyn BackendClient>,
    locator: Locator,
    cursor: ListCursor,
}

impl ObjectLister {
    pub fn new(client: Arc<dyn BackendClient>, locator: Locator) -> Self {
        let cursor = ListCursor::new(locator.path());
        Self {
            client,
            locator,
            cursor,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    /// Rewind to the first page
    pub fn reset(&mut self) {
        self.cursor = ListCursor::new(self.locator.path());
    }

    /// Fetch the page under the cursor without moving it
    ///
    /// Returns `None` once the listing is exhausted.
    pub async fn fetch_page(&self) -> Result<Option<ListPage>> {
        if self.cursor.exhausted {
            return Ok(None);
        }

        tracing::trace!(
            prefix = %self.cursor.prefix,
            page = self.cursor.pages_fetched + 1,
            "Fetching listing page"
        );

        let page = self
            .client
            .list_page(&self.cursor.prefix, self.cursor.continuation_token.clone())
            .await?;
        Ok(Some(page))
    }

    /// Move the cursor past `page`, returning the objects it contributes
    pub fn advance(&mut self, page: ListPage) -> Vec<ObjectDescriptor> {
        self.cursor.pages_fetched += 1;
        self.cursor.exhausted = page.next_token.is_none();
        self.cursor.continuation_token = page.next_token;

        page.objects
            .into_iter()
            .filter(|object| self.covers(object))
            .collect()
    }

    /// Fetch and consume the next page
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectDescriptor>>> {
        match self.fetch_page().await? {
            Some(page) => Ok(Some(self.advance(page))),
            None => Ok(None),
        }
    }

    /// All remaining objects as a stream, one page fetch at a time
    pub fn into_stream(self) -> impl Stream<Item = Result<ObjectDescriptor>> {
        stream::try_unfold(self, |mut lister| async move {
            Ok::<_, Error>(lister.next_page().await?.map(|page| (page, lister)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
    }

    fn covers(&self, object: &ObjectDescriptor) -> bool {
        if self.locator.is_prefix() {
            // Zero-byte "dir/" markers are not objects to copy
            !object.key.ends_with('/') && object.key.starts_with(self.locator.path())
        } else {
            object.key == self.locator.path()
        }
    }
}
