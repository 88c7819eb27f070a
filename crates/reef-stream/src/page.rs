//! Single-vnode paginated record streams.
//!
//! A metadata shard answers listing RPCs one page at a time: at most
//! `limit` records with keys at or after an inclusive marker.
//! [`LimitMarkerStream`] hides the paging: it reopens the next page
//! whenever the previous one came back full, using the successor of the
//! last-seen key as the new marker. Object and bucket names cannot
//! contain NUL, so `key + "\0"` is the exact successor key.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reef_common::{Error, Result};

/// A record with a sortable listing key
pub trait ListRecord {
    /// The key records are ordered by (the bucket or object name)
    fn key(&self) -> &str;
}

impl ListRecord for reef_common::Bucket {
    fn key(&self) -> &str {
        &self.name
    }
}

impl ListRecord for reef_common::BucketObject {
    fn key(&self) -> &str {
        &self.name
    }
}

/// One page worth of records
pub type RecordStream<R> = BoxStream<'static, Result<R>>;

/// Opens one page of records at a time. Implemented over the shard
/// listing RPCs in production and over vectors in tests.
#[async_trait]
pub trait PageSource: Send {
    type Record: ListRecord + Send + 'static;

    /// Open a page of at most `limit` records with `key >= marker`, in
    /// ascending key order.
    async fn open_page(&mut self, marker: &str, limit: u32) -> Result<RecordStream<Self::Record>>;
}

/// The exact successor of `key` in byte-wise order, valid because keys
/// cannot contain NUL
fn successor(key: &str) -> String {
    format!("{key}\0")
}

/// A continuous ordered stream over a paginated source
pub struct LimitMarkerStream<P: PageSource> {
    source: P,
    page_limit: u32,
    /// Inclusive lower bound for the next page open
    marker: String,
    page: Option<RecordStream<P::Record>>,
    /// Records seen on the current page
    page_seen: u32,
    /// Buffered record from `advance_to`
    pending: Option<P::Record>,
    done: bool,
}

impl<P: PageSource> LimitMarkerStream<P> {
    /// Create a stream starting at `initial_marker` (inclusive), reading
    /// `page_limit` records per page.
    pub fn new(source: P, initial_marker: impl Into<String>, page_limit: u32) -> Self {
        Self {
            source,
            page_limit,
            marker: initial_marker.into(),
            page: None,
            page_seen: 0,
            pending: None,
            done: false,
        }
    }

    /// True once the source reported a short page and every record has
    /// been handed out
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done && self.pending.is_none()
    }

    /// The next record, or `None` at end of stream. An error poisons the
    /// stream.
    pub async fn next(&mut self) -> Result<Option<P::Record>> {
        if let Some(record) = self.pending.take() {
            self.marker = successor(record.key());
            return Ok(Some(record));
        }
        match self.pull().await? {
            Some(record) => {
                self.marker = successor(record.key());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Skip forward: discard records with keys below `marker`, buffering
    /// the first record at or past it. Idempotent for a marker at or
    /// behind a previously requested one only while the buffered record
    /// still satisfies it; markers behind the stream's position are
    /// rejected.
    pub async fn advance_to(&mut self, marker: &str) -> Result<()> {
        if let Some(pending) = &self.pending {
            if pending.key() >= marker {
                // Already positioned at or past the target.
                return Ok(());
            }
            self.pending = None;
        } else if marker < self.marker.as_str() {
            return Err(Error::internal(format!(
                "advance_to marker {marker:?} is behind stream marker {:?}",
                self.marker
            )));
        }

        while let Some(record) = self.pull().await? {
            if record.key() >= marker {
                self.pending = Some(record);
                break;
            }
            // Keep the resume marker moving so a page boundary mid-scan
            // reopens past the records already discarded.
            self.marker = successor(record.key());
        }
        self.marker = marker.to_string();
        Ok(())
    }

    /// Pull the next raw record, reopening pages as they fill
    async fn pull(&mut self) -> Result<Option<P::Record>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.page.is_none() {
                self.page = Some(self.source.open_page(&self.marker, self.page_limit).await?);
                self.page_seen = 0;
            }
            match self.page.as_mut().unwrap().next().await {
                Some(Ok(record)) => {
                    self.page_seen += 1;
                    return Ok(Some(record));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => {
                    let was_full = self.page_seen == self.page_limit;
                    self.page = None;
                    if !was_full {
                        // A short page means the shard has nothing more.
                        self.done = true;
                        return Ok(None);
                    }
                    // Full page: reopen from the successor marker.
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    impl ListRecord for String {
        fn key(&self) -> &str {
            self
        }
    }

    /// In-memory page source over a sorted key list
    pub struct VecSource {
        pub keys: Vec<String>,
        pub pages_opened: Arc<AtomicUsize>,
        /// When set, the Nth opened page fails
        pub fail_on_page: Option<usize>,
    }

    impl VecSource {
        pub fn new(keys: &[&str]) -> Self {
            let mut keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            keys.sort();
            Self {
                keys,
                pages_opened: Arc::new(AtomicUsize::new(0)),
                fail_on_page: None,
            }
        }
    }

    #[async_trait]
    impl PageSource for VecSource {
        type Record = String;

        async fn open_page(&mut self, marker: &str, limit: u32) -> Result<RecordStream<String>> {
            let n = self.pages_opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_page == Some(n) {
                return Err(Error::from_upstream("NoDatabasePeers", "shard overloaded"));
            }
            let page: Vec<Result<String>> = self
                .keys
                .iter()
                .filter(|k| k.as_str() >= marker)
                .take(limit as usize)
                .map(|k| Ok(k.clone()))
                .collect();
            Ok(futures::stream::iter(page).boxed())
        }
    }
}
