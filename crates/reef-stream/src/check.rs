//! Inline body integrity checking.
//!
//! A [`CheckStream`] wraps a chunked body and is pulled one chunk at a
//! time. It maintains the running MD5 and byte count, aborts the stream
//! if the source goes idle for longer than the configured timeout, and
//! refuses to pass more than `max_bytes` through.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reef_common::{Error, Result};
use std::time::Duration;

/// Digest and size of a fully consumed stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckSummary {
    /// Base64 MD5 of every byte that passed through
    pub md5_base64: String,
    /// Total bytes that passed through
    pub bytes: u64,
}

/// A pass-through integrity checker over a chunk stream
pub struct CheckStream<S> {
    inner: S,
    context: md5::Context,
    seen: u64,
    max_bytes: u64,
    idle_timeout: Duration,
}

impl<S> CheckStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    /// Wrap `inner`, allowing at most `max_bytes` through and at most
    /// `idle_timeout` between chunks.
    pub fn new(inner: S, max_bytes: u64, idle_timeout: Duration) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            seen: 0,
            max_bytes,
            idle_timeout,
        }
    }

    /// Pull the next chunk, or `None` at end of stream.
    ///
    /// Returns `UploadTimeout` if the source produced nothing within the
    /// idle window and `MaxContentLengthExceeded` if the chunk would push
    /// the byte count past the limit. Either error poisons the stream;
    /// the caller must abort the request.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let item = tokio::time::timeout(self.idle_timeout, self.inner.next())
            .await
            .map_err(|_| Error::UploadTimeout)?;

        match item {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(chunk)) => {
                let new_total = self.seen + chunk.len() as u64;
                if new_total > self.max_bytes {
                    return Err(Error::MaxContentLengthExceeded {
                        max_bytes: self.max_bytes,
                    });
                }
                self.seen = new_total;
                self.context.consume(&chunk);
                Ok(Some(chunk))
            }
        }
    }

    /// Bytes seen so far
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.seen
    }

    /// Finalize the digest after the stream has ended
    #[must_use]
    pub fn finish(self) -> CheckSummary {
        let digest = self.context.compute();
        CheckSummary {
            md5_base64: BASE64.encode(digest.0),
            bytes: self.seen,
        }
    }
}
