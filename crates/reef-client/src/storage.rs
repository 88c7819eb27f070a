//! Storage node (shark) HTTP client.
//!
//! Object bodies move over plain HTTP: one PUT per replica on write, one
//! GET on read. A single shared agent carries every node; requests are
//! streamed in both directions. Connection-time failures are retried up
//! to the configured budget, but never once a body has started flowing.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reef_common::config::StorageConfig;
use reef_common::{Error, ObjectId, Result, Shark, StorageLayoutVersion};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Path of an object body on a storage node, by layout version.
///
/// v1 fans out on the name hash alone; v2 prefixes with the object id so
/// a node-local path identifies the exact write that produced it, with
/// the name hash kept in the leaf for reverse lookup.
#[must_use]
pub fn body_path(
    layout: StorageLayoutVersion,
    owner: &Uuid,
    object_id: &ObjectId,
    name_hash: &str,
) -> String {
    match layout {
        StorageLayoutVersion::V1 => {
            format!(
                "/v1/{owner}/{}/{}/{name_hash}",
                &name_hash[..2],
                &name_hash[2..4]
            )
        }
        StorageLayoutVersion::V2 => {
            let id = object_id.as_uuid().to_string();
            format!("/v2/{owner}/{}/{id},{name_hash}", &id[..2])
        }
    }
}

/// Result of a successful replica PUT
#[derive(Clone, Debug)]
pub struct SharkPutOutcome {
    /// MD5 the node reports having received, base64
    pub md5_base64: Option<String>,
}

/// A successful replica GET, ready to stream
pub struct SharkGetResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

/// Shared HTTP agent for every storage node. Cloning shares the
/// underlying connection pool.
#[derive(Clone)]
pub struct SharkClient {
    agent: reqwest::Client,
    port: u16,
    probe_timeout: Duration,
    connect_retries: u32,
}

impl SharkClient {
    /// Build the agent from storage configuration
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let agent = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::internal(format!("storage http agent: {e}")))?;
        Ok(Self {
            agent,
            port: config.port,
            probe_timeout: config.probe_timeout(),
            connect_retries: config.connect_retries,
        })
    }

    fn url(&self, shark: &Shark, path: &str) -> String {
        format!("http://{}:{}{path}", shark.storage_id, self.port)
    }

    /// Cheap readiness probe, used before committing a candidate set to
    /// a write. Retries connection-time failures up to the budget.
    pub async fn ping(&self, shark: &Shark) -> Result<()> {
        let url = self.url(shark, "/ping");
        let mut last = String::new();
        for attempt in 0..=self.connect_retries {
            let result = tokio::time::timeout(
                self.probe_timeout,
                self.agent.get(&url).send(),
            )
            .await;
            match result {
                Ok(Ok(response)) if response.status().is_success() => return Ok(()),
                Ok(Ok(response)) => {
                    last = format!("status {}", response.status());
                }
                Ok(Err(e)) => {
                    last = e.to_string();
                }
                Err(_) => {
                    last = "probe timeout".to_string();
                }
            }
            debug!(shark = %shark.storage_id, attempt, error = %last, "shark probe failed");
        }
        Err(Error::ServiceUnavailable(format!(
            "storage node {} unavailable: {last}",
            shark.storage_id
        )))
    }

    /// Stream one replica of an object body to a node.
    ///
    /// `content_md5` is the client-supplied digest, forwarded so the node
    /// can reject a mismatched body with 469 before committing it.
    pub async fn put_body(
        &self,
        shark: &Shark,
        path: &str,
        content_length: Option<u64>,
        content_md5: Option<&str>,
        body: reqwest::Body,
    ) -> Result<SharkPutOutcome> {
        let url = self.url(shark, path);
        let mut request = self
            .agent
            .put(&url)
            .header("Content-Type", "application/octet-stream");
        // Chunked client uploads have no known length; the node sees a
        // chunked body too.
        if let Some(len) = content_length {
            request = request.header("Content-Length", len.to_string());
        }
        if let Some(md5) = content_md5 {
            request = request.header("Content-MD5", md5);
        }

        let response = request.body(body).send().await.map_err(|e| {
            warn!(shark = %shark.storage_id, error = %e, "replica PUT failed");
            Error::internal(format!("replica PUT to {}: {e}", shark.storage_id))
        })?;

        let status = response.status().as_u16();
        let reported_md5 = header_string(response.headers(), "content-md5");
        if response.status().is_success() {
            return Ok(SharkPutOutcome {
                md5_base64: reported_md5,
            });
        }
        Err(classify_put_failure(
            status,
            content_md5,
            reported_md5,
            &shark.storage_id,
        ))
    }

    /// Open one replica of an object body for reading. `range` is the
    /// client's `Range` header, passed through verbatim.
    pub async fn get_body(
        &self,
        shark: &Shark,
        path: &str,
        range: Option<&str>,
    ) -> Result<SharkGetResponse> {
        let url = self.url(shark, path);
        let mut request = self.agent.get(&url);
        if let Some(range) = range {
            request = request.header("Range", range);
        }
        let response = request.send().await.map_err(|e| {
            Error::internal(format!("replica GET from {}: {e}", shark.storage_id))
        })?;

        let status = response.status().as_u16();
        if status == 416 {
            return Err(Error::RangeNotSatisfiable {
                content_range: header_string(response.headers(), "content-range"),
            });
        }
        if !response.status().is_success() {
            return Err(Error::internal(format!(
                "replica GET from {} returned {status}",
                shark.storage_id
            )));
        }

        let content_length = header_string(response.headers(), "content-length")
            .and_then(|v| v.parse().ok());
        let content_range = header_string(response.headers(), "content-range");
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::internal(format!("replica body read: {e}"))))
            .boxed();
        Ok(SharkGetResponse {
            status,
            content_length,
            content_range,
            stream,
        })
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// Status 469 is the storage tier's checksum-rejection code.
fn classify_put_failure(
    status: u16,
    sent_md5: Option<&str>,
    reported_md5: Option<String>,
    storage_id: &str,
) -> Error {
    match status {
        469 => Error::ChecksumMismatch {
            expected: sent_md5.unwrap_or_default().to_string(),
            computed: reported_md5.unwrap_or_default(),
        },
        400 if sent_md5.is_some() => {
            Error::InvalidContentMd5(format!("storage node {storage_id} rejected Content-MD5"))
        }
        507 => Error::NotEnoughSpace,
        _ => Error::internal(format!("replica PUT to {storage_id} returned {status}")),
    }
}
