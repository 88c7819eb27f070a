//! Write fan-out: one client body to N storage nodes.
//!
//! Candidate sets come from the chooser; the first set whose members all
//! answer a readiness probe wins. Each member gets its own channel-backed
//! PUT, the client body is teed to every channel through the check
//! stream, and a barrier waits for the client EOF plus every node's
//! response. Metadata is only committed by the caller after the barrier
//! proves every replica holds the same bytes the gateway digested.

use crate::pipeline::AppState;
use bytes::Bytes;
use futures::Stream;
use reef_client::body_path;
use reef_common::{Error, ObjectId, Result, Shark, StorageLayoutVersion};
use reef_stream::{CheckStream, CheckSummary};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything `parse_write_args` resolved for a create
pub struct WritePlan {
    pub object_id: ObjectId,
    pub name_hash: String,
    /// Declared body size; `None` for chunked uploads
    pub content_length: Option<u64>,
    /// Hard cap on bytes accepted through the check stream
    pub max_bytes: u64,
    pub durability: usize,
    /// Client-supplied `Content-MD5`, already syntax-checked
    pub client_md5: Option<String>,
}

/// A completed fan-out write
#[derive(Debug)]
pub struct WriteResult {
    pub summary: CheckSummary,
    pub sharks: Vec<Shark>,
}

/// Stream `body` to `durability` storage nodes and verify every replica
/// received exactly the bytes the gateway saw.
pub async fn write_object_body<S>(
    state: &AppState,
    owner: &Uuid,
    plan: &WritePlan,
    body: S,
) -> Result<WriteResult>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let size_hint = plan.content_length.unwrap_or(plan.max_bytes);
    let candidate_sets = state.chooser.choose(plan.durability, size_hint).await?;

    // Stage start_shark_streams: commit to the first fully-reachable
    // candidate set.
    let mut selected = None;
    for (index, set) in candidate_sets.into_iter().enumerate() {
        let probes = futures::future::join_all(set.iter().map(|s| state.sharks.ping(s))).await;
        if probes.iter().all(std::result::Result::is_ok) {
            selected = Some(set);
            break;
        }
        debug!(candidate_set = index, "candidate set had unreachable members");
    }
    let sharks = selected.ok_or(Error::SharksExhausted {
        copies: plan.durability,
    })?;

    let path = body_path(
        StorageLayoutVersion::CURRENT,
        owner,
        &plan.object_id,
        &plan.name_hash,
    );

    let mut senders = Vec::with_capacity(sharks.len());
    let mut handles = Vec::with_capacity(sharks.len());
    for shark in &sharks {
        let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(8);
        let node_body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
        let client = state.sharks.clone();
        let shark = shark.clone();
        let path = path.clone();
        let md5 = plan.client_md5.clone();
        let len = plan.content_length;
        handles.push(tokio::spawn(async move {
            client
                .put_body(&shark, &path, len, md5.as_deref(), node_body)
                .await
        }));
        senders.push(tx);
    }

    // Stage shark_streams: tee the client body through the check stream.
    let mut check = CheckStream::new(
        body,
        plan.max_bytes,
        state.config.limits.upload_idle_timeout(),
    );
    let client_side: Result<()> = loop {
        match check.next_chunk().await {
            Err(e) => break Err(e),
            Ok(None) => break Ok(()),
            Ok(Some(chunk)) => {
                state.metrics.add_inbound_bytes(chunk.len() as u64);
                let mut lost_a_node = false;
                for tx in &senders {
                    if tx.send(Ok(chunk.clone())).await.is_err() {
                        lost_a_node = true;
                    }
                }
                if lost_a_node {
                    // A node already answered (an error); stop feeding
                    // and let the barrier surface its response.
                    break Ok(());
                }
            }
        }
    };
    // Close every node stream: EOF on success, truncation on error.
    drop(senders);

    if let Err(e) = client_side {
        warn!(error = %e, "client body failed mid-upload; aborting replicas");
        for handle in &handles {
            handle.abort();
        }
        return Err(e);
    }

    // The barrier: every node must respond before anything is committed.
    let mut node_md5s = Vec::with_capacity(handles.len());
    let mut node_error: Option<Error> = None;
    for outcome in futures::future::join_all(handles).await {
        match outcome {
            Ok(Ok(put)) => node_md5s.push(put.md5_base64),
            Ok(Err(e)) => {
                let replace = node_error
                    .as_ref()
                    .map(|held| error_rank(&e) < error_rank(held))
                    .unwrap_or(true);
                if replace {
                    node_error = Some(e);
                }
            }
            Err(join) => {
                if node_error.is_none() {
                    node_error = Some(Error::internal(format!("replica task failed: {join}")));
                }
            }
        }
    }
    if let Some(e) = node_error {
        return Err(e);
    }

    let summary = check.finish();
    if let Some(declared) = plan.content_length {
        if summary.bytes != declared {
            // The client stopped short of its declared length.
            return Err(Error::UploadAbandoned);
        }
    }
    if let Some(client_md5) = &plan.client_md5 {
        if client_md5 != &summary.md5_base64 {
            return Err(Error::ChecksumMismatch {
                expected: client_md5.clone(),
                computed: summary.md5_base64,
            });
        }
    }
    for reported in node_md5s.into_iter().flatten() {
        if reported != summary.md5_base64 {
            // The node acknowledged different bytes than we digested;
            // committing metadata now would record a lie.
            return Err(Error::internal(format!(
                "storage node digest {reported} disagrees with gateway digest {}",
                summary.md5_base64
            )));
        }
    }

    Ok(WriteResult { summary, sharks })
}

// Lower rank is more specific, and wins when several nodes fail.
fn error_rank(error: &Error) -> u8 {
    match error {
        Error::ChecksumMismatch { .. } => 0,
        Error::InvalidContentMd5(_) => 1,
        Error::NotEnoughSpace => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rank_prefers_checksum() {
        let checksum = Error::ChecksumMismatch {
            expected: "a".to_string(),
            computed: "b".to_string(),
        };
        let internal = Error::internal("x");
        assert!(error_rank(&checksum) < error_rank(&internal));
        assert!(error_rank(&Error::InvalidContentMd5("x".to_string())) < error_rank(&internal));
        assert!(error_rank(&Error::NotEnoughSpace) < error_rank(&internal));
    }
}
