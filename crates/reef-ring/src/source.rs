//! Placement-data sources.

use crate::snapshot::{RingDocument, RingSnapshot};
use async_trait::async_trait;
use reef_common::{Error, Result};
use std::time::Duration;

/// Supplier of ring snapshots. The production implementation talks to the
/// placement-data service; tests substitute in-memory sources.
#[async_trait]
pub trait PlacementSource: Send + Sync {
    async fn fetch(&self) -> Result<RingSnapshot>;
}

/// Fetches the placement document over HTTP as JSON
pub struct HttpPlacementSource {
    url: String,
    client: reqwest::Client,
}

impl HttpPlacementSource {
    /// Create a source reading from `url`
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::internal(format!("placement http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl PlacementSource for HttpPlacementSource {
    async fn fetch(&self) -> Result<RingSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("placement fetch: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ServiceUnavailable(format!(
                "placement service returned {}",
                response.status()
            )));
        }
        let doc: RingDocument = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("placement document: {e}")))?;
        RingSnapshot::from_document(doc)
    }
}
