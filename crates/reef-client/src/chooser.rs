//! Storage-node selection seam.
//!
//! The inventory service knows node capacity and health; the gateway only
//! asks it for candidate sets. Each set is an ordered list of exactly
//! `copies` nodes; later sets are fallbacks tried when an earlier set has
//! an unreachable member.

use async_trait::async_trait;
use reef_common::{Error, Result, Shark};
use serde::Deserialize;
use std::time::Duration;

/// Chooses storage nodes for a write
#[async_trait]
pub trait SharkChooser: Send + Sync {
    /// Candidate sets for a `copies`-replica write of `size_hint` bytes.
    /// Sets are tried in order; every set has exactly `copies` members.
    async fn choose(&self, copies: usize, size_hint: u64) -> Result<Vec<Vec<Shark>>>;
}

#[derive(Debug, Deserialize)]
struct ChooseResponse {
    sets: Vec<Vec<Shark>>,
}

/// Production chooser backed by the inventory service
pub struct HttpSharkChooser {
    url: String,
    client: reqwest::Client,
}

impl HttpSharkChooser {
    /// Create a chooser talking to the inventory service at `url`
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::internal(format!("chooser http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl SharkChooser for HttpSharkChooser {
    async fn choose(&self, copies: usize, size_hint: u64) -> Result<Vec<Vec<Shark>>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("replicas", copies.to_string()),
                ("size", size_hint.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("inventory service: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ServiceUnavailable(format!(
                "inventory service returned {}",
                response.status()
            )));
        }
        let parsed: ChooseResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("inventory response: {e}")))?;
        if parsed.sets.iter().any(|set| set.len() != copies) {
            return Err(Error::internal(
                "inventory service returned a set of the wrong width",
            ));
        }
        Ok(parsed.sets)
    }
}

/// Fixed-inventory chooser for development and tests: deals consecutive
/// windows over the configured nodes.
pub struct StaticChooser {
    nodes: Vec<Shark>,
}

impl StaticChooser {
    /// Create a chooser over a fixed node list
    #[must_use]
    pub fn new(nodes: Vec<Shark>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl SharkChooser for StaticChooser {
    async fn choose(&self, copies: usize, _size_hint: u64) -> Result<Vec<Vec<Shark>>> {
        if self.nodes.len() < copies {
            return Ok(Vec::new());
        }
        let sets = (0..=self.nodes.len() - copies)
            .map(|start| self.nodes[start..start + copies].to_vec())
            .collect();
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shark(id: &str) -> Shark {
        Shark {
            datacenter: "dc1".to_string(),
            storage_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_static_chooser_windows() {
        let chooser = StaticChooser::new(vec![shark("a"), shark("b"), shark("c")]);
        let sets = chooser.choose(2, 100).await.unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0][0].storage_id, "a");
        assert_eq!(sets[0][1].storage_id, "b");
        assert_eq!(sets[1][0].storage_id, "b");
        assert_eq!(sets[1][1].storage_id, "c");
    }

    #[tokio::test]
    async fn test_static_chooser_insufficient_nodes() {
        let chooser = StaticChooser::new(vec![shark("a")]);
        let sets = chooser.choose(2, 100).await.unwrap();
        assert!(sets.is_empty());
    }

    #[test]
    fn test_choose_response_shape() {
        let parsed: ChooseResponse = serde_json::from_str(
            r#"{"sets": [[{"datacenter": "dc1", "storage_id": "1.stor"},
                          {"datacenter": "dc2", "storage_id": "2.stor"}]]}"#,
        )
        .unwrap();
        assert_eq!(parsed.sets.len(), 1);
        assert_eq!(parsed.sets[0][1].datacenter, "dc2");
    }
}
