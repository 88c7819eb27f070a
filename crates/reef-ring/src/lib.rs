//! Consistent-hash placement ring.
//!
//! Routing keys hash to one of a large fixed number of virtual nodes;
//! each vnode maps to exactly one physical metadata shard. The mapping is
//! published by an external placement service and refreshed on a timer; a
//! request captures one immutable snapshot at entry and uses it
//! throughout.

pub mod snapshot;
pub mod source;

pub use snapshot::{HashAlgorithm, Location, RingDocument, RingSnapshot, VnodeAssignment};
pub use source::{HttpPlacementSource, PlacementSource};

use parking_lot::RwLock;
use reef_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared handle to the current ring snapshot.
///
/// Readers clone out an `Arc<RingSnapshot>` and hold it for the life of a
/// request; refresh swaps the pointer without touching published
/// snapshots.
pub struct Ring {
    current: RwLock<Arc<RingSnapshot>>,
}

impl Ring {
    /// Fetch the initial snapshot from the placement source. Failure here
    /// is fatal to the service: without placement data nothing can be
    /// routed.
    pub async fn bootstrap(source: &dyn PlacementSource) -> Result<Self> {
        let snapshot = source
            .fetch()
            .await
            .map_err(|e| Error::internal(format!("initial placement fetch failed: {e}")))?;
        info!(
            version = snapshot.version(),
            vnodes = snapshot.vnode_count(),
            pnodes = snapshot.pnode_count(),
            "placement ring loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Construct directly from a snapshot (tests, tooling)
    #[must_use]
    pub fn from_snapshot(snapshot: RingSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Hold the returned `Arc` for the whole
    /// request so every lookup within it sees one consistent ring.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.current.read().clone()
    }

    /// Replace the published snapshot
    pub fn publish(&self, snapshot: RingSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Poll the placement source forever, publishing each fully-built
    /// snapshot. A failed poll logs and retains the previous snapshot.
    pub async fn refresh_loop(
        self: Arc<Self>,
        source: Arc<dyn PlacementSource>,
        poll_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        // The first tick fires immediately; bootstrap already covered it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match source.fetch().await {
                Ok(snapshot) => {
                    let old_version = self.snapshot().version();
                    if snapshot.version() != old_version {
                        info!(
                            old_version,
                            new_version = snapshot.version(),
                            "placement ring refreshed"
                        );
                    }
                    self.publish(snapshot);
                }
                Err(e) => {
                    warn!(error = %e, "placement refresh failed; keeping previous ring");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn two_node_snapshot(version: u64) -> RingSnapshot {
        RingSnapshot::from_parts(
            version,
            HashAlgorithm::Md5,
            u128::MAX / 4,
            vec![
                ("shard-a".to_string(), vec![0, 1]),
                ("shard-b".to_string(), vec![2, 3]),
            ],
        )
        .unwrap()
    }

    struct FlakySource {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl PlacementSource for FlakySource {
        async fn fetch(&self) -> Result<RingSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(two_node_snapshot(1))
            } else {
                Err(Error::internal("placement service unreachable"))
            }
        }
    }

    #[tokio::test]
    async fn test_bootstrap_and_snapshot_stability() {
        let source = FlakySource {
            calls: AtomicU32::new(0),
        };
        let ring = Ring::bootstrap(&source).await.unwrap();
        let snap = ring.snapshot();
        let a = snap.locate("some:key").unwrap();
        let b = snap.locate("some:key").unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_error() {
        let source = FlakySource {
            calls: AtomicU32::new(1), // already past the good call
        };
        assert!(Ring::bootstrap(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let ring = Arc::new(Ring::from_snapshot(two_node_snapshot(7)));
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(1), // every fetch fails
        });

        tokio::time::pause();
        let task = tokio::spawn(
            ring.clone()
                .refresh_loop(source, Duration::from_secs(1800)),
        );
        tokio::time::advance(Duration::from_secs(3601)).await;
        tokio::task::yield_now().await;
        task.abort();

        assert_eq!(ring.snapshot().version(), 7);
    }

    #[tokio::test]
    async fn test_publish_swaps_without_disturbing_readers() {
        let ring = Ring::from_snapshot(two_node_snapshot(1));
        let held = ring.snapshot();
        ring.publish(two_node_snapshot(2));
        assert_eq!(held.version(), 1);
        assert_eq!(ring.snapshot().version(), 2);
    }
}
