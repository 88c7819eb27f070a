//! Metadata shard client pool.
//!
//! One lazily-connecting channel per physical node in the ring. Channels
//! reconnect transparently, so nothing is created on the hot path; a
//! lookup is a map read and a cheap client clone.

use parking_lot::RwLock;
use reef_common::{Error, Result};
use reef_proto::metadata::metadata_service_client::MetadataServiceClient;
use std::collections::HashMap;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

/// Pool of metadata shard clients keyed by pnode identifier
pub struct ShardPool {
    clients: RwLock<HashMap<String, MetadataServiceClient<Channel>>>,
}

impl ShardPool {
    /// Open a client for every pnode. Channels are lazy: a shard that is
    /// down at startup connects on first use.
    pub fn new(pnodes: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut clients = HashMap::new();
        for pnode in pnodes {
            clients.insert(pnode.clone(), Self::open(&pnode)?);
        }
        info!(shards = clients.len(), "metadata shard pool ready");
        Ok(Self {
            clients: RwLock::new(clients),
        })
    }

    fn open(pnode: &str) -> Result<MetadataServiceClient<Channel>> {
        let endpoint = Endpoint::from_shared(pnode.to_string())
            .map_err(|e| Error::internal(format!("bad shard endpoint {pnode}: {e}")))?;
        Ok(MetadataServiceClient::new(endpoint.connect_lazy()))
    }

    /// Client for a pnode. Cloning a tonic client is cheap and shares
    /// the underlying channel.
    pub fn client(&self, pnode: &str) -> Result<MetadataServiceClient<Channel>> {
        if let Some(client) = self.clients.read().get(pnode) {
            return Ok(client.clone());
        }
        Err(Error::internal(format!("no shard client for pnode {pnode}")))
    }

    /// Add clients for pnodes that joined the ring since startup
    pub fn ensure(&self, pnode: &str) -> Result<MetadataServiceClient<Channel>> {
        if let Some(client) = self.clients.read().get(pnode) {
            return Ok(client.clone());
        }
        let client = Self::open(pnode)?;
        let mut clients = self.clients.write();
        let entry = clients.entry(pnode.to_string()).or_insert(client);
        Ok(entry.clone())
    }

    /// Number of pooled shard clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// True when the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

/// Translate a shard RPC failure into the error taxonomy.
///
/// Shards report domain failures as a status whose message leads with a
/// stable error name; transport-level failures have no such name and
/// collapse to `Internal`.
#[must_use]
pub fn shard_error(status: tonic::Status) -> Error {
    match status.code() {
        tonic::Code::Unavailable => {
            Error::ServiceUnavailable(format!("shard unavailable: {}", status.message()))
        }
        tonic::Code::DeadlineExceeded => Error::Timeout,
        _ => Error::from_upstream_message(status.message()),
    }
}
