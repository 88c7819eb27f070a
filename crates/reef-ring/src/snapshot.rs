//! Immutable ring snapshots and key-to-shard resolution.

use reef_common::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Hash algorithm named by the placement data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Parse the algorithm name carried in the placement document
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(Error::internal(format!(
                "unsupported ring hash algorithm: {other}"
            ))),
        }
    }

    /// Hash a routing key into the 128-bit ring space (first 16 digest
    /// bytes, big-endian).
    #[must_use]
    pub fn ring_hash(&self, key: &str) -> u128 {
        let head: [u8; 16] = match self {
            Self::Md5 => md5::compute(key.as_bytes()).0,
            Self::Sha256 => {
                let digest = Sha256::digest(key.as_bytes());
                digest[..16].try_into().unwrap()
            }
        };
        u128::from_be_bytes(head)
    }
}

/// Where a routing key lives: the vnode its hash falls in and the pnode
/// currently owning that vnode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub vnode: u32,
    pub pnode: String,
}

/// One vnode-to-pnode assignment, as enumerated for fan-out listings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VnodeAssignment {
    pub vnode: u32,
    pub pnode: String,
}

/// The placement document as served by the placement-data service
#[derive(Debug, Deserialize)]
pub struct RingDocument {
    pub version: u64,
    pub algorithm: String,
    /// Width of each vnode's slice of the 128-bit hash space, as a
    /// decimal string (the value does not fit a JSON number).
    pub vnode_hash_interval: String,
    /// pnode identifier to the vnodes it owns
    pub pnode_to_vnodes: HashMap<String, Vec<u32>>,
}

/// An immutable, validated ring snapshot
#[derive(Debug)]
pub struct RingSnapshot {
    version: u64,
    algorithm: HashAlgorithm,
    vnode_hash_interval: u128,
    vnode_to_pnode: HashMap<u32, String>,
    pnode_to_vnodes: HashMap<String, BTreeSet<u32>>,
}

impl RingSnapshot {
    /// Build and validate a snapshot from a placement document
    pub fn from_document(doc: RingDocument) -> Result<Self> {
        let algorithm = HashAlgorithm::parse(&doc.algorithm)?;
        let interval: u128 = doc
            .vnode_hash_interval
            .parse()
            .map_err(|_| Error::internal("vnode_hash_interval is not a decimal integer"))?;
        Self::from_parts(
            doc.version,
            algorithm,
            interval,
            doc.pnode_to_vnodes.into_iter().collect(),
        )
    }

    /// Build and validate a snapshot from raw parts
    pub fn from_parts(
        version: u64,
        algorithm: HashAlgorithm,
        vnode_hash_interval: u128,
        assignments: Vec<(String, Vec<u32>)>,
    ) -> Result<Self> {
        if vnode_hash_interval == 0 {
            return Err(Error::internal("vnode_hash_interval must be non-zero"));
        }
        let mut vnode_to_pnode = HashMap::new();
        let mut pnode_to_vnodes: HashMap<String, BTreeSet<u32>> = HashMap::new();
        for (pnode, vnodes) in assignments {
            for vnode in vnodes {
                if let Some(prev) = vnode_to_pnode.insert(vnode, pnode.clone()) {
                    return Err(Error::internal(format!(
                        "vnode {vnode} assigned to both {prev} and {pnode}"
                    )));
                }
                pnode_to_vnodes.entry(pnode.clone()).or_default().insert(vnode);
            }
        }
        if vnode_to_pnode.is_empty() {
            return Err(Error::internal("placement data contains no vnodes"));
        }
        Ok(Self {
            version,
            algorithm,
            vnode_hash_interval,
            vnode_to_pnode,
            pnode_to_vnodes,
        })
    }

    /// Snapshot version as published by the placement service
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of vnodes in the ring
    #[must_use]
    pub fn vnode_count(&self) -> usize {
        self.vnode_to_pnode.len()
    }

    /// Number of physical shard nodes in the ring
    #[must_use]
    pub fn pnode_count(&self) -> usize {
        self.pnode_to_vnodes.len()
    }

    /// All physical shard nodes
    pub fn pnodes(&self) -> impl Iterator<Item = &str> {
        self.pnode_to_vnodes.keys().map(String::as_str)
    }

    /// Resolve a routing key to its vnode and owning pnode
    pub fn locate(&self, key: &str) -> Result<Location> {
        let h = self.algorithm.ring_hash(key);
        let slot = h / self.vnode_hash_interval;
        let vnode = u32::try_from(slot % self.vnode_to_pnode.len() as u128)
            .expect("vnode index fits u32");
        let pnode = self
            .vnode_to_pnode
            .get(&vnode)
            .ok_or_else(|| Error::internal(format!("vnode {vnode} has no pnode assignment")))?;
        Ok(Location {
            vnode,
            pnode: pnode.clone(),
        })
    }

    /// Enumerate every vnode with its owning pnode, in vnode order.
    /// Listing fans out over exactly this set.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<VnodeAssignment> {
        let mut out: Vec<VnodeAssignment> = self
            .vnode_to_pnode
            .iter()
            .map(|(vnode, pnode)| VnodeAssignment {
                vnode: *vnode,
                pnode: pnode.clone(),
            })
            .collect();
        out.sort_by_key(|a| a.vnode);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RingSnapshot {
        RingSnapshot::from_parts(
            1,
            HashAlgorithm::Md5,
            u128::MAX / 8,
            vec![
                ("shard-a".to_string(), vec![0, 1, 2, 3]),
                ("shard-b".to_string(), vec![4, 5, 6, 7]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_locate_is_stable_and_in_range() {
        let snap = snapshot();
        for key in ["a:b", "owner:bucket:0011aabb", "x"] {
            let first = snap.locate(key).unwrap();
            let second = snap.locate(key).unwrap();
            assert_eq!(first, second);
            assert!(first.vnode < 8);
        }
    }

    #[test]
    fn test_ring_hash_matches_digest_head() {
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        let h = HashAlgorithm::Md5.ring_hash("abc");
        let expected = u128::from_be_bytes(
            hex::decode("900150983cd24fb0d6963f7d28e17f72")
                .unwrap()
                .try_into()
                .unwrap(),
        );
        assert_eq!(h, expected);
    }

    #[test]
    fn test_duplicate_vnode_rejected() {
        let result = RingSnapshot::from_parts(
            1,
            HashAlgorithm::Md5,
            u128::MAX / 2,
            vec![
                ("shard-a".to_string(), vec![0]),
                ("shard-b".to_string(), vec![0, 1]),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_ring_rejected() {
        assert!(RingSnapshot::from_parts(1, HashAlgorithm::Md5, 1, vec![]).is_err());
        assert!(RingSnapshot::from_parts(
            1,
            HashAlgorithm::Md5,
            0,
            vec![("shard-a".to_string(), vec![0])]
        )
        .is_err());
    }

    #[test]
    fn test_all_nodes_sorted() {
        let nodes = snapshot().all_nodes();
        assert_eq!(nodes.len(), 8);
        let vnodes: Vec<u32> = nodes.iter().map(|n| n.vnode).collect();
        assert_eq!(vnodes, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_document_parsing() {
        let doc: RingDocument = serde_json::from_str(
            r#"{
                "version": 9,
                "algorithm": "sha256",
                "vnode_hash_interval": "85070591730234615865843651857942052864",
                "pnode_to_vnodes": {"http://shard-1:2030": [0, 1], "http://shard-2:2030": [2, 3]}
            }"#,
        )
        .unwrap();
        let snap = RingSnapshot::from_document(doc).unwrap();
        assert_eq!(snap.version(), 9);
        assert_eq!(snap.pnode_count(), 2);
        assert_eq!(snap.vnode_count(), 4);
    }
}
