//! Core type definitions for the reef gateway.
//!
//! Buckets and objects are owner-scoped; their names are validated here so
//! that every other layer can assume a well-formed name. Object placement
//! hashes the MD5 of the name rather than the name itself, which keeps the
//! routing tuple reproducible from fixed-size fields stored alongside the
//! object body.

use chrono::{DateTime, Utc};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Base64 MD5 digest of the empty byte string. Zero-byte objects are
/// committed with this digest and an empty shark list.
pub const ZERO_BYTE_MD5: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

/// Unique identifier for an object. Doubles as the object's etag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a fresh random object ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated bucket name.
///
/// Rules: 3-63 characters, lowercase labels separated by dots, each label
/// matching `[a-z0-9]([a-z0-9-]*[a-z0-9])?`, and the whole name must not
/// look like a dotted-quad IP address.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name, validating it
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (for records already accepted by a shard)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.contains('\0') {
            return Err(BucketNameError::EmbeddedNul);
        }
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        for label in name.split('.') {
            if label.is_empty() {
                return Err(BucketNameError::EmptyLabel);
            }
            let first = label.chars().next().unwrap();
            let last = label.chars().last().unwrap();
            if !is_lower_alnum(first) || !is_lower_alnum(last) {
                return Err(BucketNameError::BadLabelBoundary);
            }
            for c in label.chars() {
                if !is_lower_alnum(c) && c != '-' {
                    return Err(BucketNameError::InvalidChar(c));
                }
            }
        }

        if looks_like_ip(name) {
            return Err(BucketNameError::LooksLikeIpAddress);
        }

        Ok(())
    }
}

fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

// Four dot-separated groups of 1-3 digits. Broader than a strict IPv4
// parse: "999.1.1.1" is rejected too.
fn looks_like_ip(name: &str) -> bool {
    let groups: Vec<&str> = name.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()))
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when validating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name labels must not be empty")]
    EmptyLabel,
    #[error("bucket name labels must start and end with a lowercase letter or digit")]
    BadLabelBoundary,
    #[error("bucket name contains invalid character: {0:?}")]
    InvalidChar(char),
    #[error("bucket name must not resemble an IP address")]
    LooksLikeIpAddress,
    #[error("bucket name must not contain a NUL byte")]
    EmbeddedNul,
}

/// A validated object name: 1-1024 bytes of UTF-8 with no NUL byte.
///
/// The NUL exclusion is load-bearing: listing resume markers use
/// `name + "\0"` as the exact successor key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectName(String);

impl ObjectName {
    /// Create a new object name, validating it
    pub fn new(name: impl Into<String>) -> Result<Self, ObjectNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ObjectNameError::Empty);
        }
        if name.len() > 1024 {
            return Err(ObjectNameError::TooLong);
        }
        if name.contains('\0') {
            return Err(ObjectNameError::EmbeddedNul);
        }
        Ok(Self(name))
    }

    /// Create without validation (for records already accepted by a shard)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the object name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex MD5 of the name. This is the fixed-size stand-in for
    /// the name in routing keys and storage paths.
    #[must_use]
    pub fn name_hash(&self) -> String {
        hex::encode(md5::compute(self.0.as_bytes()).0)
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({:?})", self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when validating an object name
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectNameError {
    #[error("object name must not be empty")]
    Empty,
    #[error("object name must not exceed 1024 bytes")]
    TooLong,
    #[error("object name must not contain a NUL byte")]
    EmbeddedNul,
}

/// A storage node holding one replica of an object body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shark {
    /// Datacenter the node lives in
    pub datacenter: String,
    /// Stable storage node identifier, also its DNS name
    pub storage_id: String,
}

/// On-disk path layout used by the storage tier for an object body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum StorageLayoutVersion {
    /// Name-hash derived subdirectories of constant fan-out
    V1 = 1,
    /// Object-id prefix directories with an `objectId,nameHash` leaf
    V2 = 2,
}

impl StorageLayoutVersion {
    /// Current layout for new writes
    pub const CURRENT: Self = Self::V2;

    /// Parse a stored version number
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// The stored version number
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Bucket metadata record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Server-assigned bucket ID
    pub id: Uuid,
    /// Bucket name, unique per owner
    pub name: String,
    /// Owning account
    pub owner: Uuid,
    /// Creation time
    pub created: DateTime<Utc>,
}

/// Object metadata record as stored on a metadata shard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketObject {
    /// Server-assigned object ID; doubles as the etag
    pub id: ObjectId,
    /// Object name within the bucket
    pub name: String,
    /// Lowercase hex MD5 of the name
    pub name_hash: String,
    /// Bucket the object belongs to
    pub bucket_id: Uuid,
    /// Owning account
    pub owner: Uuid,
    /// Body size in bytes
    pub content_length: u64,
    /// Base64 MD5 of the body
    pub content_md5: String,
    /// Client-supplied content type
    pub content_type: String,
    /// Filtered stored headers: `m-*` user metadata, `cache-control`,
    /// `surrogate-key`, and the `access-control-*` CORS subset
    pub headers: BTreeMap<String, String>,
    /// Storage nodes holding the body; empty for zero-byte objects
    pub sharks: Vec<Shark>,
    /// Path layout the body was written under
    pub storage_layout_version: StorageLayoutVersion,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last metadata modification time
    pub modified: DateTime<Utc>,
    /// Role tags stamped on the record, as supplied via `Role-Tag` at
    /// create or metadata-update time
    pub roles: Vec<String>,
}

impl BucketObject {
    /// Number of storage nodes carrying a copy of the body
    #[must_use]
    pub fn durability_level(&self) -> usize {
        self.sharks.len()
    }

    /// True when the object has no body bytes
    #[must_use]
    pub fn is_zero_byte(&self) -> bool {
        self.content_length == 0
    }
}

/// Routing key for a bucket: `owner:bucket`
#[must_use]
pub fn bucket_routing_key(owner: &Uuid, bucket: &str) -> String {
    format!("{owner}:{bucket}")
}

/// Routing key for an object: `owner:bucket_id:md5hex(name)`.
///
/// The name hash (not the raw name) is what makes reverse lookup from a
/// storage-node path possible without scanning shards.
#[must_use]
pub fn object_routing_key(owner: &Uuid, bucket_id: &Uuid, name: &ObjectName) -> String {
    format!("{owner}:{bucket_id}:{}", name.name_hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_valid() {
        assert!(BucketName::new("abc").is_ok());
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("a.b.c").is_ok());
        assert!(BucketName::new("bucket123.example").is_ok());
        // Three digit groups is fine; only four groups look like an IP
        assert!(BucketName::new("1.2.3").is_ok());
        assert!(BucketName::new("1.2.3.4a").is_ok());
    }

    #[test]
    fn test_bucket_name_invalid() {
        assert!(BucketName::new("ab").is_err()); // too short
        assert!(BucketName::new("A-B").is_err()); // uppercase
        assert!(BucketName::new("-bucket").is_err()); // bad label start
        assert!(BucketName::new("bucket-").is_err()); // bad label end
        assert!(BucketName::new("a..b").is_err()); // empty label
        assert!(BucketName::new("a_b_c").is_err()); // invalid char
        assert!(BucketName::new(&"x".repeat(64)).is_err()); // too long
    }

    #[test]
    fn test_bucket_name_ip_like() {
        assert!(matches!(
            BucketName::new("1.2.3.4"),
            Err(BucketNameError::LooksLikeIpAddress)
        ));
        assert!(matches!(
            BucketName::new("192.168.1.1"),
            Err(BucketNameError::LooksLikeIpAddress)
        ));
        // Out-of-range groups still resemble an IP
        assert!(matches!(
            BucketName::new("999.999.999.999"),
            Err(BucketNameError::LooksLikeIpAddress)
        ));
        // Five groups do not
        assert!(BucketName::new("1.2.3.4.5").is_ok());
    }

    #[test]
    fn test_object_name() {
        assert!(ObjectName::new("k").is_ok());
        assert!(ObjectName::new("dir1/a.txt").is_ok());
        assert!(ObjectName::new("").is_err());
        assert!(ObjectName::new("a\0b").is_err());
        assert!(ObjectName::new("x".repeat(1024)).is_ok());
        assert!(ObjectName::new("x".repeat(1025)).is_err());
    }

    #[test]
    fn test_name_hash_is_md5_hex() {
        let name = ObjectName::new("hello world").unwrap();
        assert_eq!(name.name_hash(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_routing_keys() {
        let owner = Uuid::nil();
        let bucket_id = Uuid::nil();
        let name = ObjectName::new("hello world").unwrap();
        assert_eq!(
            bucket_routing_key(&owner, "b1"),
            format!("{owner}:b1")
        );
        assert_eq!(
            object_routing_key(&owner, &bucket_id, &name),
            format!("{owner}:{bucket_id}:5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
    }

    #[test]
    fn test_layout_version_roundtrip() {
        assert_eq!(StorageLayoutVersion::from_u32(1), Some(StorageLayoutVersion::V1));
        assert_eq!(StorageLayoutVersion::from_u32(2), Some(StorageLayoutVersion::V2));
        assert_eq!(StorageLayoutVersion::from_u32(3), None);
        assert_eq!(StorageLayoutVersion::CURRENT.as_u32(), 2);
    }
}
