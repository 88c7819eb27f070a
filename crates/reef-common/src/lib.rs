//! Shared foundation for the reef object store gateway.
//!
//! This crate defines the core domain types (buckets, objects, sharks),
//! the externally visible error taxonomy, and the gateway configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use types::{
    Bucket, BucketName, BucketObject, ObjectId, ObjectName, Shark, StorageLayoutVersion,
    ZERO_BYTE_MD5,
};
