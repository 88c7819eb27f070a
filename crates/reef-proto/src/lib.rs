//! Protocol definitions for the reef metadata tier.
//!
//! The gateway is a pure client of this surface; the server half is
//! generated too so shard implementations and in-process test fixtures can
//! share the same types.

/// Metadata shard service (bucket and object records)
pub mod metadata {
    tonic::include_proto!("reef.metadata");
}
