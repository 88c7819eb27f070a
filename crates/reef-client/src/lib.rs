//! Clients for the metadata and storage tiers.
//!
//! [`shard::ShardPool`] holds one long-lived gRPC client per physical
//! metadata node; [`storage::SharkClient`] is the HTTP agent used to move
//! object bodies to and from storage nodes; [`chooser::SharkChooser`] is
//! the seam to the external storage-node inventory service.

pub mod chooser;
pub mod convert;
pub mod listing;
pub mod shard;
pub mod storage;

pub use chooser::{HttpSharkChooser, SharkChooser, StaticChooser};
pub use shard::{shard_error, ShardPool};
pub use storage::{body_path, SharkClient, SharkGetResponse, SharkPutOutcome};
