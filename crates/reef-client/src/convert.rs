//! Conversions between wire records and domain types.

use chrono::{DateTime, TimeZone, Utc};
use reef_common::{Bucket, BucketObject, Error, ObjectId, Result, Shark, StorageLayoutVersion};
use reef_proto::metadata as pb;
use std::collections::BTreeMap;
use uuid::Uuid;

fn parse_uuid(field: &str, value: &str) -> Result<Uuid> {
    value
        .parse()
        .map_err(|_| Error::internal(format!("shard returned malformed {field}: {value:?}")))
}

fn parse_ms(field: &str, ms: u64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .ok_or_else(|| Error::internal(format!("shard returned out-of-range {field}: {ms}")))
}

/// Domain bucket from a wire record
pub fn bucket_from_proto(record: pb::BucketRecord) -> Result<Bucket> {
    Ok(Bucket {
        id: parse_uuid("bucket id", &record.id)?,
        name: record.name,
        owner: parse_uuid("owner", &record.owner)?,
        created: parse_ms("created", record.created_ms)?,
    })
}

/// Domain object from a wire record
pub fn object_from_proto(record: pb::ObjectRecord) -> Result<BucketObject> {
    let layout = StorageLayoutVersion::from_u32(record.storage_layout_version).ok_or_else(|| {
        Error::internal(format!(
            "shard returned unknown storage layout version {}",
            record.storage_layout_version
        ))
    })?;
    Ok(BucketObject {
        id: ObjectId::from_uuid(parse_uuid("object id", &record.id)?),
        name: record.name,
        name_hash: record.name_hash,
        bucket_id: parse_uuid("bucket id", &record.bucket_id)?,
        owner: parse_uuid("owner", &record.owner)?,
        content_length: record.content_length,
        content_md5: record.content_md5,
        content_type: record.content_type,
        headers: record.headers.into_iter().collect::<BTreeMap<_, _>>(),
        sharks: record
            .sharks
            .into_iter()
            .map(|s| Shark {
                datacenter: s.datacenter,
                storage_id: s.storage_id,
            })
            .collect(),
        storage_layout_version: layout,
        created: parse_ms("created", record.created_ms)?,
        modified: parse_ms("modified", record.modified_ms)?,
        roles: record.roles,
    })
}

/// Wire shark list from domain sharks
pub fn sharks_to_proto(sharks: &[Shark]) -> Vec<pb::SharkInfo> {
    sharks
        .iter()
        .map(|s| pb::SharkInfo {
            datacenter: s.datacenter.clone(),
            storage_id: s.storage_id.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_object() -> pb::ObjectRecord {
        pb::ObjectRecord {
            id: "9e8f3a52-7a64-4cda-a316-6a166f68d315".to_string(),
            name: "k1".to_string(),
            name_hash: "abc0".to_string(),
            bucket_id: "52a2f6b5-44c1-4f07-81f9-de7b2b8dc7b1".to_string(),
            owner: "5b3e2a01-1f2d-4d7a-9f3e-9c8b7a6d5e4f".to_string(),
            content_length: 11,
            content_md5: "XrY7u+Ae7tCTyyK7j1rNww==".to_string(),
            content_type: "text/plain".to_string(),
            headers: [("m-tag".to_string(), "x".to_string())].into_iter().collect(),
            sharks: vec![pb::SharkInfo {
                datacenter: "dc1".to_string(),
                storage_id: "1.stor.reef.local".to_string(),
            }],
            storage_layout_version: 2,
            created_ms: 1_700_000_000_000,
            modified_ms: 1_700_000_001_000,
            roles: vec!["c3d05ac7-48e9-4d21-8acd-5a0d4011ff16".to_string()],
        }
    }

    #[test]
    fn test_object_roundtrip_fields() {
        let object = object_from_proto(wire_object()).unwrap();
        assert_eq!(object.name, "k1");
        assert_eq!(object.content_length, 11);
        assert_eq!(object.sharks.len(), 1);
        assert_eq!(object.storage_layout_version, StorageLayoutVersion::V2);
        assert_eq!(object.headers.get("m-tag").unwrap(), "x");
        assert_eq!(object.roles.len(), 1);
    }

    #[test]
    fn test_malformed_uuid_rejected() {
        let mut record = wire_object();
        record.id = "not-a-uuid".to_string();
        assert!(object_from_proto(record).is_err());
    }

    #[test]
    fn test_unknown_layout_rejected() {
        let mut record = wire_object();
        record.storage_layout_version = 9;
        assert!(object_from_proto(record).is_err());
    }
}
