//! An in-memory [`Bucket`](crate::Bucket) test double.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::{compute_crc32c_hex, compute_md5_hex, Bucket, Error, ListPage, ObjectRecord};

struct StoredObject {
    contents: Vec<u8>,
    record: ObjectRecord,
}

/// A process-local bucket backed by a `BTreeMap`, ordered by name so
/// `list_objects` pagination is deterministic.
#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryBucket {
    /// Construct an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket for MemoryBucket {
    fn create_object(
        &self,
        name: &str,
        contents: &[u8],
        expected_crc32c: &str,
        expected_md5: &str,
        metadata: HashMap<String, String>,
    ) -> Result<ObjectRecord, Error> {
        let crc32c = compute_crc32c_hex(contents);
        let md5 = compute_md5_hex(contents);
        if crc32c != expected_crc32c || md5 != expected_md5 {
            return Err(Error::ChecksumMismatch);
        }
        let record = ObjectRecord {
            name: name.to_string(),
            size: contents.len() as u64,
            crc32c,
            md5,
            metadata,
        };
        let mut objects = self.objects.lock().expect("bucket mutex poisoned");
        objects.insert(name.to_string(), StoredObject { contents: contents.to_vec(), record: record.clone() });
        Ok(record)
    }

    fn read_object(&self, name: &str) -> Result<Vec<u8>, Error> {
        let objects = self.objects.lock().expect("bucket mutex poisoned");
        objects.get(name).map(|o| o.contents.clone()).ok_or(Error::NotFound)
    }

    fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, Error> {
        let objects = self.objects.lock().expect("bucket mutex poisoned");
        let start = continuation.unwrap_or("");
        let records: Vec<ObjectRecord> = objects
            .range(start.to_string()..)
            .filter(|(name, _)| name.starts_with(prefix))
            .filter(|(name, _)| match continuation {
                Some(c) => name.as_str() > c,
                None => true,
            })
            .map(|(_, o)| o.record.clone())
            .collect();
        Ok((records, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_round_trips() {
        let bucket = MemoryBucket::new();
        let data = b"hello".to_vec();
        let crc = compute_crc32c_hex(&data);
        let md5 = compute_md5_hex(&data);
        bucket.create_object("obj/1", &data, &crc, &md5, HashMap::new()).unwrap();
        let back = bucket.read_object("obj/1").unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let bucket = MemoryBucket::new();
        let data = b"hello".to_vec();
        let err = bucket.create_object("obj/1", &data, "deadbeef", "deadbeef", HashMap::new());
        assert!(matches!(err, Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn read_missing_is_not_found() {
        let bucket = MemoryBucket::new();
        assert!(matches!(bucket.read_object("nope"), Err(Error::NotFound)));
    }

    #[test]
    fn list_objects_filters_by_prefix() {
        let bucket = MemoryBucket::new();
        for name in ["blobs/a", "blobs/b", "registry"] {
            let data = name.as_bytes();
            let crc = compute_crc32c_hex(data);
            let md5 = compute_md5_hex(data);
            bucket.create_object(name, data, &crc, &md5, HashMap::new()).unwrap();
        }
        let (records, _) = bucket.list_objects("blobs/", None).unwrap();
        assert_eq!(records.len(), 2);
    }
}
