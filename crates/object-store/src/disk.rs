//! A local-disk [`Bucket`](crate::Bucket) test double, used by end-to-end
//! tests that want objects to actually survive a process restart.
//!
//! Writes go to a temporary file and are renamed into place, mirroring the
//! atomic-write discipline the rest of this codebase uses for on-disk
//! artifacts. Object names may contain `/`; they map directly onto nested
//! directories under `root`, the way S3-style keys usually do.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::{compute_crc32c_hex, compute_md5_hex, Bucket, Error, ListPage, ObjectRecord};

/// A bucket backed by a directory tree on local disk.
pub struct DiskBucket {
    root: PathBuf,
}

impl DiskBucket {
    /// Open (creating if absent) a disk-backed bucket rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("meta"))?;
        Ok(Self { root })
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join("objects").join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join("meta").join(format!("{name}.meta"))
    }

    fn write_meta(&self, name: &str, metadata: &HashMap<String, String>) -> Result<(), Error> {
        let mut lines = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>();
        lines.sort();
        let meta_path = self.meta_path(name);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = meta_path.with_extension("meta.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            for line in lines {
                writeln!(f, "{line}")?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp, &meta_path)?;
        Ok(())
    }

    fn read_meta(&self, name: &str) -> HashMap<String, String> {
        let Ok(text) = fs::read_to_string(self.meta_path(name)) else {
            return HashMap::new();
        };
        text.lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn walk_names(&self, dir: &std::path::Path, base: &std::path::Path, out: &mut Vec<String>) -> Result<(), Error> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_names(&path, base, out)?;
            } else if let Ok(rel) = path.strip_prefix(base) {
                if let Some(name) = rel.to_str() {
                    out.push(name.replace(std::path::MAIN_SEPARATOR, "/"));
                }
            }
        }
        Ok(())
    }
}

impl Bucket for DiskBucket {
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
        let final_path = self.object_path(name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = final_path.with_extension("incomplete");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(contents)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        self.write_meta(name, &metadata)?;
        Ok(ObjectRecord { name: name.to_string(), size: contents.len() as u64, crc32c, md5, metadata })
    }

    fn read_object(&self, name: &str) -> Result<Vec<u8>, Error> {
        match fs::read(self.object_path(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, Error> {
        let objects_dir = self.root.join("objects");
        let mut names = Vec::new();
        self.walk_names(&objects_dir, &objects_dir, &mut names)?;
        names.sort();
        let mut records = Vec::new();
        for name in names {
            if !name.starts_with(prefix) {
                continue;
            }
            if let Some(c) = continuation {
                if name.as_str() <= c {
                    continue;
                }
            }
            let contents = self.read_object(&name)?;
            let crc32c = compute_crc32c_hex(&contents);
            let md5 = compute_md5_hex(&contents);
            let metadata = self.read_meta(&name);
            records.push(ObjectRecord { name: name.clone(), size: contents.len() as u64, crc32c, md5, metadata });
        }
        Ok((records, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DiskBucket::open(dir.path()).unwrap();
        let data = b"on disk".to_vec();
        let crc = compute_crc32c_hex(&data);
        let md5 = compute_md5_hex(&data);
        bucket.create_object("backup/obj1", &data, &crc, &md5, HashMap::new()).unwrap();
        let back = bucket.read_object("backup/obj1").unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DiskBucket::open(dir.path()).unwrap();
        let data = b"data".to_vec();
        let crc = compute_crc32c_hex(&data);
        let md5 = compute_md5_hex(&data);
        let mut meta = HashMap::new();
        meta.insert("sha1".to_string(), "abc123".to_string());
        let record = bucket.create_object("obj", &data, &crc, &md5, meta).unwrap();
        assert_eq!(record.metadata.get("sha1"), Some(&"abc123".to_string()));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DiskBucket::open(dir.path()).unwrap();
        let err = bucket.create_object("obj", b"data", "bad", "bad", HashMap::new());
        assert!(matches!(err, Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn list_objects_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DiskBucket::open(dir.path()).unwrap();
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
