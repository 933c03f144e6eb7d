//! An in-process filesystem double with no real file descriptors, used by
//! pipeline unit tests.
//!
//! Paths are named under a single filesystem-wide lock; each inode's
//! content and mutable attributes then live behind their own lock, taken
//! only after the filesystem lock has been released (§5: "per-inode and
//! per-handle locks are leaves below the filesystem lock"). No code here
//! holds the filesystem lock while holding an inode lock, and no code holds
//! two different inodes' locks at once.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use cairn_core::time::Timestamp;

use crate::{EntryKind, Error, Filesystem, Metadata};

struct Inode {
    kind: EntryKind,
    content: Mutex<Vec<u8>>,
    permissions: Mutex<u32>,
    uid: u32,
    gid: u32,
    mtime: Mutex<Timestamp>,
    device_number: i32,
    target: String,
    inode_number: u64,
}

/// An in-memory [`Filesystem`].
pub struct InMemoryFilesystem {
    tree: RwLock<HashMap<PathBuf, Arc<Inode>>>,
    next_inode: AtomicU64,
}

impl Default for InMemoryFilesystem {
    fn default() -> Self {
        let root = Inode {
            kind: EntryKind::Directory,
            content: Mutex::new(Vec::new()),
            permissions: Mutex::new(0o755),
            uid: 0,
            gid: 0,
            mtime: Mutex::new(Timestamp::default()),
            device_number: 0,
            target: String::new(),
            inode_number: 0,
        };
        let mut tree = HashMap::new();
        tree.insert(PathBuf::from("/"), Arc::new(root));
        Self { tree: RwLock::new(tree), next_inode: AtomicU64::new(1) }
    }
}

impl InMemoryFilesystem {
    /// Construct an empty filesystem containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, path: &Path) -> Result<Arc<Inode>, Error> {
        let tree = self.tree.read().expect("fs lock poisoned");
        tree.get(path).cloned().ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn next_inode_number(&self) -> u64 {
        self.next_inode.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, path: &Path, inode: Inode) {
        let mut tree = self.tree.write().expect("fs lock poisoned");
        tree.insert(path.to_path_buf(), Arc::new(inode));
    }
}

struct MemoryReader {
    data: Vec<u8>,
    position: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.position..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Filesystem for InMemoryFilesystem {
    fn metadata(&self, path: &Path) -> Result<Metadata, Error> {
        let inode = self.lookup(path)?;
        let permissions = *inode.permissions.lock().expect("inode lock poisoned");
        let mtime = *inode.mtime.lock().expect("inode lock poisoned");
        let size = inode.content.lock().expect("inode lock poisoned").len() as u64;
        Ok(Metadata {
            kind: inode.kind,
            permissions,
            uid: inode.uid,
            gid: inode.gid,
            mtime,
            size,
            inode: inode.inode_number,
            device: 0,
            device_number: inode.device_number,
            target: inode.target.clone(),
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, Error> {
        let tree = self.tree.read().expect("fs lock poisoned");
        if !tree.contains_key(path) {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let mut names: Vec<String> = tree
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|candidate| candidate.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, Error> {
        let inode = self.lookup(path)?;
        let data = inode.content.lock().expect("inode lock poisoned").clone();
        Ok(Box::new(MemoryReader { data, position: 0 }))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), Error> {
        let mut components = PathBuf::from("/");
        for part in path.strip_prefix("/").unwrap_or(path).components() {
            components.push(part);
            let exists = self.tree.read().expect("fs lock poisoned").contains_key(&components);
            if !exists {
                let inode_number = self.next_inode_number();
                self.insert(
                    &components,
                    Inode {
                        kind: EntryKind::Directory,
                        content: Mutex::new(Vec::new()),
                        permissions: Mutex::new(0o755),
                        uid: 0,
                        gid: 0,
                        mtime: Mutex::new(Timestamp::default()),
                        device_number: 0,
                        target: String::new(),
                        inode_number,
                    },
                );
            }
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        let inode_number = self.next_inode_number();
        self.insert(
            path,
            Inode {
                kind: EntryKind::File,
                content: Mutex::new(contents.to_vec()),
                permissions: Mutex::new(0o644),
                uid: 0,
                gid: 0,
                mtime: Mutex::new(Timestamp::default()),
                device_number: 0,
                target: String::new(),
                inode_number,
            },
        );
        Ok(())
    }

    fn create_symlink(&self, path: &Path, target: &str) -> Result<(), Error> {
        let inode_number = self.next_inode_number();
        self.insert(
            path,
            Inode {
                kind: EntryKind::Symlink,
                content: Mutex::new(Vec::new()),
                permissions: Mutex::new(0o777),
                uid: 0,
                gid: 0,
                mtime: Mutex::new(Timestamp::default()),
                device_number: 0,
                target: target.to_string(),
                inode_number,
            },
        );
        Ok(())
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), Error> {
        let inode = self.lookup(path)?;
        *inode.permissions.lock().expect("inode lock poisoned") = mode;
        Ok(())
    }

    fn set_mtime(&self, path: &Path, mtime: Timestamp) -> Result<(), Error> {
        let inode = self.lookup(path)?;
        *inode.mtime.lock().expect("inode lock poisoned") = mtime;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let fs = InMemoryFilesystem::new();
        fs.write_file(Path::new("/a.txt"), b"content").unwrap();
        let mut buf = Vec::new();
        fs.open_read(Path::new("/a.txt")).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"content");
    }

    #[test]
    fn create_dir_all_makes_every_ancestor() {
        let fs = InMemoryFilesystem::new();
        fs.create_dir_all(Path::new("/a/b/c")).unwrap();
        assert_eq!(fs.metadata(Path::new("/a")).unwrap().kind, EntryKind::Directory);
        assert_eq!(fs.metadata(Path::new("/a/b")).unwrap().kind, EntryKind::Directory);
        assert_eq!(fs.metadata(Path::new("/a/b/c")).unwrap().kind, EntryKind::Directory);
    }

    #[test]
    fn read_dir_lists_sorted_children() {
        let fs = InMemoryFilesystem::new();
        fs.write_file(Path::new("/b.txt"), b"").unwrap();
        fs.write_file(Path::new("/a.txt"), b"").unwrap();
        let names = fs.read_dir(Path::new("/")).unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn symlink_target_round_trips() {
        let fs = InMemoryFilesystem::new();
        fs.create_symlink(Path::new("/link"), "target").unwrap();
        let meta = fs.metadata(Path::new("/link")).unwrap();
        assert_eq!(meta.kind, EntryKind::Symlink);
        assert_eq!(meta.target, "target");
    }

    #[test]
    fn missing_path_is_not_found() {
        let fs = InMemoryFilesystem::new();
        assert!(matches!(fs.metadata(Path::new("/nope")), Err(Error::NotFound(_))));
    }
}
