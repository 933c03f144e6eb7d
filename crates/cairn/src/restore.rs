//! Restore pipeline (§4.9): a DAG-engine-driven inverse walk. The resolver
//! loads and parses directory listings; the visitor reconstructs files,
//! directories, and symlinks, then restores permissions and mtime.
//! Ownership (UID/GID) is never restored (§1 Non-goals).

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use blob_store::Store;
use cairn_core::score::Score;
use dag::Cancel;
use fs_vfs::Filesystem;
use repr::{EntryKind, FileInfo};

use crate::{Error, RootHandle};

/// One node of the restore DAG: a destination path, its directory score
/// (only meaningful while the node is still unresolved), and the listing
/// entry that produced it. The root's `info` is synthesized from its
/// [`RootHandle`] rather than taken from a parent listing, since it has
/// none of its own.
#[derive(Clone, Debug)]
struct RestoreNode {
    path: PathBuf,
    score: Option<Score>,
    info: FileInfo,
}

impl PartialEq for RestoreNode {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl Eq for RestoreNode {}
impl Hash for RestoreNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

pub(crate) fn restore(
    filesystem: &dyn Filesystem,
    store: &dyn Store,
    root: RootHandle,
    dest_path: &std::path::Path,
    workers: usize,
) -> Result<(), Error> {
    let root_info = FileInfo {
        kind: EntryKind::Directory,
        name: String::new(),
        permissions: root.permissions,
        uid: 0,
        username: None,
        gid: 0,
        groupname: None,
        mtime: root.mtime,
        size: 0,
        inode: 0,
        device: 0,
        scores: Vec::new(),
        target: String::new(),
        device_number: 0,
    };
    let root_node = RestoreNode { path: dest_path.to_path_buf(), score: Some(root.score), info: root_info };
    dag::traverse(
        vec![root_node],
        workers,
        |node: &RestoreNode, cancel: &Cancel| resolve(node, store, cancel),
        |node: &RestoreNode, cancel: &Cancel| visit(node, filesystem, store, cancel),
    )
    .map_err(|e| Error::Dag(Box::new(e)))
}

fn resolve(node: &RestoreNode, store: &dyn Store, _cancel: &Cancel) -> Result<Vec<RestoreNode>, Error> {
    if node.info.kind != EntryKind::Directory {
        return Ok(Vec::new());
    }

    let score = node.score.expect("a directory restore node always carries a score");
    let blob = store.load(&score)?;
    let listing = repr::unmarshal_dir(&blob)?;

    let mut children = Vec::with_capacity(listing.entries.len());
    for entry in listing.entries {
        let child_path = node.path.join(&entry.name);
        let child_score = match entry.kind {
            EntryKind::Directory => {
                let score = entry
                    .scores
                    .first()
                    .copied()
                    .ok_or_else(|| Error::MalformedDirectoryEntry(child_path.display().to_string()))?;
                Some(score)
            }
            _ => None,
        };
        children.push(RestoreNode { path: child_path, score: child_score, info: entry });
    }
    Ok(children)
}

fn visit(node: &RestoreNode, filesystem: &dyn Filesystem, store: &dyn Store, _cancel: &Cancel) -> Result<(), Error> {
    let info = &node.info;

    if let Some(parent) = node.path.parent() {
        filesystem.create_dir_all(parent)?;
    }

    match info.kind {
        EntryKind::File => {
            let mut contents = Vec::with_capacity(info.size as usize);
            for score in &info.scores {
                let blob = store.load(score)?;
                contents.extend_from_slice(repr::unmarshal_file(&blob)?);
            }
            filesystem.write_file(&node.path, &contents)?;
            filesystem.set_permissions(&node.path, info.permissions)?;
            filesystem.set_mtime(&node.path, info.mtime)?;
        }
        EntryKind::Directory => {
            filesystem.create_dir_all(&node.path)?;
            filesystem.set_permissions(&node.path, info.permissions)?;
            filesystem.set_mtime(&node.path, info.mtime)?;
        }
        EntryKind::Symlink => {
            if !info.scores.is_empty() {
                return Err(Error::MalformedSymlink(node.path.display().to_string()));
            }
            filesystem.create_symlink(&node.path, &info.target)?;
            // Symlink permissions are not meaningful on most platforms and
            // there is no safe (non-`unsafe`) way to `lchmod`; only mtime,
            // which `set_mtime` restores without following the link, is
            // restored here.
            filesystem.set_mtime(&node.path, info.mtime)?;
        }
        EntryKind::BlockDevice | EntryKind::CharDevice | EntryKind::NamedPipe | EntryKind::Socket => {
            // Device/pipe/socket reconstruction is outside what the
            // filesystem capability exposes; the restore pipeline leaves
            // these entries as metadata-only, matching what the backup
            // pipeline itself stores for them (an empty score list).
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::time::Timestamp;
    use fs_vfs::memory::InMemoryFilesystem;
    use object_store::memory::MemoryBucket;
    use std::io::Read;
    use std::path::Path;

    fn test_store() -> impl Store {
        blob_store::build(MemoryBucket::new(), &(0..32).collect::<Vec<u8>>(), "blobs/").unwrap()
    }

    #[test]
    fn restores_an_empty_directory() {
        let source = InMemoryFilesystem::new();
        source.set_permissions(Path::new("/"), 0o700).unwrap();
        source.set_mtime(Path::new("/"), Timestamp::new(1_700_000_000, 0)).unwrap();
        let options = crate::BackupOptions::new(&[], 16).unwrap();
        let store = test_store();
        let root = crate::backup::save(&source, &store, Path::new("/"), &options).unwrap();

        let dest = InMemoryFilesystem::new();
        restore(&dest, &store, root, Path::new("/out"), 2).unwrap();
        let meta = dest.metadata(Path::new("/out")).unwrap();
        assert_eq!(meta.kind, fs_vfs::EntryKind::Directory);
        assert_eq!(meta.permissions, 0o700);
        assert_eq!(meta.mtime, Timestamp::new(1_700_000_000, 0));
    }

    #[test]
    fn round_trips_a_file_byte_for_byte() {
        let source = InMemoryFilesystem::new();
        let contents: Vec<u8> = (0..40).map(|i| i as u8).collect();
        source.write_file(Path::new("/a.bin"), &contents).unwrap();
        source.set_mtime(Path::new("/a.bin"), Timestamp::new(1_700_000_000, 0)).unwrap();
        let options = crate::BackupOptions::new(&[], 16).unwrap();
        let store = test_store();
        let root = crate::backup::save(&source, &store, Path::new("/"), &options).unwrap();

        let dest = InMemoryFilesystem::new();
        restore(&dest, &store, root, Path::new("/out"), 2).unwrap();

        let mut buf = Vec::new();
        dest.open_read(Path::new("/out/a.bin")).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, contents);
    }

    #[test]
    fn round_trips_a_symlink() {
        let source = InMemoryFilesystem::new();
        source.create_symlink(Path::new("/link"), "target").unwrap();
        let options = crate::BackupOptions::new(&[], 16).unwrap();
        let store = test_store();
        let root = crate::backup::save(&source, &store, Path::new("/"), &options).unwrap();

        let dest = InMemoryFilesystem::new();
        restore(&dest, &store, root, Path::new("/out"), 2).unwrap();
        let meta = dest.metadata(Path::new("/out/link")).unwrap();
        assert_eq!(meta.kind, fs_vfs::EntryKind::Symlink);
        assert_eq!(meta.target, "target");
    }
}
