//! Backup pipeline (§4.8): filesystem walk, file chunking, directory
//! listing encoding, score emission.

use std::io::Read;
use std::path::Path;

use blob_store::Store;
use cairn_core::score::Score;
use fs_vfs::{EntryKind as FsEntryKind, Filesystem};
use regex::Regex;
use repr::{DirectoryListing, FileInfo};

use crate::{Error, RootHandle};

/// Backup-pipeline configuration: chunk size and exclusion patterns.
///
/// Chunk size and the exclusion regex dialect are configuration, not core
/// contract (§9) — a caller builds this once per [`crate::Session::save`]
/// call rather than the engine sourcing it from flags or the environment.
pub struct BackupOptions {
    excludes: Vec<Regex>,
    chunk_size: usize,
}

impl BackupOptions {
    /// Compile `excludes` (regular expressions matched against an entry's
    /// path relative to the source directory) and pair them with a chunk
    /// size for the file saver.
    pub fn new(excludes: &[String], chunk_size: usize) -> Result<Self, Error> {
        let excludes = excludes.iter().map(|pattern| Regex::new(pattern)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { excludes, chunk_size })
    }

    fn is_excluded(&self, relative_path: &Path) -> bool {
        let path = relative_path.to_string_lossy();
        self.excludes.iter().any(|re| re.is_match(&path))
    }
}

fn to_repr_kind(kind: FsEntryKind) -> repr::EntryKind {
    match kind {
        FsEntryKind::File => repr::EntryKind::File,
        FsEntryKind::Directory => repr::EntryKind::Directory,
        FsEntryKind::Symlink => repr::EntryKind::Symlink,
        FsEntryKind::BlockDevice => repr::EntryKind::BlockDevice,
        FsEntryKind::CharDevice => repr::EntryKind::CharDevice,
        FsEntryKind::NamedPipe => repr::EntryKind::NamedPipe,
        FsEntryKind::Socket => repr::EntryKind::Socket,
    }
}

/// Save `source_path` (and everything beneath it) through `store`, and
/// return a handle on the root: its score plus the root directory's own
/// permissions and mtime, which have no parent listing to live in.
pub(crate) fn save(
    filesystem: &dyn Filesystem,
    store: &dyn Store,
    source_path: &Path,
    options: &BackupOptions,
) -> Result<RootHandle, Error> {
    let root_meta = filesystem.metadata(source_path)?;
    let score = save_dir(filesystem, store, source_path, Path::new(""), options)?;
    Ok(RootHandle { score, permissions: root_meta.permissions, mtime: root_meta.mtime })
}

fn save_dir(
    filesystem: &dyn Filesystem,
    store: &dyn Store,
    absolute_path: &Path,
    relative_path: &Path,
    options: &BackupOptions,
) -> Result<Score, Error> {
    let mut names = filesystem.read_dir(absolute_path)?;
    names.sort();

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let child_absolute = absolute_path.join(&name);
        let child_relative = relative_path.join(&name);
        if options.is_excluded(&child_relative) {
            continue;
        }

        let meta = filesystem.metadata(&child_absolute)?;
        let scores = match meta.kind {
            FsEntryKind::File => save_file(filesystem, store, &child_absolute, options.chunk_size)?,
            FsEntryKind::Directory => {
                vec![save_dir(filesystem, store, &child_absolute, &child_relative, options)?]
            }
            FsEntryKind::Symlink | FsEntryKind::BlockDevice | FsEntryKind::CharDevice | FsEntryKind::NamedPipe | FsEntryKind::Socket => {
                Vec::new()
            }
        };

        entries.push(FileInfo {
            kind: to_repr_kind(meta.kind),
            name,
            permissions: meta.permissions,
            uid: meta.uid,
            username: None,
            gid: meta.gid,
            groupname: None,
            mtime: meta.mtime,
            size: meta.size,
            inode: meta.inode,
            device: meta.device,
            scores,
            target: meta.target,
            device_number: meta.device_number,
        });
    }

    let blob = repr::marshal_dir(&DirectoryListing { entries });
    Ok(store.save(&blob)?)
}

/// Chunk `path`'s contents into `chunk_size`-byte pieces (the last may be
/// shorter), saving each as a tagged file-chunk blob.
fn save_file(
    filesystem: &dyn Filesystem,
    store: &dyn Store,
    path: &Path,
    chunk_size: usize,
) -> Result<Vec<Score>, Error> {
    let mut reader = filesystem.open_read(path)?;
    let mut scores = Vec::new();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let filled = read_chunk(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        let blob = repr::marshal_file(&buf[..filled]);
        scores.push(store.save(&blob)?);
        if filled < chunk_size {
            break;
        }
    }
    Ok(scores)
}

/// Fill `buf` from `reader` as far as it will go (a short read is not
/// necessarily EOF), returning how many bytes were actually read.
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
