//! The real filesystem: every [`Filesystem`] method delegates straight to
//! the OS. Carries no lock of its own — the kernel already serializes
//! conflicting syscalls on the same path.

use std::fs;
use std::io::Read;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

use filetime::FileTime;

use cairn_core::time::Timestamp;

use crate::{EntryKind, Error, Filesystem, Metadata};

/// A [`Filesystem`] backed directly by OS syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

impl RealFilesystem {
    /// Construct a handle onto the real filesystem.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn classify(file_type: fs::FileType) -> EntryKind {
    if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_block_device() {
        EntryKind::BlockDevice
    } else if file_type.is_char_device() {
        EntryKind::CharDevice
    } else if file_type.is_fifo() {
        EntryKind::NamedPipe
    } else {
        EntryKind::Socket
    }
}

impl Filesystem for RealFilesystem {
    fn metadata(&self, path: &Path) -> Result<Metadata, Error> {
        let meta = fs::symlink_metadata(path).map_err(|e| map_not_found(path, e))?;
        let kind = classify(meta.file_type());
        let target = if kind == EntryKind::Symlink {
            fs::read_link(path)?.to_string_lossy().into_owned()
        } else {
            String::new()
        };
        Ok(Metadata {
            kind,
            permissions: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec() as u32),
            size: meta.size(),
            inode: meta.ino(),
            device: meta.dev(),
            device_number: if matches!(kind, EntryKind::BlockDevice | EntryKind::CharDevice) {
                meta.rdev() as i32
            } else {
                0
            },
            target,
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| map_not_found(path, e))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, Error> {
        Ok(Box::new(fs::File::open(path).map_err(|e| map_not_found(path, e))?))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), Error> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        fs::write(path, contents)?;
        Ok(())
    }

    fn create_symlink(&self, path: &Path, target: &str) -> Result<(), Error> {
        std::os::unix::fs::symlink(target, path)?;
        Ok(())
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), Error> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn set_mtime(&self, path: &Path, mtime: Timestamp) -> Result<(), Error> {
        let stamp = FileTime::from_unix_time(mtime.second, mtime.nanosecond);
        filetime::set_symlink_file_times(path, stamp, stamp)?;
        Ok(())
    }
}

fn map_not_found(path: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.display().to_string())
    } else {
        Error::Io(e)
    }
}
