//! Bit-stable marshalling of directory listings and file chunks.
//!
//! Every blob this crate produces carries a one-byte trailing tag (`f` for
//! a file chunk, `d` for a directory listing) so a consumer handed the
//! wrong kind of blob fails loudly instead of silently misparsing it.

#![deny(unsafe_code)]

mod wire {
    #![allow(clippy::all, clippy::pedantic, clippy::nursery)]
    include!(concat!(env!("OUT_DIR"), "/cairn.repr.v1.rs"));
}

use cairn_core::score::Score;
use cairn_core::time::Timestamp;
use prost::Message;

const FILE_TAG: u8 = b'f';
const DIR_TAG: u8 = b'd';

/// Errors raised while marshalling or unmarshalling a blob.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A file-chunk blob did not end with the `f` tag.
    #[error("malformed file blob: missing or wrong trailing tag")]
    MalformedFileBlob,
    /// A directory-listing blob did not end with the `d` tag.
    #[error("malformed directory blob: missing or wrong trailing tag")]
    MalformedDirectoryBlob,
    /// A directory listing referenced an entry kind this implementation does
    /// not recognize.
    #[error("unknown entry type: {0}")]
    UnknownEntryType(i32),
    /// The protobuf payload itself failed to decode.
    #[error("decode: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Kind of filesystem entry recorded in a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A subdirectory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A block device node.
    BlockDevice,
    /// A character device node.
    CharDevice,
    /// A named pipe (FIFO).
    NamedPipe,
    /// A Unix domain socket.
    Socket,
}

impl EntryKind {
    fn to_wire(self) -> wire::EntryKind {
        match self {
            Self::File => wire::EntryKind::File,
            Self::Directory => wire::EntryKind::Directory,
            Self::Symlink => wire::EntryKind::Symlink,
            Self::BlockDevice => wire::EntryKind::BlockDevice,
            Self::CharDevice => wire::EntryKind::CharDevice,
            Self::NamedPipe => wire::EntryKind::NamedPipe,
            Self::Socket => wire::EntryKind::Socket,
        }
    }

    fn from_wire(raw: i32) -> Result<Self, Error> {
        match wire::EntryKind::try_from(raw) {
            Ok(wire::EntryKind::File) => Ok(Self::File),
            Ok(wire::EntryKind::Directory) => Ok(Self::Directory),
            Ok(wire::EntryKind::Symlink) => Ok(Self::Symlink),
            Ok(wire::EntryKind::BlockDevice) => Ok(Self::BlockDevice),
            Ok(wire::EntryKind::CharDevice) => Ok(Self::CharDevice),
            Ok(wire::EntryKind::NamedPipe) => Ok(Self::NamedPipe),
            Ok(wire::EntryKind::Socket) => Ok(Self::Socket),
            Err(_) => Err(Error::UnknownEntryType(raw)),
        }
    }
}

/// Metadata plus child-score list for one filesystem object within a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry name (not a full path) within its containing directory.
    pub name: String,
    /// Permission bits, including setuid/setgid/sticky.
    pub permissions: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning user name, if resolved by the caller.
    pub username: Option<String>,
    /// Owning group id.
    pub gid: u32,
    /// Owning group name, if resolved by the caller.
    pub groupname: Option<String>,
    /// Modification time.
    pub mtime: Timestamp,
    /// Size in bytes (files only; zero otherwise).
    pub size: u64,
    /// Inode number.
    pub inode: u64,
    /// Containing device number (from `stat`).
    pub device: u64,
    /// Content scores, in chunk order. Empty for directories-as-children
    /// wait: a directory's own listing blob is referenced by its parent via
    /// exactly one score; symlinks/devices/pipes carry no scores.
    pub scores: Vec<Score>,
    /// Symlink target; empty for non-symlinks.
    pub target: String,
    /// Device number; meaningful only for block/char device entries.
    pub device_number: i32,
}

/// An ordered directory listing, in the order produced by the filesystem walk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryListing {
    /// Entries, in walk order.
    pub entries: Vec<FileInfo>,
}

/// Append the file-chunk tag to a raw chunk of file bytes.
#[must_use]
pub fn marshal_file(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.extend_from_slice(bytes);
    out.push(FILE_TAG);
    out
}

/// Strip and validate the file-chunk tag, returning the chunk bytes.
pub fn unmarshal_file(blob: &[u8]) -> Result<&[u8], Error> {
    match blob.split_last() {
        Some((&FILE_TAG, rest)) => Ok(rest),
        _ => Err(Error::MalformedFileBlob),
    }
}

/// Deterministically encode a directory listing and append the `d` tag.
#[must_use]
pub fn marshal_dir(listing: &DirectoryListing) -> Vec<u8> {
    let wire_listing = wire::DirectoryListing {
        entries: listing.entries.iter().map(to_wire_entry).collect(),
    };
    let mut out = wire_listing.encode_to_vec();
    out.push(DIR_TAG);
    out
}

/// Strip the `d` tag, decode, and validate a directory-listing blob.
pub fn unmarshal_dir(blob: &[u8]) -> Result<DirectoryListing, Error> {
    let (&tag, body) = blob.split_last().ok_or(Error::MalformedDirectoryBlob)?;
    if tag != DIR_TAG {
        return Err(Error::MalformedDirectoryBlob);
    }
    let wire_listing = wire::DirectoryListing::decode(body)?;
    let entries = wire_listing
        .entries
        .into_iter()
        .map(from_wire_entry)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DirectoryListing { entries })
}

fn to_wire_entry(info: &FileInfo) -> wire::FileInfo {
    wire::FileInfo {
        kind: info.kind.to_wire() as i32,
        name: info.name.clone(),
        permissions: info.permissions,
        uid: info.uid,
        username: info.username.clone(),
        gid: info.gid,
        groupname: info.groupname.clone(),
        // Never produced on encode, even if a caller populated it upstream.
        hardlink_target: None,
        mtime: Some(wire::Mtime { second: info.mtime.second, nanosecond: info.mtime.nanosecond }),
        size: info.size,
        inode: info.inode,
        blob: info.scores.iter().map(|s| wire::ScoreRef { hash: s.as_bytes().to_vec() }).collect(),
        target: info.target.clone(),
        device_number: info.device_number,
        device: info.device,
    }
}

fn from_wire_entry(entry: wire::FileInfo) -> Result<FileInfo, Error> {
    let kind = EntryKind::from_wire(entry.kind)?;
    let mtime = entry
        .mtime
        .map(|m| Timestamp::new(m.second, m.nanosecond))
        .unwrap_or_default();
    let mut scores = Vec::with_capacity(entry.blob.len());
    for s in entry.blob {
        let mut raw = [0u8; cairn_core::score::SCORE_LEN];
        if s.hash.len() != raw.len() {
            return Err(Error::MalformedDirectoryBlob);
        }
        raw.copy_from_slice(&s.hash);
        scores.push(Score::from_raw(raw));
    }
    Ok(FileInfo {
        kind,
        name: entry.name,
        permissions: entry.permissions,
        uid: entry.uid,
        username: entry.username,
        gid: entry.gid,
        groupname: entry.groupname,
        mtime,
        size: entry.size,
        inode: entry.inode,
        device: entry.device,
        scores,
        target: entry.target,
        device_number: entry.device_number,
    })
}
