//! An append-only JSONL log of verified DAG nodes (§4.10's "persisted
//! known-structure map from prior runs").
//!
//! A verify run loads every record the ledger already holds into an
//! in-memory known-structure map, then appends each newly-emitted record as
//! the traversal produces it. A killed verify run resumes without
//! re-hashing subtrees an earlier run already certified.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::hash::Hash;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use cairn_core::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Errors raised while reading or appending to a ledger.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying file I/O failed.
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    /// A line in the ledger file was not valid JSON for its record type.
    #[error("ledger record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One verified node, durable for resumption: `{time, node, children}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<N> {
    /// When this node was verified.
    pub time: Timestamp,
    /// The node's identifier.
    pub node: N,
    /// The node's direct children, as returned by the resolver.
    pub children: Vec<N>,
}

/// An append-only JSONL ledger of [`Record`]s, keyed by node identifier `N`.
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    /// Open (creating if absent) a ledger backed by a file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        }
        Ok(Self { path })
    }

    /// Append one record. Flushed before returning, so a verify run killed
    /// immediately after this call has the record durable.
    pub fn append<N: Serialize>(&self, record: &Record<N>) -> Result<(), Error> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Load every record this ledger holds into a node-to-children map, for
    /// a verify run to consult before re-visiting a node.
    pub fn load_known_structure<N>(&self) -> Result<HashMap<N, Vec<N>>, Error>
    where
        N: Eq + Hash + Clone + for<'de> Deserialize<'de>,
    {
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut known = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: Record<N> = serde_json::from_str(&line)?;
            known.insert(record.node, record.children);
        }
        Ok(known)
    }
}
