//! Guest roster persistence.
//!
//! A single JSON file mapping guest name → record, read wholesale at load
//! and rewritten wholesale on every change. A missing or corrupt file loads
//! as the empty roster; there is no way to tell the two apart, which is the
//! documented behavior for this store.

use chrono::{DateTime, Utc};
use festa_core::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One registered guest. The name doubles as the roster key and the album
/// directory name; re-registering under the same name overwrites silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestRecord {
    pub name: String,
    /// L2-normalized ArcFace embedding of the guest's selfie.
    pub embedding: Embedding,
    /// Filename of the stored selfie under the guest-photos directory.
    pub selfie_file: String,
    pub registered_at: DateTime<Utc>,
}

/// Read-all/write-all roster store.
#[derive(Debug)]
pub struct GuestRoster {
    path: PathBuf,
    guests: BTreeMap<String, GuestRecord>,
}

impl GuestRoster {
    /// Load the roster from disk. Missing or unreadable content yields an
    /// empty roster with a warning rather than an error.
    pub fn load(path: PathBuf) -> Self {
        let guests = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "roster file unreadable; starting with an empty roster"
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "roster file unreadable; starting with an empty roster"
                );
                BTreeMap::new()
            }
        };

        Self { path, guests }
    }

    /// Rewrite the whole roster file.
    pub fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.guests).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, json)
    }

    /// Insert or overwrite a guest record, returning the previous record
    /// under the same name if there was one.
    pub fn insert(&mut self, record: GuestRecord) -> Option<GuestRecord> {
        self.guests.insert(record.name.clone(), record)
    }

    pub fn get(&self, name: &str) -> Option<&GuestRecord> {
        self.guests.get(name)
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    /// Clone of all records, for a match pass over a stable snapshot.
    pub fn snapshot(&self) -> Vec<GuestRecord> {
        self.guests.values().cloned().collect()
    }
}
