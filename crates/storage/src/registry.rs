#![forbid(unsafe_code)]

use crate::StoreError;
use gm_core::pids::PidSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PID_FILE_NAME: &str = "clients.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PidFile {
    #[serde(default)]
    pids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PidFileRepr {
    Current(PidFile),
    Legacy(Vec<u32>),
}

/// Parses `{"pids":[..]}` or the legacy bare array. Blank input is an empty set.
pub fn decode_pid_set(raw: &str) -> Result<PidSet, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(PidSet::new());
    }
    let pids = match serde_json::from_str::<PidFileRepr>(raw)? {
        PidFileRepr::Current(file) => file.pids,
        PidFileRepr::Legacy(pids) => pids,
    };
    Ok(PidSet::from_pids(pids))
}

pub fn encode_pid_set(set: &PidSet) -> Result<String, serde_json::Error> {
    serde_json::to_string(&PidFile {
        pids: set.as_slice().to_vec(),
    })
}

/// Persisted reference count of clients using the shared backend.
///
/// Every call re-reads, mutates and re-writes the whole file. There is no in-process cache and
/// no cross-process lock: two processes writing at the same instant can lose one update. Client
/// launches are human-paced, and any entry lost or left behind is repaired by the next
/// `remove` reconciliation pass.
#[derive(Clone, Debug)]
pub struct PidRegistry {
    path: PathBuf,
}

impl PidRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PID_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current set. Missing, unreadable or corrupt files read as empty.
    pub fn read(&self) -> PidSet {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return PidSet::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "pid registry unreadable; treating as empty");
                return PidSet::new();
            }
        };
        match decode_pid_set(&raw) {
            Ok(set) => set,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "corrupt pid registry; treating as empty");
                PidSet::new()
            }
        }
    }

    /// Registers `pid`. Already-present ids cause no write.
    pub fn add(&self, pid: u32) -> Result<PidSet, StoreError> {
        let mut set = self.read();
        if !set.insert(pid) {
            tracing::debug!(pid, "pid already registered");
            return Ok(set);
        }
        self.write(&set)?;
        tracing::debug!(pid, clients = set.len(), "registered client");
        Ok(set)
    }

    /// Drops `pid` plus every entry whose process is gone, persists, and returns what is left.
    pub fn remove<F>(&self, pid: u32, is_alive: F) -> Result<PidSet, StoreError>
    where
        F: FnMut(u32) -> bool,
    {
        let mut set = self.read();
        set.remove(pid);
        let dropped = set.retain_alive(is_alive);
        if !dropped.is_empty() {
            tracing::info!(?dropped, "reconciled dead clients out of registry");
        }
        self.write(&set)?;
        tracing::debug!(pid, clients = set.len(), "deregistered client");
        Ok(set)
    }

    fn write(&self, set: &PidSet) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let body = encode_pid_set(set)?;
        // Rename keeps readers from ever observing a half-written file.
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, body)?;
        if let Err(err) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}
