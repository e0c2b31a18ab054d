//! On-disk persistence for the raft log and hard state.
//!
//! The live log is kept in `raft::storage::MemStorage`; every entry batch the
//! node appends is also written to `<log_dir>/raft.log` as length-prefixed
//! protobuf records, and the hard state to `<data_dir>/hardstate`. Replaying
//! the records in order through `MemStorage::append` reproduces the log,
//! including any conflicting suffixes raft overwrote.

use protobuf::Message as PbMessage;
use raft::prelude::{Entry, HardState};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::common::{ClusterState, RaftConfig, Result};

const LOG_FILE: &str = "raft.log";
const HARD_STATE_FILE: &str = "hardstate";

/// State recovered from disk at startup.
#[derive(Debug, Default)]
pub struct Recovered {
    pub hard_state: Option<HardState>,
    pub entries: Vec<Entry>,
}

pub struct RaftLogFile {
    log: File,
    hard_state_path: PathBuf,
}

impl RaftLogFile {
    /// Open the log files; `ClusterState::New` discards anything persisted.
    pub fn open(config: &RaftConfig) -> Result<(Self, Recovered)> {
        fs::create_dir_all(&config.log_dir)?;
        fs::create_dir_all(&config.data_dir)?;

        let log_path = config.log_dir.join(LOG_FILE);
        let hard_state_path = config.data_dir.join(HARD_STATE_FILE);

        if config.cluster_state == ClusterState::New {
            remove_if_exists(&log_path)?;
            remove_if_exists(&hard_state_path)?;
        }

        let (entries, valid_len) = read_entries(&log_path)?;
        let hard_state = read_hard_state(&hard_state_path)?;

        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;
        if log.metadata()?.len() > valid_len {
            tracing::warn!(path = %log_path.display(), valid_len, "Truncating torn raft log tail");
            log.set_len(valid_len)?;
        }

        Ok((
            Self { log, hard_state_path },
            Recovered {
                hard_state,
                entries,
            },
        ))
    }

    pub fn append(&mut self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in entries {
            let data = entry.write_to_bytes()?;
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            buf.extend_from_slice(&data);
        }
        self.log.write_all(&buf)?;
        self.log.sync_data()?;
        Ok(())
    }

    pub fn save_hard_state(&self, hard_state: &HardState) -> Result<()> {
        let data = hard_state.write_to_bytes()?;
        let tmp = self.hard_state_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.hard_state_path)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Returns the decoded entries and the byte length of the intact prefix.
fn read_entries(path: &Path) -> Result<(Vec<Entry>, u64)> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    }

    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let end = pos + 4 + len;
        if end > data.len() {
            break;
        }
        match Entry::parse_from_bytes(&data[pos + 4..end]) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), offset = pos, error = %e, "Corrupt raft log record");
                break;
            }
        }
        pos = end;
    }
    Ok((entries, pos as u64))
}

fn read_hard_state(path: &Path) -> Result<Option<HardState>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(HardState::parse_from_bytes(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
