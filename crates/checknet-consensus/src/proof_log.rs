// PROOF LOG
// Append-only record of every proof a checker has issued.
//
// SAFETY INVARIANTS:
// 1. Entries are only ever appended, never rewritten
// 2. last_proof_hash(checker) is the hash of the most recently appended entry for that checker
// 3. A file-backed log recovers the same chain heads after a restart
// 4. Only a torn final line is discarded on reopen; damage anywhere else is an error

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofLogError {
    #[error("Proof log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Proof log encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Corrupt proof log entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofLogEntry {
    pub checker_id: String,
    pub proof_hash: String,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
}

pub trait ProofLog: Send + Sync {
    /// Hash of the checker's most recent proof, if it has issued any.
    fn last_proof_hash(&self, checker_id: &str) -> Result<Option<String>, ProofLogError>;

    fn append(&self, entry: ProofLogEntry) -> Result<(), ProofLogError>;
}

/// Process-lifetime proof log.
#[derive(Debug, Default)]
pub struct MemoryProofLog {
    entries: Mutex<Vec<ProofLogEntry>>,
}

impl MemoryProofLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ProofLogEntry> {
        self.entries.lock().clone()
    }
}

impl ProofLog for MemoryProofLog {
    fn last_proof_hash(&self, checker_id: &str) -> Result<Option<String>, ProofLogError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .rev()
            .find(|e| e.checker_id == checker_id)
            .map(|e| e.proof_hash.clone()))
    }

    fn append(&self, entry: ProofLogEntry) -> Result<(), ProofLogError> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

struct JsonlState {
    file: File,
    heads: HashMap<String, String>,
}

/// JSON-lines file, one entry per line.
pub struct JsonlProofLog {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlProofLog {
    /// Open (or create) the log at `path`, replaying existing entries to recover chain heads.
    ///
    /// An undecodable final line is a torn append: it is dropped and the file truncated
    /// back to the last complete entry. Undecodable lines before it are `Corrupt`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProofLogError> {
        let path = path.as_ref().to_path_buf();
        let mut heads = HashMap::new();
        let mut replayed = 0usize;

        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let lines: Vec<&str> = contents.split_inclusive('\n').collect();
            let mut offset = 0u64;
            for (idx, raw) in lines.iter().enumerate() {
                let line = raw.trim();
                if !line.is_empty() {
                    match serde_json::from_str::<ProofLogEntry>(line) {
                        Ok(entry) => {
                            heads.insert(entry.checker_id, entry.proof_hash);
                            replayed += 1;
                        }
                        Err(e) if idx + 1 == lines.len() => {
                            warn!(
                                "Dropping torn entry at line {} of proof log {}: {}",
                                idx + 1,
                                path.display(),
                                e
                            );
                            OpenOptions::new().write(true).open(&path)?.set_len(offset)?;
                            break;
                        }
                        Err(e) => {
                            return Err(ProofLogError::Corrupt {
                                line: idx + 1,
                                reason: e.to_string(),
                            })
                        }
                    }
                }
                offset += raw.len() as u64;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Opened proof log {} ({} entries)", path.display(), replayed);

        Ok(JsonlProofLog {
            path,
            state: Mutex::new(JsonlState { file, heads }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProofLog for JsonlProofLog {
    fn last_proof_hash(&self, checker_id: &str) -> Result<Option<String>, ProofLogError> {
        Ok(self.state.lock().heads.get(checker_id).cloned())
    }

    fn append(&self, entry: ProofLogEntry) -> Result<(), ProofLogError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        state.file.write_all(&line)?;
        state.file.flush()?;
        debug!("Appended proof {} at height {}", entry.proof_hash, entry.block_height);
        state.heads.insert(entry.checker_id, entry.proof_hash);
        Ok(())
    }
}
