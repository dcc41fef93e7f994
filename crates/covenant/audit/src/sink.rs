//! Audit sinks.
//!
//! A sink stores sealed entries and tracks the chain head of every
//! session. `append` is all-or-nothing: an entry whose `previous_hash` is
//! not the current head is rejected and nothing is written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use covenant_types::ContentHash;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entry::{genesis_hash, AuditEntry};
use crate::error::{AuditError, Result};
use crate::integrity::verify_entry;

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a sealed entry to its session's chain.
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Current chain head; the genesis hash for a session with no entries.
    async fn head(&self, session_id: &str) -> Result<ContentHash>;

    /// All entries of a session, in chain order.
    async fn entries(&self, session_id: &str) -> Result<Vec<AuditEntry>>;
}

fn check_link(entry: &AuditEntry, head: &ContentHash) -> Result<()> {
    if &entry.previous_hash != head {
        warn!(
            session_id = %entry.session_id(),
            turn = entry.turn_number(),
            expected = %head,
            found = %entry.previous_hash,
            "Audit append rejected: chain mismatch"
        );
        return Err(AuditError::ChainMismatch {
            session_id: entry.session_id().to_string(),
            expected: head.clone(),
            found: entry.previous_hash.clone(),
        });
    }
    if !verify_entry(entry) {
        return Err(AuditError::InvalidEntryHash {
            session_id: entry.session_id().to_string(),
            turn_number: entry.turn_number(),
        });
    }
    Ok(())
}

/// In-memory sink for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAuditSink {
    sessions: RwLock<HashMap<String, Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut sessions = self.sessions.write();
        let chain = sessions.entry(entry.session_id().to_string()).or_default();
        let head = chain
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| genesis_hash(entry.session_id()));
        check_link(entry, &head)?;
        chain.push(entry.clone());
        Ok(())
    }

    async fn head(&self, session_id: &str) -> Result<ContentHash> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .and_then(|chain| chain.last())
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| genesis_hash(session_id)))
    }

    async fn entries(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Append-only JSON Lines sink shared by all sessions.
pub struct FileAuditSink {
    path: PathBuf,
    /// Session heads; the lock is held across the write so appends are
    /// ordered the same way on disk and in memory.
    heads: Mutex<HashMap<String, ContentHash>>,
}

impl FileAuditSink {
    /// Open (or create) the log, rebuilding session heads from its contents.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut heads = HashMap::new();
        if tokio::fs::try_exists(&path).await? {
            for entry in read_entries(&path).await? {
                heads.insert(entry.session_id().to_string(), entry.entry_hash);
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path = %path.display(), sessions = heads.len(), "Audit log opened");
        Ok(Self {
            path,
            heads: Mutex::new(heads),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in the file, in write order.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        read_entries(&self.path).await
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Corrupt {
            line: line_no,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut heads = self.heads.lock().await;
        let head = heads
            .get(entry.session_id())
            .cloned()
            .unwrap_or_else(|| genesis_hash(entry.session_id()));
        check_link(entry, &head)?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One write per entry so a line is never interleaved with another.
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        heads.insert(entry.session_id().to_string(), entry.entry_hash.clone());
        Ok(())
    }

    async fn head(&self, session_id: &str) -> Result<ContentHash> {
        Ok(self
            .heads
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| genesis_hash(session_id)))
    }

    async fn entries(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.session_id() == session_id)
            .collect())
    }
}
