//! Durable half-message journal.
//!
//! A half-message is accepted and persisted here before the local
//! transaction runs, and stays invisible to consumers until a commit
//! publishes it to the broker. The journal is append-only JSONL; the
//! current pending set is recovered by folding it, so a crash between
//! accept and resolution leaves the message for the check-back sweep.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::now_millis;

#[derive(Debug, thiserror::Error)]
pub enum HalfStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown is not a terminal outcome")]
    NotTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnOutcome {
    Commit,
    Rollback,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalfMessage {
    pub topic: String,
    pub key: String,
    pub tag: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum JournalEntry {
    Enqueued {
        id: u64,
        at_ms: i64,
        msg: HalfMessage,
    },
    Resolved {
        id: u64,
        at_ms: i64,
        outcome: TxnOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHalf {
    pub id: u64,
    pub enqueued_at_ms: i64,
    pub msg: HalfMessage,
}

#[derive(Debug)]
pub struct HalfStore {
    path: PathBuf,
    next_id: AtomicU64,
}

impl HalfStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, HalfStoreError> {
        fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join("half-messages.jsonl");
        if !path.exists() {
            let _ = OpenOptions::new().create(true).append(true).open(&path)?;
        }

        let mut max_id = 0;
        for entry in read_entries(&path)? {
            let id = match entry {
                JournalEntry::Enqueued { id, .. } => id,
                JournalEntry::Resolved { id, .. } => id,
            };
            max_id = max_id.max(id);
        }

        Ok(Self {
            path,
            next_id: AtomicU64::new(max_id + 1),
        })
    }

    pub fn enqueue(&self, msg: &HalfMessage) -> Result<u64, HalfStoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.append(&JournalEntry::Enqueued {
            id,
            at_ms: now_millis(),
            msg: msg.clone(),
        })?;
        Ok(id)
    }

    pub fn resolve(&self, id: u64, outcome: TxnOutcome) -> Result<(), HalfStoreError> {
        if outcome == TxnOutcome::Unknown {
            return Err(HalfStoreError::NotTerminal);
        }
        self.append(&JournalEntry::Resolved {
            id,
            at_ms: now_millis(),
            outcome,
        })
    }

    pub fn pending(&self) -> Result<Vec<PendingHalf>, HalfStoreError> {
        let mut open: HashMap<u64, PendingHalf> = HashMap::new();
        for entry in read_entries(&self.path)? {
            match entry {
                JournalEntry::Enqueued { id, at_ms, msg } => {
                    open.insert(
                        id,
                        PendingHalf {
                            id,
                            enqueued_at_ms: at_ms,
                            msg,
                        },
                    );
                }
                JournalEntry::Resolved { id, .. } => {
                    open.remove(&id);
                }
            }
        }
        let mut out: Vec<PendingHalf> = open.into_values().collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), HalfStoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(entry)?.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, HalfStoreError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(body: &str) -> HalfMessage {
        HalfMessage {
            topic: "trade-order".to_string(),
            key: "order_1".to_string(),
            tag: "ORDER_PLACED".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn enqueue_then_resolve_drains_pending() {
        let dir = TempDir::new().unwrap();
        let store = HalfStore::open(dir.path()).unwrap();

        let a = store.enqueue(&sample("a")).unwrap();
        let b = store.enqueue(&sample("b")).unwrap();
        assert_eq!(store.pending().unwrap().len(), 2);

        store.resolve(a, TxnOutcome::Commit).unwrap();
        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
        assert_eq!(pending[0].msg.body, "b");

        store.resolve(b, TxnOutcome::Rollback).unwrap();
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn unknown_is_rejected_as_terminal_outcome() {
        let dir = TempDir::new().unwrap();
        let store = HalfStore::open(dir.path()).unwrap();
        let id = store.enqueue(&sample("a")).unwrap();
        assert!(matches!(
            store.resolve(id, TxnOutcome::Unknown),
            Err(HalfStoreError::NotTerminal)
        ));
    }

    #[test]
    fn reopen_recovers_pending_and_id_counter() {
        let dir = TempDir::new().unwrap();
        let first_id;
        {
            let store = HalfStore::open(dir.path()).unwrap();
            first_id = store.enqueue(&sample("a")).unwrap();
            let committed = store.enqueue(&sample("b")).unwrap();
            store.resolve(committed, TxnOutcome::Commit).unwrap();
        }

        let reopened = HalfStore::open(dir.path()).unwrap();
        let pending = reopened.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first_id);

        let next = reopened.enqueue(&sample("c")).unwrap();
        assert!(next > first_id);
    }
}
