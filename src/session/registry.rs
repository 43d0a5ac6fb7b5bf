use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Advisory tag derived from the command line. Never used for control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Interpreter,
    Shell,
}

impl Classification {
    pub fn from_command(command: &str, interpreter_tokens: &[String]) -> Self {
        if interpreter_tokens.iter().any(|token| command.contains(token.as_str())) {
            Classification::Interpreter
        } else {
            Classification::Shell
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub id: u32,
    /// Distinguishes sessions that share a pid after the OS reuses it.
    #[serde(skip)]
    pub seq: u64,
    pub command_line: String,
    pub classification: Classification,
    pub started_at: DateTime<Utc>,
}

/// Pid-keyed table of tracked sessions.
///
/// Clones share the same table. Mutation is restricted to the session module.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    records: Arc<StdMutex<HashMap<u32, ProcessRecord>>>,
    next_seq: Arc<AtomicU64>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<u32, ProcessRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a freshly spawned record. A stale entry under the same pid
    /// (the OS reused it after an abandoned stream) is replaced.
    pub(super) fn insert(&self, record: ProcessRecord) {
        let mut records = self.guard();
        if let Some(stale) = records.insert(record.id, record) {
            warn!(pid = stale.id, command = %stale.command_line, "Replaced stale registry entry for reused pid");
        }
    }

    pub(super) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Removes the entry for `id` only if it still belongs to spawn `seq`.
    pub(super) fn remove(&self, id: u32, seq: u64) -> Option<ProcessRecord> {
        let mut records = self.guard();
        match records.get(&id) {
            Some(record) if record.seq == seq => records.remove(&id),
            Some(_) => {
                debug!(pid = id, seq, "Registry entry belongs to a newer session, leaving it");
                None
            }
            None => None,
        }
    }

    pub fn get(&self, id: u32) -> Option<ProcessRecord> {
        self.guard().get(&id).cloned()
    }

    /// Records whose command line contains `needle` anywhere.
    pub fn matching(&self, needle: &str) -> Vec<ProcessRecord> {
        let mut matches: Vec<ProcessRecord> = self
            .guard()
            .values()
            .filter(|record| record.command_line.contains(needle))
            .cloned()
            .collect();
        matches.sort_by_key(|record| (record.started_at, record.id));
        matches
    }

    /// Point-in-time copy, oldest spawn first.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<ProcessRecord> = self.guard().values().cloned().collect();
        records.sort_by_key(|record| (record.started_at, record.id));
        records
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
