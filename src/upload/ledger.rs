use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{BatchStatus, RawInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Queued,
    Uploading,
    Ready,
    Failed,
    Denied,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Uploading)
    }
}

/// Bookkeeping for one in-flight upload attempt.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub transient_id: Uuid,
    pub input: RawInput,
    pub status: AttemptStatus,
    pub overwrite: bool,
}

/// One line of the upload tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRow {
    pub transient_id: Uuid,
    pub name: String,
    pub status: AttemptStatus,
}

#[derive(Debug, Default)]
struct Tally {
    started: bool,
    ready: usize,
    failed: usize,
    denied: usize,
    settled: Vec<UploadRow>,
}

/// In-flight uploads keyed by transient id, plus the running tally of the
/// current batch.
///
/// Entries leave the ledger as soon as they reach a terminal status, so the
/// ledger is empty exactly when nothing is in flight. A batch lasts from the
/// first insert into an empty ledger until the ledger drains again.
#[derive(Debug, Default)]
pub struct UploadLedger {
    entries: HashMap<Uuid, LedgerEntry>,
    order: Vec<Uuid>,
    tally: Tally,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, transient_id: Uuid, input: RawInput, overwrite: bool) {
        if self.entries.is_empty() {
            self.tally = Tally {
                started: true,
                ..Tally::default()
            };
        }
        self.order.push(transient_id);
        self.entries.insert(
            transient_id,
            LedgerEntry {
                transient_id,
                input,
                status: AttemptStatus::Queued,
                overwrite,
            },
        );
    }

    /// Queued → Uploading. False when the entry is gone or already moved on.
    pub fn mark_uploading(&mut self, transient_id: Uuid) -> bool {
        match self.entries.get_mut(&transient_id) {
            Some(entry) if entry.status == AttemptStatus::Queued => {
                entry.status = AttemptStatus::Uploading;
                true
            }
            _ => false,
        }
    }

    /// Record a terminal outcome and drop the entry. `None` when the entry was
    /// already settled or cancelled.
    pub fn settle(&mut self, transient_id: Uuid, outcome: AttemptStatus) -> Option<LedgerEntry> {
        debug_assert!(outcome.is_terminal());
        let mut entry = self.entries.remove(&transient_id)?;
        self.order.retain(|id| *id != transient_id);
        entry.status = outcome;
        match outcome {
            AttemptStatus::Ready => self.tally.ready += 1,
            AttemptStatus::Denied => self.tally.denied += 1,
            _ => self.tally.failed += 1,
        }
        self.tally.settled.push(UploadRow {
            transient_id,
            name: entry.input.name.clone(),
            status: outcome,
        });
        Some(entry)
    }

    /// Settle every in-flight entry as failed and empty the ledger.
    pub fn fail_all(&mut self) -> Vec<LedgerEntry> {
        let ids = std::mem::take(&mut self.order);
        ids.into_iter()
            .filter_map(|id| self.settle(id, AttemptStatus::Failed))
            .collect()
    }

    pub fn contains(&self, transient_id: Uuid) -> bool {
        self.entries.contains_key(&transient_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True once every entry of a started batch settled and at least one was denied.
    pub fn denied(&self) -> bool {
        self.entries.is_empty() && self.tally.denied > 0
    }

    pub fn status(&self) -> BatchStatus {
        if !self.entries.is_empty() {
            BatchStatus::InProgress
        } else if !self.tally.started {
            BatchStatus::Idle
        } else if self.tally.failed + self.tally.denied > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Successful
        }
    }

    /// Settled rows of the current batch followed by the in-flight ones.
    pub fn rows(&self) -> Vec<UploadRow> {
        let mut rows = self.tally.settled.clone();
        rows.extend(self.order.iter().filter_map(|id| {
            self.entries.get(id).map(|entry| UploadRow {
                transient_id: entry.transient_id,
                name: entry.input.name.clone(),
                status: entry.status,
            })
        }));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    fn input(name: &str) -> RawInput {
        RawInput::from_bytes(name, ResourceKind::File, "text/plain", vec![1, 2, 3])
    }

    fn ledger_with(n: usize) -> (UploadLedger, Vec<Uuid>) {
        let mut ledger = UploadLedger::new();
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            ledger.insert(*id, input(&format!("{i}.txt")), false);
        }
        (ledger, ids)
    }

    #[test]
    fn batch_status_over_every_outcome_of_three_items() {
        for mask in 0u8..8 {
            let (mut ledger, ids) = ledger_with(3);
            assert_eq!(ledger.status(), BatchStatus::InProgress);

            let mut any_failed = false;
            for (bit, id) in ids.iter().enumerate() {
                assert_eq!(ledger.status(), BatchStatus::InProgress);
                let failed = mask & (1 << bit) != 0;
                any_failed |= failed;
                let outcome = if failed {
                    AttemptStatus::Failed
                } else {
                    AttemptStatus::Ready
                };
                assert!(ledger.settle(*id, outcome).is_some());
            }

            let expected = if any_failed {
                BatchStatus::Failed
            } else {
                BatchStatus::Successful
            };
            assert_eq!(ledger.status(), expected, "mask {mask:03b}");
            assert!(ledger.is_empty());
        }
    }

    #[test]
    fn fresh_ledger_is_idle() {
        assert_eq!(UploadLedger::new().status(), BatchStatus::Idle);
    }

    #[test]
    fn settling_twice_is_ignored() {
        let (mut ledger, ids) = ledger_with(1);
        assert!(ledger.settle(ids[0], AttemptStatus::Ready).is_some());
        assert!(ledger.settle(ids[0], AttemptStatus::Failed).is_none());
        assert_eq!(ledger.status(), BatchStatus::Successful);
    }

    #[test]
    fn fail_all_drains_and_is_idempotent() {
        let (mut ledger, ids) = ledger_with(3);
        assert!(ledger.mark_uploading(ids[1]));

        let failed = ledger.fail_all();
        assert_eq!(failed.len(), 3);
        assert!(ledger.is_empty());
        assert_eq!(ledger.status(), BatchStatus::Failed);
        assert!(ledger.rows().iter().all(|r| r.status == AttemptStatus::Failed));

        assert!(ledger.fail_all().is_empty());
        assert!(!ledger.mark_uploading(ids[0]));
    }

    #[test]
    fn a_new_batch_resets_the_tally() {
        let (mut ledger, ids) = ledger_with(1);
        ledger.settle(ids[0], AttemptStatus::Failed);
        assert_eq!(ledger.status(), BatchStatus::Failed);

        let next = Uuid::new_v4();
        ledger.insert(next, input("again.txt"), false);
        ledger.settle(next, AttemptStatus::Ready);
        assert_eq!(ledger.status(), BatchStatus::Successful);
        assert_eq!(ledger.rows().len(), 1);
    }

    #[test]
    fn denied_items_fail_the_batch_and_are_flagged() {
        let (mut ledger, ids) = ledger_with(2);
        ledger.settle(ids[0], AttemptStatus::Ready);
        assert!(!ledger.denied());
        ledger.settle(ids[1], AttemptStatus::Denied);
        assert!(ledger.denied());
        assert_eq!(ledger.status(), BatchStatus::Failed);
    }
}
