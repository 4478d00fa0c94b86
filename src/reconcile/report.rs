//! Reconciliation report

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// No discrepancies were found
    pub synced: bool,
    /// Human-readable description of each drift found
    pub discrepancies: Vec<String>,
    /// Trades moved `pending -> open`
    pub promoted: usize,
    /// Trades moved to `unknown`
    pub marked_unknown: usize,
    /// Trades created for venue positions the ledger did not know about
    pub synthesized: usize,
    /// Trades left alone because they are inside the grace period
    pub skipped_recent: usize,
    pub checked_at: DateTime<Utc>,
}

impl ReconcileReport {
    pub(crate) fn new(checked_at: DateTime<Utc>) -> Self {
        Self {
            synced: true,
            discrepancies: Vec::new(),
            promoted: 0,
            marked_unknown: 0,
            synthesized: 0,
            skipped_recent: 0,
            checked_at,
        }
    }

    pub(crate) fn discrepancy(&mut self, message: String) {
        self.discrepancies.push(message);
        self.synced = false;
    }

    /// Whether the pass changed anything in the ledger
    pub fn changed_ledger(&self) -> bool {
        self.promoted + self.marked_unknown + self.synthesized > 0
    }
}
