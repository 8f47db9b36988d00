pub mod recon;

/// Outcome of one per-item operation inside a sync batch. Batches are
/// best-effort: a failed item is recorded and the loop moves on, so the
/// result is data, not control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Skipped(String),
    Failed(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed(_))
    }
}
