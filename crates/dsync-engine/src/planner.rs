//! Batch planner
//!
//! Splits each side of a [`Diff`] into batches of at most `batch_size`
//! entries. Removals are planned first. The plan is a pure function of the
//! diff, so re-running after a partial failure replays the same batches.

use dsync_core::{Batch, BatchKind, Diff, SyncError, SyncResult, TrustEntry};

/// Ordered list of batches for one network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Batches in execution order
    pub batches: Vec<Batch>,
}

impl Plan {
    /// Whether there is nothing to execute
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of entries granted by the plan
    pub fn additions(&self) -> usize {
        self.count(BatchKind::Add)
    }

    /// Number of entries revoked by the plan
    pub fn removals(&self) -> usize {
        self.count(BatchKind::Remove)
    }

    fn count(&self, kind: BatchKind) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.kind == kind)
            .map(|batch| batch.entries.len())
            .sum()
    }
}

/// Plan `diff` into batches of at most `batch_size` entries
pub fn plan(diff: &Diff, batch_size: usize) -> SyncResult<Plan> {
    if batch_size == 0 {
        return Err(SyncError::config("batch size must be at least 1"));
    }

    let mut batches = Vec::new();
    push_batches(&mut batches, BatchKind::Remove, &diff.to_remove, batch_size);
    push_batches(&mut batches, BatchKind::Add, &diff.to_add, batch_size);
    Ok(Plan { batches })
}

fn push_batches(batches: &mut Vec<Batch>, kind: BatchKind, entries: &[TrustEntry], size: usize) {
    for chunk in entries.chunks(size) {
        batches.push(Batch {
            kind,
            index: batches.len(),
            entries: chunk.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn entries(range: std::ops::Range<u8>) -> Vec<TrustEntry> {
        range.map(|b| TrustEntry::approve_only(Address::repeat_byte(b))).collect()
    }

    #[test]
    fn test_batches_respect_size_bound() {
        let diff = Diff {
            to_add: entries(1..8),
            to_remove: entries(10..13),
        };
        let plan = plan(&diff, 3).unwrap();
        let sizes: Vec<_> = plan.batches.iter().map(|b| (b.kind, b.entries.len())).collect();
        assert_eq!(
            sizes,
            vec![
                (BatchKind::Remove, 3),
                (BatchKind::Add, 3),
                (BatchKind::Add, 3),
                (BatchKind::Add, 1),
            ]
        );
        assert_eq!(plan.additions(), 7);
        assert_eq!(plan.removals(), 3);
    }

    #[test]
    fn test_batches_never_mix_kinds_and_keep_order() {
        let diff = Diff {
            to_add: entries(1..5),
            to_remove: entries(20..22),
        };
        let plan = plan(&diff, 10).unwrap();
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].entries, diff.to_remove);
        assert_eq!(plan.batches[1].entries, diff.to_add);
        assert_eq!(plan.batches[1].index, 1);
    }

    #[test]
    fn test_plan_is_stable() {
        let diff = Diff {
            to_add: entries(1..40),
            to_remove: entries(50..55),
        };
        assert_eq!(plan(&diff, 7).unwrap(), plan(&diff, 7).unwrap());
    }

    #[test]
    fn test_empty_diff_plans_nothing() {
        assert!(plan(&Diff::default(), 5).unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(plan(&Diff::default(), 0).is_err());
    }
}
