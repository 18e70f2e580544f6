//! Diff engine
//!
//! `diff(desired, actual)` is a pure set difference in both directions.
//! Addresses are compared as bytes, so the letter case used in configuration
//! or returned by an RPC never creates phantom changes.

use dsync_core::{Diff, NetworkState};

/// Entries to add (`desired - actual`) and to remove (`actual - desired`).
///
/// Both sides come out in `TrustEntry` order, which keeps batch planning
/// stable across runs.
pub fn diff(desired: &NetworkState, actual: &NetworkState) -> Diff {
    debug_assert_eq!(desired.network, actual.network);
    Diff {
        to_add: desired.entries.difference(&actual.entries).copied().collect(),
        to_remove: actual.entries.difference(&desired.entries).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Selector};
    use dsync_core::{NetworkId, TrustEntry};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn network() -> NetworkId {
        NetworkId::new("mainnet")
    }

    fn state(entries: impl IntoIterator<Item = TrustEntry>) -> NetworkState {
        NetworkState::new(network(), entries)
    }

    /// Small address/selector domain so that random sets overlap
    fn entry_strategy() -> impl Strategy<Value = TrustEntry> {
        (1u8..6, prop::option::of(0u8..4)).prop_map(|(addr, sel)| match sel {
            Some(s) => TrustEntry::selector(Address::repeat_byte(addr), Selector::from([s, 0, 0, 1])),
            None => TrustEntry::approve_only(Address::repeat_byte(addr)),
        })
    }

    fn apply(actual: &NetworkState, diff: &Diff) -> NetworkState {
        let mut entries = actual.entries.clone();
        for entry in &diff.to_remove {
            entries.remove(entry);
        }
        entries.extend(diff.to_add.iter().copied());
        NetworkState {
            network: actual.network.clone(),
            entries,
        }
    }

    #[test]
    fn test_single_addition() {
        let entry = TrustEntry::selector(Address::repeat_byte(0xaa), Selector::from([0x11, 0x22, 0x33, 0x44]));
        let result = diff(&state([entry]), &state([]));
        assert_eq!(result.to_add, vec![entry]);
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_approve_only_already_present_is_empty() {
        let entry = TrustEntry::approve_only(Address::repeat_byte(0xaa));
        assert!(diff(&state([entry]), &state([entry])).is_empty());
    }

    #[test]
    fn test_removal_of_stale_entries() {
        let keep = TrustEntry::approve_only(Address::repeat_byte(0xaa));
        let stale = TrustEntry::approve_only(Address::repeat_byte(0xbb));
        let result = diff(&state([keep]), &state([keep, stale]));
        assert!(result.to_add.is_empty());
        assert_eq!(result.to_remove, vec![stale]);
    }

    #[test]
    fn test_case_of_configured_address_does_not_matter() {
        let lower = dsync_core::types::parse_contract_address("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd").unwrap();
        let mixed = dsync_core::types::parse_contract_address("0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD").unwrap();
        let result = diff(&state([TrustEntry::approve_only(lower)]), &state([TrustEntry::approve_only(mixed)]));
        assert!(result.is_empty());
    }

    proptest! {
        #[test]
        fn prop_add_and_remove_are_disjoint(
            desired in prop::collection::btree_set(entry_strategy(), 0..12),
            actual in prop::collection::btree_set(entry_strategy(), 0..12),
        ) {
            let result = diff(&state(desired), &state(actual));
            let add: BTreeSet<_> = result.to_add.iter().collect();
            let remove: BTreeSet<_> = result.to_remove.iter().collect();
            prop_assert!(add.is_disjoint(&remove));
        }

        #[test]
        fn prop_applying_the_diff_converges(
            desired in prop::collection::btree_set(entry_strategy(), 0..12),
            actual in prop::collection::btree_set(entry_strategy(), 0..12),
        ) {
            let desired = state(desired);
            let actual = state(actual);
            let applied = apply(&actual, &diff(&desired, &actual));
            prop_assert_eq!(&applied, &desired);
            prop_assert!(diff(&desired, &applied).is_empty());
        }

        #[test]
        fn prop_partial_application_shrinks_the_diff(
            desired in prop::collection::btree_set(entry_strategy(), 1..12),
            actual in prop::collection::btree_set(entry_strategy(), 0..12),
            keep in 0usize..12,
        ) {
            let desired = state(desired);
            let actual = state(actual);
            let full = diff(&desired, &actual);
            prop_assume!(!full.is_empty());

            // apply a non-empty prefix of the additions and removals
            let (add_n, remove_n) = if full.to_add.is_empty() {
                (0, keep.max(1))
            } else {
                (keep.max(1), keep)
            };
            let partial = Diff {
                to_add: full.to_add.iter().take(add_n).copied().collect(),
                to_remove: full.to_remove.iter().take(remove_n).copied().collect(),
            };
            let after = apply(&actual, &partial);
            prop_assert!(diff(&desired, &after).len() < full.len());
        }

        #[test]
        fn prop_diff_is_deterministic(
            desired in prop::collection::btree_set(entry_strategy(), 0..12),
            actual in prop::collection::btree_set(entry_strategy(), 0..12),
        ) {
            let desired = state(desired);
            let actual = state(actual);
            prop_assert_eq!(diff(&desired, &actual), diff(&desired, &actual));
        }
    }
}
