// crates/ob-conformance-core/tests/proptest_core.rs
// ============================================================================
// Module: Core Property-Based Tests
// Description: Property tests for substitution, list round-trips, the
//              permission solver, and missing-mandatory detection.
// ============================================================================

//! Property-based tests for core invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use ob_conformance_core::Context;
use ob_conformance_core::DeclaredEndpoint;
use ob_conformance_core::PermissionGroup;
use ob_conformance_core::conditionality::entries;
use ob_conformance_core::missing_mandatory;
use ob_conformance_core::permissions::KNOWN_PERMISSIONS;
use ob_conformance_core::solve_permissions;
use proptest::prelude::*;

fn code_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(KNOWN_PERMISSIONS).prop_map(str::to_string)
}

fn group_strategy() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    (
        prop::collection::vec(code_strategy(), 0 .. 4),
        prop::collection::vec(code_strategy(), 0 .. 3),
    )
        .prop_map(|(included, excluded)| {
            let excluded = excluded.into_iter().filter(|code| !included.contains(code)).collect();
            (included, excluded)
        })
}

proptest! {
    #[test]
    fn substitution_is_identity_without_tokens(input in "[^$]{0,64}") {
        let ctx = Context::new();
        prop_assert_eq!(ctx.replace(&input).unwrap(), input);
    }

    #[test]
    fn string_slices_round_trip(values in prop::collection::vec(".{0,12}", 0 .. 8)) {
        let mut ctx = Context::new();
        ctx.put_string_slice("list", &values);
        prop_assert_eq!(ctx.get_string_slice("list").unwrap(), values);
    }

    #[test]
    fn every_group_lands_in_exactly_one_covering_set(
        raw in prop::collection::vec(group_strategy(), 1 .. 12)
    ) {
        let groups: Vec<PermissionGroup> = raw
            .into_iter()
            .enumerate()
            .map(|(index, (included, excluded))| {
                PermissionGroup::new(format!("t{index}"), included, excluded).unwrap()
            })
            .collect();
        let sets = solve_permissions(&groups);
        for group in &groups {
            let holders: Vec<_> =
                sets.iter().filter(|set| set.test_ids.contains(&group.test_id)).collect();
            prop_assert_eq!(holders.len(), 1);
            let set = holders[0];
            prop_assert!(group.included.is_subset(&set.codes));
            prop_assert!(set.codes.is_disjoint(&group.excluded));
        }
    }

    #[test]
    fn missing_mandatory_is_order_independent(
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0 .. 10)
    ) {
        let spec = "account-transaction-v3.1.8";
        let table = entries(spec).unwrap();
        let declared: Vec<DeclaredEndpoint> = picks
            .iter()
            .map(|index| {
                let entry = index.get(&table);
                DeclaredEndpoint::new(entry.method, entry.endpoint)
            })
            .collect();
        let mut reversed = declared.clone();
        reversed.reverse();
        let forward = missing_mandatory(&declared, spec).unwrap();
        prop_assert_eq!(&forward, &missing_mandatory(&reversed, spec).unwrap());
        for entry in &forward {
            let present = declared.iter().any(|item| {
                item.method == entry.method && item.endpoint == entry.endpoint
            });
            prop_assert!(!present);
        }
    }
}
