//! Property-based tests for the live window.
//!
//! Covers the capacity bound, most-recent-N selection, identity uniqueness,
//! ordering, and filter exclusion.

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::Value;

use fleetwatch::{LiveWindow, Record, TimestampNs, WindowFilter};

// =============================================================================
// Strategies
// =============================================================================

const HIDDEN_KIND: &str = "gridworks.event.snapshot.spaceheat";

/// (identity index, timestamp, hidden kind?)
fn arb_offer() -> impl Strategy<Value = (u8, i64, bool)> {
    (0u8..40, 0i64..60, prop::bool::weighted(0.2))
}

fn record((id, ts, hidden): (u8, i64, bool)) -> Record {
    let kind = if hidden { HIDDEN_KIND } else { "gridworks.event.problem" };
    Record::new(format!("r{id}"), TimestampNs(ts), kind, "hw1.scada", Value::Null)
}

fn filter() -> WindowFilter {
    WindowFilter {
        sources: Vec::new(),
        excluded_kinds: [HIDDEN_KIND.to_string()].into_iter().collect(),
    }
}

// =============================================================================
// Window invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn window_never_exceeds_capacity(
        capacity in 0usize..10,
        offers in prop::collection::vec(arb_offer(), 0..80),
    ) {
        let mut window = LiveWindow::new(capacity, filter());
        for offer in offers {
            window.consider(&record(offer));
            prop_assert!(window.len() <= capacity);
        }
    }

    #[test]
    fn window_members_are_unique_ordered_and_visible(
        capacity in 1usize..10,
        offers in prop::collection::vec(arb_offer(), 0..80),
    ) {
        let mut window = LiveWindow::new(capacity, filter());
        for offer in offers {
            window.consider(&record(offer));
        }

        let members = window.records();
        let unique: HashSet<_> = members.iter().map(|r| r.identity.clone()).collect();
        prop_assert_eq!(unique.len(), members.len());
        prop_assert!(members.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        prop_assert!(members.iter().all(|r| r.kind != HIDDEN_KIND));
    }

    /// With distinct identities the window holds the N greatest timestamps.
    #[test]
    fn window_holds_most_recent_timestamps(
        capacity in 1usize..10,
        stamps in prop::collection::vec((0i64..60, prop::bool::weighted(0.2)), 0..80),
    ) {
        let mut window = LiveWindow::new(capacity, filter());
        for (n, &(ts, hidden)) in stamps.iter().enumerate() {
            let r = Record::new(
                format!("unique-{n}"),
                TimestampNs(ts),
                if hidden { HIDDEN_KIND } else { "gridworks.event.problem" },
                "hw1.scada",
                Value::Null,
            );
            window.consider(&r);
        }

        let mut expected: Vec<i64> = stamps
            .iter()
            .filter(|(_, hidden)| !hidden)
            .map(|(ts, _)| *ts)
            .collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(capacity);
        expected.reverse();

        let actual: Vec<i64> = window.iter().map(|r| r.timestamp.0).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn reoffering_members_changes_nothing(
        capacity in 1usize..10,
        offers in prop::collection::vec(arb_offer(), 0..40),
    ) {
        let mut window = LiveWindow::new(capacity, filter());
        let records: Vec<Record> = offers.into_iter().map(record).collect();
        window.consider_all(&records);

        let before = window.records();
        prop_assert_eq!(window.consider_all(&before), 0);
        prop_assert_eq!(window.records(), before);
    }
}

#[test]
fn zero_capacity_admits_nothing() {
    let mut window = LiveWindow::new(0, WindowFilter::default());
    assert!(!window.consider(&record((1, 10, false))));
    assert!(window.is_empty());
}
