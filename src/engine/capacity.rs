use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

// ── Capacity index ────────────────────────────────────────────────

/// A suite counts as available when nobody lives in it and its size is not
/// restricted for the draw. Medical suites still count.
pub fn is_available(suite: &Suite, restricted: &BTreeSet<Size>) -> bool {
    suite.occupant.is_none() && !restricted.contains(&suite.size)
}

/// Available suites per size.
pub fn available_by_size(suites: &[Suite], restricted: &BTreeSet<Size>) -> BTreeMap<Size, u32> {
    let mut counts = BTreeMap::new();
    for suite in suites.iter().filter(|s| is_available(s, restricted)) {
        *counts.entry(suite.size).or_insert(0) += 1;
    }
    counts
}

/// Suites a group can take on its own turn: available and not medical.
pub fn selectable_by_size(suites: &[Suite], restricted: &BTreeSet<Size>) -> BTreeMap<Size, u32> {
    let mut counts = BTreeMap::new();
    for suite in suites.iter().filter(|s| !s.medical && is_available(s, restricted)) {
        *counts.entry(suite.size).or_insert(0) += 1;
    }
    counts
}

/// One row per size present among available suites or competing units,
/// ascending by size. Recomputed from scratch on every call.
pub fn capacity_index(
    suites: &[Suite],
    restricted: &BTreeSet<Size>,
    unit_sizes: impl IntoIterator<Item = Size>,
) -> Vec<CapacityRow> {
    let mut rows: BTreeMap<Size, CapacityRow> = BTreeMap::new();
    for (size, available) in available_by_size(suites, restricted) {
        rows.insert(
            size,
            CapacityRow {
                size,
                available,
                units: 0,
            },
        );
    }
    for size in unit_sizes {
        rows.entry(size)
            .or_insert(CapacityRow {
                size,
                available: 0,
                units: 0,
            })
            .units += 1;
    }
    rows.into_values().collect()
}

// ── Oversubscription ─────────────────────────────────────────────

/// Sizes with more competing units than available suites.
pub fn oversubscribed_sizes(rows: &[CapacityRow]) -> Vec<Size> {
    rows.iter()
        .filter(|r| r.oversubscribed())
        .map(|r| r.size)
        .collect()
}

/// Sizes that block the lottery: oversubscribed and not waived by a
/// restriction on that size.
pub fn blocking_sizes(rows: &[CapacityRow], restricted: &BTreeSet<Size>) -> Vec<Size> {
    oversubscribed_sizes(rows)
        .into_iter()
        .filter(|s| !restricted.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    fn suite(size: Size) -> Suite {
        Suite {
            id: Ulid::new(),
            label: format!("S{size}"),
            size,
            medical: false,
            occupant: None,
        }
    }

    fn occupied(size: Size) -> Suite {
        Suite {
            occupant: Some(Ulid::new()),
            ..suite(size)
        }
    }

    #[test]
    fn counts_only_free_unrestricted_suites() {
        let suites = vec![suite(1), suite(1), occupied(1), suite(2), suite(4)];
        let restricted = BTreeSet::from([4]);
        let counts = available_by_size(&suites, &restricted);
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&2), Some(&1));
        assert_eq!(counts.get(&4), None);
    }

    #[test]
    fn medical_suites_are_available() {
        let mut s = suite(2);
        s.medical = true;
        assert!(is_available(&s, &BTreeSet::new()));
    }

    #[test]
    fn medical_suites_are_not_selectable() {
        let mut medical = suite(1);
        medical.medical = true;
        let suites = vec![medical, suite(2), occupied(2)];
        let counts = selectable_by_size(&suites, &BTreeSet::new());
        assert_eq!(counts.get(&1), None);
        assert_eq!(counts.get(&2), Some(&1));
        assert_eq!(available_by_size(&suites, &BTreeSet::new()).get(&1), Some(&1));
    }

    #[test]
    fn index_reports_union_of_sizes() {
        let suites = vec![suite(2), suite(2)];
        let rows = capacity_index(&suites, &BTreeSet::new(), [2, 3]);
        assert_eq!(
            rows,
            vec![
                CapacityRow { size: 2, available: 2, units: 1 },
                CapacityRow { size: 3, available: 0, units: 1 },
            ]
        );
        assert_eq!(oversubscribed_sizes(&rows), vec![3]);
    }

    #[test]
    fn two_singles_three_units_is_oversubscribed() {
        let suites = vec![suite(1), suite(1)];
        let rows = capacity_index(&suites, &BTreeSet::new(), [1, 1, 1]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delta(), -1);
        assert_eq!(blocking_sizes(&rows, &BTreeSet::new()), vec![1]);
    }

    #[test]
    fn restriction_waives_blocking() {
        let suites = vec![suite(1), suite(3)];
        let restricted = BTreeSet::from([3]);
        let rows = capacity_index(&suites, &restricted, [1, 3]);
        assert_eq!(oversubscribed_sizes(&rows), vec![3]);
        assert!(blocking_sizes(&rows, &restricted).is_empty());
    }

    #[test]
    fn empty_inputs_give_empty_index() {
        let rows = capacity_index(&[], &BTreeSet::new(), []);
        assert!(rows.is_empty());
        assert!(oversubscribed_sizes(&rows).is_empty());
    }
}
