use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;

use super::EngineError;
use super::error::SuiteUnavailable;

/// Groups that make up a unit. Disbanded groups are skipped.
pub fn constituents<'a>(
    unit: &Unit,
    groups: &'a BTreeMap<Ulid, Group>,
    clips: &BTreeMap<Ulid, Clip>,
) -> Vec<&'a Group> {
    match unit {
        Unit::Group(id) => groups.get(id).into_iter().collect(),
        Unit::Clip(id) => clips
            .get(id)
            .map(|c| c.memberships.iter().filter_map(|m| groups.get(&m.group_id)).collect())
            .unwrap_or_default(),
    }
}

/// A unit is selected once every one of its groups lives in a suite.
pub fn is_selected(unit: &Unit, groups: &BTreeMap<Ulid, Group>, clips: &BTreeMap<Ulid, Clip>) -> bool {
    constituents(unit, groups, clips)
        .iter()
        .all(|g| g.suite_id.is_some())
}

pub fn lottery_rows(
    assignments: &[LotteryAssignment],
    groups: &BTreeMap<Ulid, Group>,
    clips: &BTreeMap<Ulid, Clip>,
) -> Vec<LotteryRow> {
    let mut rows: Vec<LotteryRow> = assignments
        .iter()
        .map(|a| LotteryRow {
            unit: a.unit,
            sorting_size: a.sorting_size,
            number: a.number,
            selected: is_selected(&a.unit, groups, clips),
        })
        .collect();
    rows.sort_by_key(|r| (r.number, r.sorting_size, r.unit));
    rows
}

/// Every unselected unit holding the lowest outstanding number. Units of
/// different sizes can share a number and then select simultaneously.
/// `available` counts suites a group may take on its own turn; a unit waits
/// when its pending groups of some size outnumber those suites.
pub fn next_eligible(
    assignments: &[LotteryAssignment],
    groups: &BTreeMap<Ulid, Group>,
    clips: &BTreeMap<Ulid, Clip>,
    available: &BTreeMap<Size, u32>,
    direction: SortDirection,
) -> Option<Turn> {
    let pending: Vec<&LotteryAssignment> = assignments
        .iter()
        .filter(|a| !is_selected(&a.unit, groups, clips))
        .collect();
    let number = pending.iter().map(|a| a.number).min()?;

    let mut units: Vec<EligibleUnit> = pending
        .into_iter()
        .filter(|a| a.number == number)
        .map(|a| {
            let pending_groups: Vec<&Group> = constituents(&a.unit, groups, clips)
                .into_iter()
                .filter(|g| g.suite_id.is_none())
                .collect();
            let mut needed: BTreeMap<Size, u32> = BTreeMap::new();
            for g in &pending_groups {
                *needed.entry(g.size).or_insert(0) += 1;
            }
            let waiting = needed
                .iter()
                .any(|(size, n)| available.get(size).copied().unwrap_or(0) < *n);
            EligibleUnit {
                unit: a.unit,
                number,
                sorting_size: a.sorting_size,
                pending_groups: pending_groups.iter().map(|g| g.id).collect(),
                waiting,
            }
        })
        .collect();

    match direction {
        SortDirection::Descending => {
            units.sort_by(|a, b| b.sorting_size.cmp(&a.sorting_size).then(a.unit.cmp(&b.unit)))
        }
        SortDirection::Ascending | SortDirection::Unsorted => {
            units.sort_by(|a, b| a.sorting_size.cmp(&b.sorting_size).then(a.unit.cmp(&b.unit)))
        }
    }

    Some(Turn { number, units })
}

/// Suite-side preconditions for housing `group`. Occupancy is checked first
/// so the loser of a race always sees `Occupied`.
pub(crate) fn check_suite(
    group: &Group,
    suite: &Suite,
    draw: Option<&DrawState>,
    allow_medical: bool,
) -> Result<(), EngineError> {
    let unavailable = |reason| EngineError::SuiteUnavailable {
        suite: suite.id,
        reason,
    };
    if let Some(occupant) = suite.occupant {
        return Err(unavailable(SuiteUnavailable::Occupied(occupant)));
    }
    if suite.size != group.size {
        return Err(unavailable(SuiteUnavailable::SizeMismatch {
            suite: suite.size,
            group: group.size,
        }));
    }
    if let Some(ds) = draw {
        if !ds.suites.contains(&suite.id) {
            return Err(unavailable(SuiteUnavailable::NotInDraw));
        }
        if ds.restricted_sizes.contains(&suite.size) {
            return Err(unavailable(SuiteUnavailable::Restricted(suite.size)));
        }
    }
    if suite.medical && !allow_medical {
        return Err(unavailable(SuiteUnavailable::Medical));
    }
    Ok(())
}
