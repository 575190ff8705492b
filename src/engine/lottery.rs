use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// A unit eligible for numbering, with its resolved sorting size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub unit: Unit,
    pub sorting_size: Size,
    /// Leader surname (clip: leader of its first group).
    pub tie_key: String,
}

/// Clip sorting size: the largest member size when the bias favours the
/// end of the order large units sit at, otherwise the smallest.
pub fn sorting_size(sizes: &[Size], config: &SortConfig) -> Size {
    let take_max = matches!(
        (config.clip_bias, config.direction),
        (ClipBias::AdvantageLarge, SortDirection::Ascending)
            | (ClipBias::AdvantageSmall, SortDirection::Descending)
    );
    let pick = if take_max {
        sizes.iter().max()
    } else {
        sizes.iter().min()
    };
    pick.copied().unwrap_or(0)
}

/// Locked groups outside any clip, plus clips whose memberships are all
/// confirmed and whose groups are all locked. A group in a pending clip is
/// in neither set.
pub fn eligible_units(
    groups: &BTreeMap<Ulid, Group>,
    clips: &BTreeMap<Ulid, Clip>,
    config: &SortConfig,
    surname: impl Fn(&Ulid) -> String,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for group in groups.values() {
        if !group.status.is_locked() || clips.values().any(|c| c.contains(&group.id)) {
            continue;
        }
        out.push(Candidate {
            unit: Unit::Group(group.id),
            sorting_size: group.size,
            tie_key: surname(&group.leader_id),
        });
    }

    for clip in clips.values() {
        if !clip.fully_confirmed() {
            continue;
        }
        let members: Vec<&Group> = clip
            .memberships
            .iter()
            .filter_map(|m| groups.get(&m.group_id))
            .collect();
        if members.len() != clip.memberships.len() || !members.iter().all(|g| g.status.is_locked()) {
            continue;
        }
        let sizes: Vec<Size> = members.iter().map(|g| g.size).collect();
        out.push(Candidate {
            unit: Unit::Clip(clip.id),
            sorting_size: sorting_size(&sizes, config),
            tie_key: surname(&members[0].leader_id),
        });
    }

    out
}

/// Number every candidate within its sorting-size bucket, continuing after
/// the highest number already held in that bucket. Fails without assigning
/// anything if a candidate already holds a number.
pub fn assign_numbers<R: Rng + ?Sized>(
    candidates: Vec<Candidate>,
    existing: &[LotteryAssignment],
    tie_break: TieBreak,
    rng: &mut R,
) -> Result<Vec<LotteryAssignment>, EngineError> {
    if let Some(c) = candidates
        .iter()
        .find(|c| existing.iter().any(|a| a.unit == c.unit))
    {
        return Err(EngineError::AssignmentConflict(c.unit));
    }

    let mut buckets: BTreeMap<Size, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        buckets.entry(c.sorting_size).or_default().push(c);
    }

    let mut out = Vec::new();
    for (size, mut bucket) in buckets {
        match tie_break {
            TieBreak::Surname => {
                bucket.sort_by(|a, b| a.tie_key.cmp(&b.tie_key).then(a.unit.cmp(&b.unit)));
            }
            TieBreak::Shuffle => {
                // Fixed starting order so a seeded rng gives a fixed result.
                bucket.sort_by(|a, b| a.unit.cmp(&b.unit));
                bucket.shuffle(rng);
            }
        }

        let start = existing
            .iter()
            .filter(|a| a.sorting_size == size)
            .map(|a| a.number)
            .max()
            .unwrap_or(0);
        for (offset, c) in bucket.into_iter().enumerate() {
            out.push(LotteryAssignment {
                id: Ulid::new(),
                unit: c.unit,
                sorting_size: size,
                number: start + 1 + offset as u32,
            });
        }
    }
    Ok(out)
}
